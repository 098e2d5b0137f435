// Copyright 2024 fgraph contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The observer (feature) protocol: capability bundles registered with a
//! `Graph` that receive lifecycle events and may contribute toposort
//! precedence constraints.

use fnv::FnvHashMap;

use crate::model::{Consumer, Var};
use crate::Graph;

/// The outcome of attempting to register an observer.
///
/// `AlreadyAttached` silently aborts the attach (the observer is not added,
/// and `Graph::extend` returns `Ok(())`); `Failed` is fatal and propagates to
/// the caller of `extend`.
pub enum AttachRejection {
    AlreadyAttached,
    Failed(String),
}

/// A capability bundle notified of every membership-changing event on a
/// `Graph`. All methods have permissive default (no-op) implementations so an
/// observer can implement only the events it cares about.
///
/// Every method is invoked synchronously, on the mutating thread, in
/// attachment order. `on_import`, `on_prune`, and `on_change_input` return
/// `()`: a panicking observer unwinds exactly where the event occurred and the
/// graph is left in whatever partial state the mutation had reached. This is a
/// documented hazard, not a bug: the container does not attempt to catch or
/// roll back a panicking observer.
pub trait Observer<V: Var> {
    fn on_attach(&self, _graph: &Graph<V>) -> Result<(), AttachRejection> {
        Ok(())
    }

    fn on_detach(&self, _graph: &Graph<V>) {}

    fn on_import(&self, _graph: &Graph<V>, _node: &V::Node) {}

    fn on_prune(&self, _graph: &Graph<V>, _node: &V::Node) {}

    fn on_change_input(
        &self,
        _graph: &Graph<V>,
        _consumer: &Consumer<V::Node>,
        _old: &V,
        _new: &V,
        _reason: Option<&str>,
    ) {
    }

    /// Contributes extra precedence constraints to `Graph::toposort`: for each
    /// `(node, predecessors)` entry, every listed predecessor must precede
    /// `node` in the returned order, in addition to the structural ordering
    /// implied by owner edges.
    fn orderings(&self, _graph: &Graph<V>) -> FnvHashMap<V::Node, Vec<V::Node>> {
        FnvHashMap::default()
    }
}

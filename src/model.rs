// Copyright 2024 fgraph contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The narrow interface the graph container consumes from its environment.
//!
//! Nothing in this module knows how to build an expression tree, what operators
//! exist, or how variable types compare for equality beyond `PartialEq`. The
//! concrete `Var`/`Oper` implementations, and the construction of the initial
//! expression trees they describe, belong to callers (see `tests.rs` for a
//! reference pair used by this crate's own test suite).

use std::fmt;
use std::hash::Hash;

use fnv::FnvHashMap;

use crate::ids::GraphId;

/// A `(consumer, index)` client site: either a node's input slot, or a graph
/// output slot identified by the sentinel `Output`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Consumer<N> {
    Output(usize),
    Node(N, usize),
}

/// One entry of an operator's `view_map`/`destroy_map`.
///
/// The source representation allows `view_map`/`destroy_map` values to be
/// arbitrary objects and raises `BadOperatorMetadata` if one turns out not to
/// be an ordered sequence of input indices. A statically typed signature can't
/// receive an arbitrary object in the first place, so `Malformed` stands in for
/// whatever a caller's construction code decided didn't amount to a valid
/// sequence (e.g. deserialized operator metadata from an untrusted source).
#[derive(Clone, Debug)]
pub enum MetadataEntry {
    Indices(Vec<usize>),
    Malformed,
}

/// Maps an output index to the input indices it may view or destroy.
pub type OperatorMetadata = FnvHashMap<usize, MetadataEntry>;

/// A symbolic value with a type, optionally produced by a `Node`.
///
/// Implementations are expected to be cheap, `Rc`-like handles: the graph
/// clones `Var` values freely (into client lists, membership sets, and so on)
/// and relies on `Eq`/`Hash` reflecting object identity rather than structural
/// equality of the type tag, mirroring how two distinct variables of the same
/// type are still distinct graph citizens.
pub trait Var: Clone + Eq + Hash + fmt::Debug {
    type Type: Clone + PartialEq + fmt::Debug;
    type Node: Oper<Var = Self>;

    /// The node this variable is an output of, or `None` for declared inputs
    /// and constants.
    fn owner(&self) -> Option<Self::Node>;

    fn var_type(&self) -> Self::Type;

    /// Constants are never reported as missing inputs even though they have
    /// no owner.
    fn is_constant(&self) -> bool;

    fn owning_graph(&self) -> Option<GraphId>;

    fn set_owning_graph(&self, id: Option<GraphId>);

    fn clients(&self) -> Vec<Consumer<Self::Node>>;

    fn add_client(&self, consumer: Consumer<Self::Node>);

    /// Removes one occurrence of `consumer`, if present. A no-op if it is not.
    fn remove_client(&self, consumer: &Consumer<Self::Node>);

    /// Produces a new, unattached variable of the same type and constness,
    /// with an empty client list and no owner. Used only by the structural
    /// cloner (`traversal::clone_get_equiv`).
    fn clone_fresh(&self) -> Self;
}

/// An operator application: an operator (opaque to this crate) plus ordered
/// input and output variables.
pub trait Oper: Clone + Eq + Hash + fmt::Debug {
    type Var: Var<Node = Self>;

    fn inputs(&self) -> Vec<Self::Var>;

    /// Rewrites input slot `index` in place. Called only by `Graph::change_input`.
    fn set_input(&self, index: usize, value: Self::Var);

    fn outputs(&self) -> Vec<Self::Var>;

    fn owning_graph(&self) -> Option<GraphId>;

    fn set_owning_graph(&self, id: Option<GraphId>);

    fn view_map(&self) -> Option<&OperatorMetadata> {
        None
    }

    fn destroy_map(&self) -> Option<&OperatorMetadata> {
        None
    }

    /// Called once, when the node is first imported into a graph. Stands in
    /// for initializing the dependency side-table reserved for observers.
    fn on_setup(&self) {}

    /// Produces a new, unattached node applying the same operator to
    /// `mapped_inputs`, with freshly cloned (unattached) outputs of the same
    /// type and count as this node's outputs. Used only by the structural
    /// cloner (`traversal::clone_get_equiv`).
    fn clone_fresh(&self, mapped_inputs: Vec<Self::Var>) -> Self;
}

// Copyright 2024 fgraph contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be
// copied and pasted across crates, but there doesn't appear to be a way to include inner
// attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! A mutable, observable computation graph over user-defined variables and
//! operators: the substrate an optimizing compiler for symbolic expressions
//! rewrites via variable substitution.
//!
//! The graph container itself (this crate) knows nothing about what an
//! operator does or how variable types compare; it consumes that through the
//! [`Var`]/[`Oper`] trait pair in [`model`].

mod error;
mod graph;
mod ids;
pub mod model;
pub mod observer;
pub mod traversal;

pub use crate::error::GraphError;
pub use crate::graph::{Graph, GraphConfig};
pub use crate::ids::GraphId;
pub use crate::model::{Consumer, MetadataEntry, Oper, OperatorMetadata, Var};
pub use crate::observer::{AttachRejection, Observer};

///
/// Logs at trace level, but only in `cfg(test)`.
///
#[macro_export]
macro_rules! test_trace_log {
    ($($arg:tt)+) => {
      #[cfg(test)]
      {
        log::trace!($($arg)+)
      }
    };
}

// Copyright 2024 fgraph contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

/// Everything that can go wrong while mutating or inspecting a `Graph`.
///
/// Every fallible public method on `Graph` returns `Result<_, GraphError>`; there is
/// no suppression anywhere in this crate; a caller that wants to roll back a rewrite
/// must do so itself.
#[derive(Debug)]
pub enum GraphError {
    /// An observer detected an invariant violation, or an internal structural check
    /// failed outside of `check_integrity` (e.g. a double-add of the same client site).
    Inconsistency(String),
    /// A variable required to compute an output is not a declared input, a constant,
    /// or the output of a node in the graph. `chain` is populated only when the graph
    /// was constructed with `verbose_diagnostics` enabled.
    MissingInput {
        message: String,
        chain: Option<Vec<String>>,
    },
    /// Attempted to attach a variable or node that already belongs to a different graph.
    OwnershipConflict(String),
    /// A replacement variable's type does not match the variable it is replacing.
    TypeMismatch(String),
    /// An operator's `view_map`/`destroy_map` contained a non-sequence entry.
    BadOperatorMetadata(String),
    /// `check_integrity` found a disagreement between cached membership and recomputed
    /// reachability, or a client-list mismatch.
    StructuralCorruption(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Inconsistency(message) => write!(f, "graph inconsistency: {message}"),
            GraphError::MissingInput { message, .. } => write!(f, "missing input: {message}"),
            GraphError::OwnershipConflict(message) => write!(f, "ownership conflict: {message}"),
            GraphError::TypeMismatch(message) => write!(f, "type mismatch: {message}"),
            GraphError::BadOperatorMetadata(message) => {
                write!(f, "bad operator metadata: {message}")
            }
            GraphError::StructuralCorruption(message) => {
                write!(f, "structural corruption: {message}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

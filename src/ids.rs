// Copyright 2024 fgraph contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a single `Graph` instance for ownership-exclusivity checks.
///
/// A `Var`/`Oper` implementation stores the `GraphId` of whichever graph last
/// imported it (or `None` if it has never been imported). Because graphs never
/// reuse another graph's id, comparing a value's stored id against the current
/// graph's id is sufficient to detect an attempt to share state across graphs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        GraphId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

// Copyright 2024 fgraph contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The pure (non-mutating) traversal utility consumed by the graph container.
//!
//! Every function here takes only slices of `Var`/`Oper` values and has no
//! access to any `Graph`'s private state: it is the seam a real external
//! traversal crate would occupy. `Graph` itself calls through this module
//! rather than re-implementing reachability or ordering inline.

use std::fmt;

use fnv::{FnvHashMap, FnvHashSet};
use petgraph::graph::DiGraph;

use crate::model::{Oper, Var};

/// Raised when a requested topological order is impossible because of a
/// dependency cycle (structural or observer-induced).
#[derive(Debug)]
pub struct CycleError(String);

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle detected involving {}", self.0)
    }
}

impl std::error::Error for CycleError {}

/// Walks backward from `targets` over owner edges, stopping at any variable in
/// `known` or with no owner, and returns every node encountered.
fn nodes_reachable_from<V: Var>(known: &FnvHashSet<V>, targets: &[V]) -> FnvHashSet<V::Node> {
    let mut seen_vars: FnvHashSet<V> = FnvHashSet::default();
    let mut seen_nodes: FnvHashSet<V::Node> = FnvHashSet::default();
    let mut stack: Vec<V> = targets.to_vec();

    while let Some(v) = stack.pop() {
        if known.contains(&v) || seen_vars.contains(&v) {
            continue;
        }
        seen_vars.insert(v.clone());
        if let Some(owner) = v.owner() {
            if seen_nodes.insert(owner.clone()) {
                stack.extend(owner.inputs());
            }
        }
    }

    seen_nodes
}

/// Orders `nodes` so that every node's inputs' owners (when also in `nodes`)
/// precede it, and so that every `(node, predecessors)` pair in
/// `extra_orderings` is respected. Errors if no such order exists.
pub(crate) fn order_nodes<V: Var>(
    nodes: &FnvHashSet<V::Node>,
    extra_orderings: Option<&FnvHashMap<V::Node, Vec<V::Node>>>,
) -> Result<Vec<V::Node>, CycleError> {
    if nodes.len() < 2 {
        return Ok(nodes.iter().cloned().collect());
    }

    let mut graph = DiGraph::<V::Node, (), u32>::new();
    let mut index_of = FnvHashMap::default();
    for node in nodes {
        let idx = graph.add_node(node.clone());
        index_of.insert(node.clone(), idx);
    }
    for node in nodes {
        let node_idx = index_of[node];
        for input in node.inputs() {
            if let Some(owner) = input.owner() {
                if let Some(&owner_idx) = index_of.get(&owner) {
                    graph.add_edge(owner_idx, node_idx, ());
                }
            }
        }
    }
    if let Some(extra) = extra_orderings {
        for (node, predecessors) in extra {
            let Some(&node_idx) = index_of.get(node) else {
                continue;
            };
            for pred in predecessors {
                if let Some(&pred_idx) = index_of.get(pred) {
                    graph.add_edge(pred_idx, node_idx, ());
                }
            }
        }
    }

    petgraph::algo::toposort(&graph, None)
        .map(|order| order.into_iter().map(|idx| graph[idx].clone()).collect())
        .map_err(|cycle| CycleError(format!("{:?}", graph[cycle.node_id()])))
}

/// Nodes reachable between `inputs` (the stopping frontier) and `outputs`.
pub fn ops<V: Var>(inputs: &[V], outputs: &[V]) -> FnvHashSet<V::Node> {
    let known: FnvHashSet<V> = inputs.iter().cloned().collect();
    nodes_reachable_from(&known, outputs)
}

/// Every variable reachable between `inputs` and `outputs`, including the
/// inputs and outputs themselves.
pub fn variables<V: Var>(inputs: &[V], outputs: &[V]) -> FnvHashSet<V> {
    let known: FnvHashSet<V> = inputs.iter().cloned().collect();
    let nodes = nodes_reachable_from(&known, outputs);
    let mut vars: FnvHashSet<V> = known;
    vars.extend(outputs.iter().cloned());
    for node in &nodes {
        vars.extend(node.inputs());
        vars.extend(node.outputs());
    }
    vars
}

/// Nodes reachable with `known` as an arbitrary (not necessarily "declared
/// input") stopping frontier, in topological order. Used internally by the
/// import engine, which stops at whatever is already in the graph's variable
/// set rather than only at its declared inputs.
pub(crate) fn new_nodes_between<V: Var>(
    known: &FnvHashSet<V>,
    targets: &[V],
) -> Result<Vec<V::Node>, CycleError> {
    let nodes = nodes_reachable_from(known, targets);
    order_nodes::<V>(&nodes, None)
}

/// Orders the nodes reachable between `inputs` and `outputs`, honoring
/// `extra_orderings` in addition to structural owner-edge precedence.
pub fn toposort<V: Var>(
    inputs: &[V],
    outputs: &[V],
    extra_orderings: Option<&FnvHashMap<V::Node, Vec<V::Node>>>,
) -> Result<Vec<V::Node>, CycleError> {
    let nodes = ops(inputs, outputs);
    order_nodes::<V>(&nodes, extra_orderings)
}

/// Builds a structurally fresh copy of the subgraph between `inputs` and
/// `outputs`: every reachable variable and node is replaced with an
/// unattached clone, wired identically. Returns the cloned inputs, the cloned
/// outputs, and the full correspondence map from original to clone.
///
/// A `replace` can transiently leave a graph cyclic before the caller reverts
/// it; cloning such a graph can't produce a topological order, so this
/// propagates the same `CycleError` `toposort` would.
pub fn clone_get_equiv<V: Var>(
    inputs: &[V],
    outputs: &[V],
) -> Result<(Vec<V>, Vec<V>, FnvHashMap<V, V>), CycleError> {
    let mut equiv: FnvHashMap<V, V> = FnvHashMap::default();
    for input in inputs {
        equiv.insert(input.clone(), input.clone_fresh());
    }

    let order = toposort(inputs, outputs, None)?;

    for node in &order {
        let mapped_inputs: Vec<V> = node
            .inputs()
            .into_iter()
            .map(|input| {
                equiv
                    .entry(input.clone())
                    .or_insert_with(|| input.clone_fresh())
                    .clone()
            })
            .collect();
        let new_node = node.clone_fresh(mapped_inputs);
        for (original_output, cloned_output) in node.outputs().iter().zip(new_node.outputs().iter()) {
            equiv.insert(original_output.clone(), cloned_output.clone());
        }
    }

    let new_inputs = inputs.iter().map(|i| equiv[i].clone()).collect();
    let new_outputs = outputs
        .iter()
        .map(|o| {
            equiv
                .entry(o.clone())
                .or_insert_with(|| o.clone_fresh())
                .clone()
        })
        .collect();

    Ok((new_inputs, new_outputs, equiv))
}

/// Renders each output's expression tree as a debug string, in the style of
/// `[expr1, expr2, ...]`.
pub fn as_string<V: Var>(inputs: &[V], outputs: &[V]) -> Vec<String> {
    let known: FnvHashSet<V> = inputs.iter().cloned().collect();
    outputs
        .iter()
        .map(|output| render(output, &known))
        .collect()
}

fn render<V: Var>(v: &V, known: &FnvHashSet<V>) -> String {
    if known.contains(v) {
        return format!("{v:?}");
    }
    match v.owner() {
        Some(owner) => {
            let rendered_inputs: Vec<String> = owner
                .inputs()
                .iter()
                .map(|input| render(input, known))
                .collect();
            format!("{owner:?}({})", rendered_inputs.join(", "))
        }
        None => format!("{v:?}"),
    }
}

// Copyright 2024 fgraph contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::rc::Rc;

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use log::{debug, trace};

use crate::error::GraphError;
use crate::ids::GraphId;
use crate::model::{Consumer, MetadataEntry, Oper, Var};
use crate::observer::{AttachRejection, Observer};
use crate::traversal;
use crate::test_trace_log;

/// Verbose-diagnostics toggle consumed by `Graph::missing_input_error`.
///
/// A binary embedding this crate would typically populate this from its own
/// configuration layer; the crate itself parses nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct GraphConfig {
    pub verbose_diagnostics: bool,
}

/// A mutable, observable computation graph between a declared set of input
/// variables and output variables.
///
/// `nodes` and `variables` are always exactly the node/variable sets reachable
/// from `inputs` to `outputs`, every client site recorded on a variable
/// matches a real consumer slot and vice versa, and every member's
/// owning-graph reference equals `self.id`.
pub struct Graph<V: Var> {
    id: GraphId,
    inputs: Vec<V>,
    input_set: HashSet<V>,
    outputs: Vec<V>,
    nodes: HashSet<V::Node>,
    variables: HashSet<V>,
    observers: Vec<Rc<dyn Observer<V>>>,
    verbose: bool,
}

impl<V: Var> Graph<V> {
    /// Constructs a graph with no observers and default configuration.
    pub fn new(inputs: Vec<V>, outputs: Vec<V>) -> Result<Self, GraphError> {
        Self::with_config(inputs, outputs, Vec::new(), GraphConfig::default())
    }

    /// Constructs a graph, attaching `observers` in order and applying `config`.
    pub fn with_config(
        inputs: Vec<V>,
        outputs: Vec<V>,
        observers: Vec<Rc<dyn Observer<V>>>,
        config: GraphConfig,
    ) -> Result<Self, GraphError> {
        let id = GraphId::fresh();
        debug!("constructing graph {id:?} with {} declared inputs", inputs.len());

        let input_set: HashSet<V> = inputs.iter().cloned().collect();
        let mut graph = Graph {
            id,
            inputs,
            input_set,
            outputs,
            nodes: HashSet::default(),
            variables: HashSet::default(),
            observers: Vec::new(),
            verbose: config.verbose_diagnostics,
        };

        for observer in observers {
            graph.extend(observer)?;
        }

        for input in graph.inputs.clone() {
            if input.owner().is_some() {
                return Err(GraphError::OwnershipConflict(format!(
                    "{input:?} is the output of an existing node and cannot also be declared as an input"
                )));
            }
            graph.setup_variable(&input)?;
            graph.variables.insert(input);
        }

        let outputs = graph.outputs.clone();
        graph.import_variables(&outputs)?;
        for (i, output) in outputs.into_iter().enumerate() {
            graph.add_client(&output, Consumer::Output(i))?;
        }

        Ok(graph)
    }

    pub fn inputs(&self) -> &[V] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[V] {
        &self.outputs
    }

    pub fn nodes(&self) -> &HashSet<V::Node> {
        &self.nodes
    }

    pub fn variables(&self) -> &HashSet<V> {
        &self.variables
    }

    // ---- 4.1 variable setup and client-list maintenance ----

    fn setup_variable(&self, v: &V) -> Result<(), GraphError> {
        match v.owning_graph() {
            Some(existing) if existing != self.id => Err(GraphError::OwnershipConflict(format!(
                "{v:?} already belongs to a different graph"
            ))),
            Some(_) => Ok(()),
            None => {
                v.set_owning_graph(Some(self.id));
                Ok(())
            }
        }
    }

    fn add_client(&self, v: &V, consumer: Consumer<V::Node>) -> Result<(), GraphError> {
        if v.clients().contains(&consumer) {
            return Err(GraphError::Inconsistency(format!(
                "{consumer:?} is already a client of {v:?}"
            )));
        }
        v.add_client(consumer);
        Ok(())
    }

    /// Removes `to_remove` from `v`'s client list. If `v` becomes unreferenced,
    /// either prunes it immediately (`prune = true`) or reports the candidacy
    /// to the caller (`prune = false`) so the prune can be deferred.
    fn remove_clients(&mut self, v: &V, to_remove: &[Consumer<V::Node>], prune: bool) -> bool {
        for consumer in to_remove {
            v.remove_client(consumer);
        }
        if v.clients().is_empty() {
            if prune {
                self.prune_variables(std::slice::from_ref(v));
                false
            } else {
                true
            }
        } else {
            false
        }
    }

    // ---- 4.2 import ----

    fn missing_input_error(&self, missing: &V, used_by: Option<&V::Node>) -> GraphError {
        if self.verbose {
            for output in &self.outputs {
                if let Some(chain) = find_path(output, missing) {
                    let rendered: Vec<String> = chain.iter().map(|v| format!("{v:?}")).collect();
                    return GraphError::MissingInput {
                        message: format!(
                            "{missing:?} is neither a declared input, a constant, nor produced \
                             by an in-graph node; chain to output: {}",
                            rendered.join(" -> ")
                        ),
                        chain: Some(rendered),
                    };
                }
            }
        }
        GraphError::MissingInput {
            message: match used_by {
                Some(node) => format!(
                    "an input used to compute {node:?} was not provided: {missing:?}"
                ),
                None => format!("an input of the graph was not provided: {missing:?}"),
            },
            chain: None,
        }
    }

    fn validate_operator_metadata(&self, node: &V::Node) -> Result<(), GraphError> {
        for (name, metadata) in [("view_map", node.view_map()), ("destroy_map", node.destroy_map())] {
            if let Some(map) = metadata {
                for (output_index, entry) in map {
                    if let MetadataEntry::Malformed = entry {
                        return Err(GraphError::BadOperatorMetadata(format!(
                            "{node:?} has a non-sequence {name} entry for output {output_index}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn setup_node(&self, node: &V::Node) -> Result<(), GraphError> {
        self.validate_operator_metadata(node)?;
        match node.owning_graph() {
            Some(existing) if existing != self.id => Err(GraphError::OwnershipConflict(format!(
                "{node:?} already belongs to a different graph"
            ))),
            Some(_) => Ok(()),
            None => {
                node.set_owning_graph(Some(self.id));
                Ok(())
            }
        }
    }

    /// Imports every node reachable (via owner edges) from `node`'s outputs
    /// that is not already known to this graph, in topological order.
    fn import_node(&mut self, node: &V::Node) -> Result<(), GraphError> {
        let candidates = traversal::new_nodes_between::<V>(&self.variables, &node.outputs())
            .map_err(|e| GraphError::Inconsistency(e.to_string()))?;

        for candidate in &candidates {
            if let Some(existing) = candidate.owning_graph() {
                if existing != self.id {
                    return Err(GraphError::OwnershipConflict(format!(
                        "{candidate:?} already belongs to a different graph"
                    )));
                }
            }
            for input in candidate.inputs() {
                if let Some(existing) = input.owning_graph() {
                    if existing != self.id {
                        return Err(GraphError::OwnershipConflict(format!(
                            "{input:?} already belongs to a different graph"
                        )));
                    }
                }
                if input.owner().is_none() && !input.is_constant() && !self.input_set.contains(&input) {
                    return Err(self.missing_input_error(&input, Some(candidate)));
                }
            }
        }

        for candidate in &candidates {
            self.setup_node(candidate)?;
            self.nodes.insert(candidate.clone());
            for output in candidate.outputs() {
                self.setup_variable(&output)?;
                self.variables.insert(output);
            }
            for (i, input) in candidate.inputs().into_iter().enumerate() {
                if !self.variables.contains(&input) {
                    self.setup_variable(&input)?;
                    self.variables.insert(input.clone());
                }
                self.add_client(&input, Consumer::Node(candidate.clone(), i))?;
            }
            candidate.on_setup();
            trace!("imported node {candidate:?} into graph {:?}", self.id);
            self.dispatch_on_import(candidate);
        }

        Ok(())
    }

    /// Brings `vars` into the graph: imports the owner subgraph of each, then
    /// validates and registers the variables themselves.
    fn import_variables(&mut self, vars: &[V]) -> Result<(), GraphError> {
        let mut started: HashSet<V::Node> = HashSet::default();
        let mut owners_to_import: Vec<V::Node> = Vec::new();
        for v in vars {
            if let Some(owner) = v.owner() {
                if !self.nodes.contains(&owner) && started.insert(owner.clone()) {
                    owners_to_import.push(owner);
                }
            }
        }
        for owner in owners_to_import {
            self.import_node(&owner)?;
        }

        for v in vars {
            if v.owner().is_none() && !v.is_constant() && !self.input_set.contains(v) {
                return Err(self.missing_input_error(v, None));
            }
            if v.owning_graph() != Some(self.id) {
                self.setup_variable(v)?;
            }
            self.variables.insert(v.clone());
        }

        Ok(())
    }

    // ---- 4.3 prune ----

    fn prune_node(&mut self, node: &V::Node) {
        let is_graph_output = |v: &V| self.outputs.iter().any(|o| o == v);
        if node.outputs().iter().any(|o| !o.clients().is_empty() || is_graph_output(o)) {
            return;
        }
        if !self.nodes.remove(node) {
            return;
        }
        for output in node.outputs() {
            self.variables.remove(&output);
        }
        trace!("pruned node {node:?} from graph {:?}", self.id);
        self.dispatch_on_prune(node);
        for (i, input) in node.inputs().into_iter().enumerate() {
            self.remove_clients(&input, &[Consumer::Node(node.clone(), i)], true);
        }
    }

    fn prune_variables(&mut self, vars: &[V]) {
        let owners: HashSet<V::Node> = vars.iter().filter_map(Var::owner).collect();
        for owner in owners {
            self.prune_node(&owner);
        }
        for v in vars {
            if v.clients().is_empty()
                && !self.outputs.iter().any(|o| o == v)
                && !self.input_set.contains(v)
            {
                self.variables.remove(v);
            }
        }
    }

    // ---- 4.4 change_input ----

    /// The single edge-mutation primitive: rewires `consumer` to `new_r`.
    pub fn change_input(
        &mut self,
        consumer: Consumer<V::Node>,
        new_r: V,
        reason: Option<&str>,
    ) -> Result<(), GraphError> {
        let old_r = match &consumer {
            Consumer::Output(i) => self.outputs.get(*i).cloned().ok_or_else(|| {
                GraphError::Inconsistency(format!("output index {i} is out of range"))
            })?,
            Consumer::Node(n, i) => {
                if n.owning_graph() != Some(self.id) {
                    return Err(GraphError::Inconsistency(format!(
                        "{n:?} does not belong to this graph"
                    )));
                }
                n.inputs().get(*i).cloned().ok_or_else(|| {
                    GraphError::Inconsistency(format!("input index {i} is out of range for {n:?}"))
                })?
            }
        };

        if old_r.var_type() != new_r.var_type() {
            return Err(GraphError::TypeMismatch(format!(
                "cannot replace {old_r:?} (type {:?}) with {new_r:?} (type {:?})",
                old_r.var_type(),
                new_r.var_type()
            )));
        }

        if old_r == new_r {
            return Ok(());
        }

        match &consumer {
            Consumer::Output(i) => self.outputs[*i] = new_r.clone(),
            Consumer::Node(n, i) => n.set_input(*i, new_r.clone()),
        }

        self.import_variables(std::slice::from_ref(&new_r))?;
        self.add_client(&new_r, consumer.clone())?;
        let prune_candidate = self.remove_clients(&old_r, &[consumer.clone()], false);

        test_trace_log!(
            "change_input: {consumer:?} {old_r:?} -> {new_r:?} (reason: {reason:?})"
        );
        self.dispatch_on_change_input(&consumer, &old_r, &new_r, reason);

        if prune_candidate {
            self.prune_variables(std::slice::from_ref(&old_r));
        }

        Ok(())
    }

    // ---- 4.5 replace / replace_all ----

    /// Substitutes `new_r` for `r` at every client site of `r`. A no-op,
    /// silently, if `r` is not currently in the graph.
    pub fn replace(&mut self, r: &V, new_r: &V, reason: Option<&str>) -> Result<(), GraphError> {
        if r.owning_graph() != Some(self.id) {
            return Err(GraphError::Inconsistency(format!(
                "cannot replace {r:?}: it does not belong to this graph"
            )));
        }
        if r.var_type() != new_r.var_type() {
            return Err(GraphError::TypeMismatch(format!(
                "cannot replace {r:?} (type {:?}) with {new_r:?} (type {:?})",
                r.var_type(),
                new_r.var_type()
            )));
        }
        if !self.variables.contains(r) {
            return Ok(());
        }

        for consumer in r.clients() {
            self.change_input(consumer, new_r.clone(), reason)?;
        }
        Ok(())
    }

    /// Applies `replace` for each pair in order.
    pub fn replace_all(&mut self, pairs: &[(V, V)], reason: Option<&str>) -> Result<(), GraphError> {
        for (r, new_r) in pairs {
            self.replace(r, new_r, reason)?;
        }
        Ok(())
    }

    // ---- 4.6 observer protocol ----

    /// Registers `observer`. A no-op if this exact instance is already
    /// registered, or if `on_attach` rejects with `AlreadyAttached`.
    pub fn extend(&mut self, observer: Rc<dyn Observer<V>>) -> Result<(), GraphError> {
        if self.observers.iter().any(|o| Rc::ptr_eq(o, &observer)) {
            return Ok(());
        }
        match observer.on_attach(self) {
            Ok(()) => {
                debug!("attached observer to graph {:?}", self.id);
                self.observers.push(observer);
                Ok(())
            }
            Err(AttachRejection::AlreadyAttached) => Ok(()),
            Err(AttachRejection::Failed(message)) => Err(GraphError::Inconsistency(message)),
        }
    }

    /// Deregisters `observer`. Silent if it was not registered.
    pub fn remove_feature(&mut self, observer: &Rc<dyn Observer<V>>) {
        if let Some(pos) = self.observers.iter().position(|o| Rc::ptr_eq(o, observer)) {
            let removed = self.observers.remove(pos);
            debug!("detached observer from graph {:?}", self.id);
            removed.on_detach(self);
        }
    }

    fn dispatch_on_import(&self, node: &V::Node) {
        for observer in &self.observers {
            observer.on_import(self, node);
        }
    }

    fn dispatch_on_prune(&self, node: &V::Node) {
        for observer in &self.observers {
            observer.on_prune(self, node);
        }
    }

    fn dispatch_on_change_input(
        &self,
        consumer: &Consumer<V::Node>,
        old_r: &V,
        new_r: &V,
        reason: Option<&str>,
    ) {
        for observer in &self.observers {
            observer.on_change_input(self, consumer, old_r, new_r, reason);
        }
    }

    // ---- 4.7 ordering-aware toposort ----

    /// Merges every observer's `orderings()` by union, per node.
    pub fn orderings(&self) -> HashMap<V::Node, Vec<V::Node>> {
        let mut merged: HashMap<V::Node, HashSet<V::Node>> = HashMap::default();
        for observer in &self.observers {
            for (node, predecessors) in observer.orderings(self) {
                merged.entry(node).or_default().extend(predecessors);
            }
        }
        merged
            .into_iter()
            .map(|(node, preds)| (node, preds.into_iter().collect()))
            .collect()
    }

    /// Orders every node in the graph, respecting both owner-edge precedence
    /// and observer-supplied orderings.
    pub fn toposort(&self) -> Result<Vec<V::Node>, GraphError> {
        if self.nodes.len() < 2 {
            return Ok(self.nodes.iter().cloned().collect());
        }
        let ords = self.orderings();
        traversal::toposort(&self.inputs, &self.outputs, Some(&ords))
            .map_err(|e| GraphError::Inconsistency(e.to_string()))
    }

    pub fn clients(&self, r: &V) -> Vec<Consumer<V::Node>> {
        r.clients()
    }

    pub fn nclients(&self, r: &V) -> usize {
        r.clients().len()
    }

    // ---- 4.8 integrity check and clone ----

    /// Recomputes ground truth from `inputs`/`outputs` via the traversal
    /// utility and compares it to cached membership; also checks ownership
    /// and client-list consistency for every member.
    pub fn check_integrity(&self) -> Result<(), GraphError> {
        let expected_nodes = traversal::ops(&self.inputs, &self.outputs);
        if self.nodes != expected_nodes {
            return Err(GraphError::StructuralCorruption(format!(
                "node set disagreement: missing {:?}, excess {:?}",
                expected_nodes.difference(&self.nodes).collect::<Vec<_>>(),
                self.nodes.difference(&expected_nodes).collect::<Vec<_>>(),
            )));
        }

        for node in &self.nodes {
            if node.owning_graph() != Some(self.id) {
                return Err(GraphError::StructuralCorruption(format!(
                    "{node:?} does not belong to this graph"
                )));
            }
            for (i, input) in node.inputs().into_iter().enumerate() {
                if input.owning_graph() != Some(self.id) {
                    return Err(GraphError::StructuralCorruption(format!(
                        "input {i} of {node:?} does not belong to this graph"
                    )));
                }
                if !input.clients().contains(&Consumer::Node(node.clone(), i)) {
                    return Err(GraphError::StructuralCorruption(format!(
                        "missing client entry for input {i} of {node:?}"
                    )));
                }
            }
        }

        let expected_vars = traversal::variables(&self.inputs, &self.outputs);
        if self.variables != expected_vars {
            return Err(GraphError::StructuralCorruption(format!(
                "variable set disagreement: missing {:?}, excess {:?}",
                expected_vars.difference(&self.variables).collect::<Vec<_>>(),
                self.variables.difference(&expected_vars).collect::<Vec<_>>(),
            )));
        }

        for v in &expected_vars {
            if v.owner().is_none() && !v.is_constant() && !self.input_set.contains(v) {
                return Err(GraphError::StructuralCorruption(format!(
                    "{v:?} is an undeclared input"
                )));
            }
            if v.owning_graph() != Some(self.id) {
                return Err(GraphError::StructuralCorruption(format!(
                    "{v:?} does not belong to this graph"
                )));
            }
            for consumer in v.clients() {
                match &consumer {
                    Consumer::Output(i) => {
                        if self.outputs.get(*i) != Some(v) {
                            return Err(GraphError::StructuralCorruption(format!(
                                "output slot {i} does not point at {v:?}"
                            )));
                        }
                    }
                    Consumer::Node(n, i) => {
                        if !self.nodes.contains(n) {
                            return Err(GraphError::StructuralCorruption(format!(
                                "{v:?} lists a client {n:?} that is not in the graph"
                            )));
                        }
                        if n.inputs().get(*i) != Some(v) {
                            return Err(GraphError::StructuralCorruption(format!(
                                "input slot {i} of {n:?} does not point at {v:?}"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Builds a structurally fresh copy of this graph, reusing (not cloning)
    /// the same observer instances, and returns the variable-correspondence
    /// map produced by the structural cloner.
    pub fn clone_get_equiv(&self) -> Result<(Graph<V>, HashMap<V, V>), GraphError> {
        self.check_integrity()?;
        let (new_inputs, new_outputs, equiv) = traversal::clone_get_equiv(&self.inputs, &self.outputs)
            .map_err(|e| GraphError::Inconsistency(e.to_string()))?;
        let mut cloned = Graph::with_config(
            new_inputs,
            new_outputs,
            Vec::new(),
            GraphConfig {
                verbose_diagnostics: self.verbose,
            },
        )?;
        for observer in &self.observers {
            cloned.extend(observer.clone())?;
        }
        cloned.check_integrity()?;
        Ok((cloned, equiv))
    }

    /// Equivalent to `clone_get_equiv().0`.
    #[allow(clippy::should_implement_trait)]
    pub fn clone(&self) -> Result<Graph<V>, GraphError> {
        Ok(self.clone_get_equiv()?.0)
    }

    /// Tears down every owning-graph reference and consumes the graph. Unlike
    /// the reference implementation, the type system (not a runtime flag)
    /// prevents further use: there is no method left to call once `self` has
    /// been moved into `disown`.
    pub fn disown(self) {
        for node in self.nodes {
            node.set_owning_graph(None);
        }
        for v in self.variables {
            v.set_owning_graph(None);
        }
    }
}

/// Depth-first search over owner edges from `from` to `target`, used only to
/// build a human-readable chain for verbose `MissingInput` diagnostics.
fn find_path<V: Var>(from: &V, target: &V) -> Option<Vec<V>> {
    if from == target {
        return Some(vec![from.clone()]);
    }
    let owner = from.owner()?;
    for input in owner.inputs() {
        if let Some(mut path) = find_path(&input, target) {
            path.push(from.clone());
            return Some(path);
        }
    }
    None
}

impl<V: Var> fmt::Display for Graph<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = traversal::as_string(&self.inputs, &self.outputs);
        write!(f, "[{}]", rendered.join(", "))
    }
}

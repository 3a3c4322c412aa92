//! Intermediate representation for the compiler graph.
//!
//! The IR is a directed graph where:
//! - **Nodes** (`Node`) are operator instances (e.g., Gelu, Add, Conv2d)
//! - **Tensors** (`TensorDesc`) live in a side arena addressed by `TensorId`
//!
//! The producer/consumer tables are the source of truth for data flow.
//! petgraph edges mirror them and exist for ordering and cycle checks.

use crate::fragment::Fragment;
use crate::layout::FormatStridePair;
use crate::operator::Operator;
use crate::types::{DataType, TensorDesc, TensorSpec};
use crate::{Error, Result};
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Type alias for node identifiers (backed by petgraph NodeIndex).
pub type NodeId = NodeIndex;

/// Stable identifier of a tensor in the graph's tensor arena.
///
/// Tensor IDs are never reused, so an ID held across a rewrite either still
/// names the same tensor or names nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub usize);

impl TensorId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

// ──────────────────────────────── Graph ──────────────────────────────────

/// Tensor computation graph.
///
/// Acyclic at all times, and every consumed tensor is either a graph input
/// or the output of a node in the graph. All mutating operations check their
/// preconditions before touching anything, so a failed call leaves the graph
/// as it was.
#[derive(Debug, Clone)]
pub struct Graph {
    /// The graph structure (nodes only, no edge data).
    graph: StableGraph<Node, ()>,

    /// Tensor arena. Removed tensors leave a `None` behind.
    tensors: Vec<Option<TensorDesc>>,

    /// Lookup table: tensor ID -> producing node ID.
    producer: HashMap<TensorId, NodeId>,

    /// Lookup table: tensor ID -> consuming node IDs, one entry per input slot.
    consumers: HashMap<TensorId, Vec<NodeId>>,

    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,

    /// Next insertion sequence number.
    next_seq: u64,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            tensors: Vec::new(),
            producer: HashMap::new(),
            consumers: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_seq: 0,
        }
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Iterate over all nodes in the graph (arena order).
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|node| (id, node)))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Composite nodes, in insertion order.
    pub fn composite_nodes(&self) -> Vec<NodeId> {
        let mut composites: Vec<(u64, NodeId)> = self
            .nodes()
            .filter(|(_, node)| node.is_composite())
            .map(|(id, node)| (node.seq, id))
            .collect();
        composites.sort();
        composites.into_iter().map(|(_, id)| id).collect()
    }

    /// Find a node by name.
    pub fn find_node_by_name(&self, name: &str) -> Result<NodeId> {
        self.nodes()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node '{}' not found", name)))
    }

    // ── Tensor access ──

    /// Get a tensor descriptor.
    pub fn tensor(&self, id: TensorId) -> Result<&TensorDesc> {
        self.tensors
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidGraph(format!("Tensor {id} not found")))
    }

    fn tensor_mut(&mut self, id: TensorId) -> Result<&mut TensorDesc> {
        self.tensors
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidGraph(format!("Tensor {id} not found")))
    }

    /// Iterate over all live tensors.
    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &TensorDesc)> {
        self.tensors
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (TensorId(i), t)))
    }

    /// Number of live tensors.
    pub fn tensor_count(&self) -> usize {
        self.tensors.iter().filter(|t| t.is_some()).count()
    }

    pub fn tensor_producer(&self, id: TensorId) -> Option<NodeId> {
        self.producer.get(&id).copied()
    }

    /// Nodes consuming a tensor, each listed once.
    pub fn tensor_consumers(&self, id: TensorId) -> Vec<NodeId> {
        let mut consumers = self.consumers.get(&id).cloned().unwrap_or_default();
        consumers.sort();
        consumers.dedup();
        consumers
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn is_input(&self, id: TensorId) -> bool {
        self.inputs.contains(&id)
    }

    /// Whether a node may consume the tensor: it is a graph input or has a
    /// producer.
    fn is_available(&self, id: TensorId) -> bool {
        self.tensor(id).is_ok() && (self.is_input(id) || self.producer.contains_key(&id))
    }

    // ── Graph construction ──

    /// Add a graph input and return its tensor ID.
    pub fn add_input(
        &mut self,
        name: impl Into<String>,
        dtype: DataType,
        shape: Vec<usize>,
    ) -> TensorId {
        let id = self.push_tensor(TensorDesc::new(name, dtype, shape));
        self.inputs.push(id);
        id
    }

    /// Insert an operator node consuming `inputs` and producing newly
    /// allocated tensors matching `outputs`.
    ///
    /// # Errors
    ///
    /// Returns `Error::GraphConstruction` if an input is neither a graph
    /// input nor produced by a node, or if `outputs` disagrees with
    /// `op.infer_outputs`. Nothing is inserted in that case.
    pub fn add_operator(
        &mut self,
        op: Arc<dyn Operator>,
        name: impl Into<String>,
        inputs: &[TensorId],
        outputs: &[TensorSpec],
    ) -> Result<NodeId> {
        let name = name.into();
        let inferred = self.check_operator(op.as_ref(), &name, inputs)?;
        if inferred.as_slice() != outputs {
            return Err(Error::GraphConstruction(format!(
                "{} node '{name}' declares outputs [{}] but its inputs produce [{}]",
                op.kind(),
                format_specs(outputs),
                format_specs(&inferred),
            )));
        }
        Ok(self.push_operator(op, name, inputs, inferred))
    }

    /// Like `add_operator`, taking the outputs from `op.infer_outputs`.
    pub fn add_operator_inferred(
        &mut self,
        op: Arc<dyn Operator>,
        name: impl Into<String>,
        inputs: &[TensorId],
    ) -> Result<NodeId> {
        let name = name.into();
        let inferred = self.check_operator(op.as_ref(), &name, inputs)?;
        Ok(self.push_operator(op, name, inputs, inferred))
    }

    fn check_operator(
        &self,
        op: &dyn Operator,
        name: &str,
        inputs: &[TensorId],
    ) -> Result<Vec<TensorSpec>> {
        let mut specs = Vec::with_capacity(inputs.len());
        for &id in inputs {
            if !self.is_available(id) {
                return Err(Error::GraphConstruction(format!(
                    "{} node '{name}' consumes {id}, which is neither a graph input nor a node output",
                    op.kind()
                )));
            }
            specs.push(self.tensor(id)?.spec());
        }
        op.infer_outputs(&specs).map_err(|e| {
            Error::GraphConstruction(format!("{} node '{name}': {e}", op.kind()))
        })
    }

    fn push_operator(
        &mut self,
        op: Arc<dyn Operator>,
        name: String,
        inputs: &[TensorId],
        outputs: Vec<TensorSpec>,
    ) -> NodeId {
        let output_ids = outputs
            .into_iter()
            .enumerate()
            .map(|(j, spec)| self.push_tensor(TensorDesc::from_spec(format!("{name}:{j}"), spec)))
            .collect();
        self.insert_node(name, op, inputs.to_vec(), output_ids)
    }

    /// Declare a tensor as a graph output.
    pub fn mark_output(&mut self, id: TensorId) -> Result<()> {
        if !self.is_available(id) {
            return Err(Error::GraphConstruction(format!(
                "cannot mark {id} as output: it is not produced by any node"
            )));
        }
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
        Ok(())
    }

    // ── Graph mutation ──

    /// Remove a node whose outputs nobody reads.
    ///
    /// The node's output tensors are removed with it.
    pub fn remove_operator(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        for &out in &node.outputs {
            if self.consumers.get(&out).is_some_and(|c| !c.is_empty()) || self.outputs.contains(&out)
            {
                return Err(Error::InvalidGraph(format!(
                    "cannot remove node '{}': output {out} is still in use",
                    node.name
                )));
            }
        }

        if let Some(node) = self.detach_node(id) {
            for out in node.outputs {
                self.drop_tensor(out);
            }
        }
        Ok(())
    }

    /// Replace `old` with the nodes of `fragment`.
    ///
    /// The fragment boundary is checked first (input count and specs, output
    /// count, and exact output dtype and shape). Fragment outputs produced by
    /// fragment nodes take over `old`'s output tensors, so consumers and graph
    /// outputs are untouched. A fragment output that aliases a fragment input
    /// or an earlier output moves `old`'s consumers onto the aliased tensor,
    /// and the orphaned output tensor is removed.
    ///
    /// Returns the IDs of the inserted nodes in fragment order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decomposition` on a boundary mismatch, without
    /// modifying the graph.
    pub fn replace_operator(&mut self, old: NodeId, fragment: Fragment) -> Result<Vec<NodeId>> {
        let node = self.node(old)?.clone();
        self.check_fragment_boundary(&node, &fragment)?;

        let mut mapping: Vec<Option<TensorId>> = vec![None; fragment.value_count()];
        for (slot, &input) in mapping.iter_mut().zip(&node.inputs) {
            *slot = Some(input);
        }
        let mut aliased = Vec::new();
        for (&value, &original) in fragment.outputs().iter().zip(&node.outputs) {
            match mapping[value.index()] {
                None => mapping[value.index()] = Some(original),
                Some(_) => aliased.push((original, value)),
            }
        }

        self.detach_node(old);

        let mut ids = Vec::with_capacity(mapping.len());
        for (slot, value) in mapping.into_iter().zip(fragment.values()) {
            let id = match slot {
                Some(id) => id,
                None => self.push_tensor(TensorDesc::from_spec(
                    format!("{}/{}", node.name, value.name),
                    value.spec.clone(),
                )),
            };
            ids.push(id);
        }

        let mut inserted = Vec::with_capacity(fragment.nodes().len());
        for fnode in fragment.nodes() {
            let inputs = fnode.inputs.iter().map(|v| ids[v.index()]).collect();
            let outputs = fnode.outputs.iter().map(|v| ids[v.index()]).collect();
            inserted.push(self.insert_node(
                format!("{}/{}", node.name, fnode.name),
                fnode.op.clone(),
                inputs,
                outputs,
            ));
        }

        for (original, value) in aliased {
            self.redirect_consumers(original, ids[value.index()]);
            self.drop_tensor(original);
        }

        tracing::debug!(
            node = %node.name,
            kind = node.kind(),
            inserted = inserted.len(),
            "replaced operator with fragment"
        );
        Ok(inserted)
    }

    fn check_fragment_boundary(&self, node: &Node, fragment: &Fragment) -> Result<()> {
        let kind = node.kind();
        if fragment.input_count() != node.inputs.len() {
            return Err(Error::Decomposition(format!(
                "{kind} node '{}' has {} inputs but its fragment takes {}",
                node.name,
                node.inputs.len(),
                fragment.input_count()
            )));
        }
        for (i, &input) in node.inputs.iter().enumerate() {
            let expected = self.tensor(input)?.spec();
            let actual = &fragment.value(i)?.spec;
            if actual != expected {
                return Err(Error::Decomposition(format!(
                    "{kind} node '{}': fragment input {i} is {actual}, expected {expected}",
                    node.name
                )));
            }
        }

        if fragment.outputs().len() != node.outputs.len() {
            return Err(Error::Decomposition(format!(
                "{kind} node '{}' has {} outputs but its fragment produces {}",
                node.name,
                node.outputs.len(),
                fragment.outputs().len()
            )));
        }
        for (j, (&value, &output)) in fragment.outputs().iter().zip(&node.outputs).enumerate() {
            let expected = self.tensor(output)?.spec();
            let actual = &fragment.value(value.index())?.spec;
            if actual != expected {
                return Err(Error::Decomposition(format!(
                    "{kind} node '{}': fragment output {j} is {actual}, declared {expected}",
                    node.name
                )));
            }
        }
        Ok(())
    }

    /// Point input `index` of `node` at `tensor`.
    ///
    /// The new tensor must have the same spec as the one it replaces and must
    /// not be downstream of `node`.
    pub fn set_input(&mut self, node: NodeId, index: usize, tensor: TensorId) -> Result<()> {
        let current = self.node(node)?;
        let old = *current.inputs.get(index).ok_or_else(|| {
            Error::InvalidGraph(format!(
                "node '{}' has no input {index}",
                current.name
            ))
        })?;
        if old == tensor {
            return Ok(());
        }

        if !self.is_available(tensor) {
            return Err(Error::GraphConstruction(format!(
                "cannot rewire node '{}' to {tensor}: not a graph input or node output",
                current.name
            )));
        }
        let (old_spec, new_spec) = (self.tensor(old)?.spec(), self.tensor(tensor)?.spec());
        if old_spec != new_spec {
            return Err(Error::GraphConstruction(format!(
                "cannot rewire node '{}' input {index} from {old_spec} to {new_spec}",
                current.name
            )));
        }
        if let Some(producer) = self.tensor_producer(tensor) {
            if producer == node || has_path_connecting(&self.graph, node, producer, None) {
                return Err(Error::GraphConstruction(format!(
                    "rewiring node '{}' to {tensor} would create a cycle",
                    current.name
                )));
            }
        }

        if let Some(consumers) = self.consumers.get_mut(&old) {
            if let Some(pos) = consumers.iter().position(|&c| c == node) {
                consumers.remove(pos);
            }
        }
        self.consumers.entry(tensor).or_default().push(node);
        if let Some(n) = self.graph.node_weight_mut(node) {
            n.inputs[index] = tensor;
        }
        self.rebuild_in_edges(node);
        Ok(())
    }

    /// Insert a single-input, single-output operator on input `index` of
    /// `consumer`, returning the new node.
    ///
    /// The operator must preserve the tensor's spec.
    pub fn insert_on_edge(
        &mut self,
        consumer: NodeId,
        index: usize,
        op: Arc<dyn Operator>,
        name: impl Into<String>,
    ) -> Result<NodeId> {
        let node = self.node(consumer)?;
        let source = *node.inputs.get(index).ok_or_else(|| {
            Error::InvalidGraph(format!("node '{}' has no input {index}", node.name))
        })?;
        let spec = self.tensor(source)?.spec().clone();

        let inserted = self.add_operator(op, name, &[source], std::slice::from_ref(&spec))?;
        let tensor = self.node(inserted)?.outputs[0];
        self.set_input(consumer, index, tensor)?;
        Ok(inserted)
    }

    /// Fix the layout of a tensor. Layouts are write-once.
    pub fn fix_layout(&mut self, id: TensorId, pair: FormatStridePair) -> Result<()> {
        self.tensor_mut(id)?.fix_layout(pair)
    }

    // ── Graph queries ──

    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Check the structural invariants: acyclic, no dangling tensor
    /// references, producer table consistent, every output available.
    pub fn validate(&self) -> Result<()> {
        if !self.is_acyclic() {
            return Err(Error::InvalidGraph("graph contains a cycle".to_string()));
        }
        for (id, node) in self.nodes() {
            for &input in &node.inputs {
                if !self.is_available(input) {
                    return Err(Error::InvalidGraph(format!(
                        "node '{}' reads dangling tensor {input}",
                        node.name
                    )));
                }
            }
            for &output in &node.outputs {
                self.tensor(output)?;
                if self.tensor_producer(output) != Some(id) {
                    return Err(Error::InvalidGraph(format!(
                        "producer table disagrees with node '{}' about {output}",
                        node.name
                    )));
                }
            }
        }
        for &output in &self.outputs {
            if !self.is_available(output) {
                return Err(Error::InvalidGraph(format!(
                    "graph output {output} is not produced"
                )));
            }
        }
        Ok(())
    }

    /// Nodes in dependency order, producers before consumers.
    ///
    /// Ready nodes are yielded in insertion order, so the order is
    /// deterministic for a given construction sequence.
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(self)
    }

    // ── Internal bookkeeping ──

    fn push_tensor(&mut self, desc: TensorDesc) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(Some(desc));
        id
    }

    fn drop_tensor(&mut self, id: TensorId) {
        if let Some(slot) = self.tensors.get_mut(id.0) {
            *slot = None;
        }
        self.producer.remove(&id);
        self.consumers.remove(&id);
        self.outputs.retain(|&o| o != id);
    }

    fn insert_node(
        &mut self,
        name: String,
        op: Arc<dyn Operator>,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> NodeId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let node_id = self.graph.add_node(Node {
            name,
            op,
            inputs: inputs.clone(),
            outputs: outputs.clone(),
            seq,
        });

        for &output in &outputs {
            self.producer.insert(output, node_id);
            let consumers = self.consumers.get(&output).cloned().unwrap_or_default();
            for consumer in consumers {
                self.graph.add_edge(node_id, consumer, ());
            }
        }
        for &input in &inputs {
            self.consumers.entry(input).or_default().push(node_id);
            if let Some(&producer) = self.producer.get(&input) {
                self.graph.add_edge(producer, node_id, ());
            }
        }
        node_id
    }

    fn detach_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.graph.remove_node(id)?;
        for output in &node.outputs {
            self.producer.remove(output);
        }
        for input in &node.inputs {
            if let Some(consumers) = self.consumers.get_mut(input) {
                consumers.retain(|&c| c != id);
            }
        }
        Some(node)
    }

    /// Move every consumer of `from` (and graph-output entries) onto `to`.
    fn redirect_consumers(&mut self, from: TensorId, to: TensorId) {
        let mut consumers = self.consumers.remove(&from).unwrap_or_default();
        for &consumer in &consumers {
            if let Some(node) = self.graph.node_weight_mut(consumer) {
                for input in node.inputs.iter_mut().filter(|t| **t == from) {
                    *input = to;
                }
            }
        }
        self.consumers.entry(to).or_default().extend(consumers.iter().copied());

        consumers.sort();
        consumers.dedup();
        for consumer in consumers {
            self.rebuild_in_edges(consumer);
        }

        for output in self.outputs.iter_mut().filter(|o| **o == from) {
            *output = to;
        }
        let mut seen = Vec::with_capacity(self.outputs.len());
        self.outputs.retain(|o| {
            let fresh = !seen.contains(o);
            seen.push(*o);
            fresh
        });
    }

    fn rebuild_in_edges(&mut self, id: NodeId) {
        let stale: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        let inputs = match self.graph.node_weight(id) {
            Some(node) => node.inputs.clone(),
            None => return,
        };
        for input in inputs {
            if let Some(&producer) = self.producer.get(&input) {
                self.graph.add_edge(producer, id, ());
            }
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn format_specs(specs: &[TensorSpec]) -> String {
    specs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ──────────────────────────────── Node ───────────────────────────────────

/// An operator instance in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    op: Arc<dyn Operator>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    seq: u64,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        self.op.kind()
    }

    pub fn op(&self) -> &Arc<dyn Operator> {
        &self.op
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// Insertion sequence number, unique within a graph.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_composite(&self) -> bool {
        self.op.is_composite()
    }
}

// ─────────────────────────── TopologicalOrder ────────────────────────────

/// Lazy topological walk over a graph (Kahn's algorithm).
///
/// Finite and single-use: once exhausted it stays exhausted. Among nodes
/// that are ready at the same time, the one inserted first comes first.
pub struct TopologicalOrder<'g> {
    graph: &'g StableGraph<Node, ()>,
    pending: HashMap<NodeId, usize>,
    ready: BinaryHeap<Reverse<(u64, NodeId)>>,
}

impl<'g> TopologicalOrder<'g> {
    fn new(graph: &'g Graph) -> Self {
        let graph = &graph.graph;
        let mut pending = HashMap::new();
        let mut ready = BinaryHeap::new();
        for id in graph.node_indices() {
            let degree = graph.neighbors_directed(id, Direction::Incoming).count();
            if degree == 0 {
                ready.push(Reverse((graph[id].seq, id)));
            } else {
                pending.insert(id, degree);
            }
        }
        Self {
            graph,
            pending,
            ready,
        }
    }
}

impl Iterator for TopologicalOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let Reverse((_, id)) = self.ready.pop()?;
        for succ in self.graph.neighbors_directed(id, Direction::Outgoing) {
            if let Some(remaining) = self.pending.get_mut(&succ) {
                *remaining -= 1;
                if *remaining == 0 {
                    self.pending.remove(&succ);
                    self.ready.push(Reverse((self.graph[succ].seq, succ)));
                }
            }
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentBuilder;
    use crate::testing::{MockElementwise, MockUnsqueeze};

    fn spec(shape: &[usize]) -> TensorSpec {
        TensorSpec::new(DataType::F32, shape.to_vec())
    }

    /// x -> a -> b -> out, with a composite in the middle.
    fn chain() -> (Graph, TensorId, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![2, 3]);
        let a = graph
            .add_operator(MockElementwise::unary("A"), "a", &[x], &[spec(&[2, 3])])
            .unwrap();
        let a_out = graph.node(a).unwrap().outputs()[0];
        let b = graph
            .add_operator(MockElementwise::composite("B"), "b", &[a_out], &[spec(&[2, 3])])
            .unwrap();
        let b_out = graph.node(b).unwrap().outputs()[0];
        let c = graph
            .add_operator(MockElementwise::unary("C"), "c", &[b_out], &[spec(&[2, 3])])
            .unwrap();
        let c_out = graph.node(c).unwrap().outputs()[0];
        graph.mark_output(c_out).unwrap();
        (graph, x, a, b, c)
    }

    #[test]
    fn test_create_empty_graph() {
        let graph = Graph::new();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.tensor_count(), 0);
        assert_eq!(graph.topological_order().count(), 0);
    }

    #[test]
    fn test_add_operator() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![1, 2]);
        let node_id = graph
            .add_operator(MockElementwise::unary("Relu"), "relu", &[x], &[spec(&[1, 2])])
            .unwrap();

        let node = graph.node(node_id).unwrap();
        assert_eq!(node.kind(), "Relu");
        let out = node.outputs()[0];
        assert_eq!(graph.tensor(out).unwrap().name(), "relu:0");
        assert_eq!(graph.tensor_producer(out), Some(node_id));
        assert_eq!(graph.tensor_consumers(x), vec![node_id]);
    }

    #[test]
    fn test_add_operator_dangling_input() {
        let mut graph = Graph::new();
        let result = graph.add_operator(
            MockElementwise::unary("Relu"),
            "relu",
            &[TensorId(7)],
            &[spec(&[1])],
        );
        assert!(matches!(result, Err(Error::GraphConstruction(_))));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.tensor_count(), 0);
    }

    #[test]
    fn test_add_operator_declared_output_mismatch() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![2, 3]);
        let result =
            graph.add_operator(MockElementwise::unary("Relu"), "relu", &[x], &[spec(&[3, 2])]);
        assert!(matches!(result, Err(Error::GraphConstruction(_))));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.tensor_count(), 1);
    }

    #[test]
    fn test_add_operator_arity_checked() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![2]);
        let result = graph.add_operator_inferred(MockElementwise::binary("Add"), "add", &[x]);
        assert!(matches!(result, Err(Error::GraphConstruction(_))));
    }

    #[test]
    fn test_topological_order() {
        let (graph, _, a, b, c) = chain();
        let order: Vec<_> = graph.topological_order().collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_topological_order_breaks_ties_by_insertion() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![4]);
        let ids: Vec<_> = ["p", "q", "r"]
            .iter()
            .map(|n| {
                graph
                    .add_operator_inferred(MockElementwise::unary("U"), *n, &[x])
                    .unwrap()
            })
            .collect();
        let order: Vec<_> = graph.topological_order().collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_topological_order_is_lazy_and_single_use() {
        let (graph, ..) = chain();
        let mut order = graph.topological_order();
        assert!(order.next().is_some());
        assert_eq!(order.by_ref().count(), 2);
        assert_eq!(order.next(), None);
    }

    #[test]
    fn test_composite_nodes() {
        let (graph, _, _, b, _) = chain();
        assert_eq!(graph.composite_nodes(), vec![b]);
    }

    #[test]
    fn test_replace_operator_preserves_output_identity() {
        let (mut graph, _, a, b, c) = chain();
        let b_out = graph.node(b).unwrap().outputs()[0];

        let ctx = crate::context::DecomposeCtx::new(&graph, b).unwrap();
        let fragment = graph.node(b).unwrap().op().decompose(&ctx).unwrap();
        let inserted = graph.replace_operator(b, fragment).unwrap();

        assert_eq!(inserted.len(), 1);
        assert!(graph.node(b).is_err());
        assert_eq!(graph.tensor_producer(b_out), Some(inserted[0]));
        assert_eq!(graph.tensor_consumers(b_out), vec![c]);
        assert!(graph.composite_nodes().is_empty());
        assert_eq!(
            graph.topological_order().collect::<Vec<_>>(),
            vec![a, inserted[0], c]
        );
        graph.validate().unwrap();
    }

    #[test]
    fn test_replace_operator_alias_rewires_consumers() {
        let (mut graph, _, a, b, c) = chain();
        let a_out = graph.node(a).unwrap().outputs()[0];
        let b_out = graph.node(b).unwrap().outputs()[0];
        let live_before = graph.tensor_count();

        // Identity fragment: output is the fragment's own input.
        let builder = FragmentBuilder::new(&[spec(&[2, 3])]);
        let input = builder.input(0).unwrap();
        let fragment = builder.finish(&[input]).unwrap();
        let inserted = graph.replace_operator(b, fragment).unwrap();

        assert!(inserted.is_empty());
        assert!(graph.tensor(b_out).is_err());
        assert_eq!(graph.tensor_count(), live_before - 1);
        assert_eq!(graph.node(c).unwrap().inputs(), &[a_out]);
        assert_eq!(graph.tensor_consumers(a_out), vec![c]);
        graph.validate().unwrap();
    }

    #[test]
    fn test_replace_operator_alias_updates_graph_outputs() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![2]);
        let n = graph
            .add_operator_inferred(MockElementwise::composite("Id"), "id", &[x])
            .unwrap();
        let out = graph.node(n).unwrap().outputs()[0];
        graph.mark_output(out).unwrap();

        let builder = FragmentBuilder::new(&[spec(&[2])]);
        let input = builder.input(0).unwrap();
        graph
            .replace_operator(n, builder.finish(&[input]).unwrap())
            .unwrap();

        assert_eq!(graph.outputs(), &[x]);
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_replace_operator_shape_mismatch_leaves_graph_unchanged() {
        let (mut graph, _, _, b, _) = chain();
        let before = format!("{:?}", graph);

        let mut builder = FragmentBuilder::new(&[spec(&[2, 3])]);
        let input = builder.input(0).unwrap();
        let wide = builder.push(MockUnsqueeze, &[input]).unwrap();
        let fragment = builder.finish(&[wide]).unwrap();

        let result = graph.replace_operator(b, fragment);
        assert!(matches!(result, Err(Error::Decomposition(_))));
        assert_eq!(format!("{:?}", graph), before);
    }

    #[test]
    fn test_replace_operator_input_count_mismatch() {
        let (mut graph, _, _, b, _) = chain();
        let builder = FragmentBuilder::new(&[spec(&[2, 3]), spec(&[2, 3])]);
        let input = builder.input(0).unwrap();
        let result = graph.replace_operator(b, builder.finish(&[input]).unwrap());
        assert!(matches!(result, Err(Error::Decomposition(_))));
        assert!(graph.node(b).is_ok());
    }

    #[test]
    fn test_set_input_rejects_cycle() {
        let (mut graph, _, a, _, c) = chain();
        let c_out = graph.node(c).unwrap().outputs()[0];
        let result = graph.set_input(a, 0, c_out);
        assert!(matches!(result, Err(Error::GraphConstruction(_))));
        assert!(graph.is_acyclic());
    }

    #[test]
    fn test_insert_on_edge() {
        let (mut graph, _, a, b, _) = chain();
        let a_out = graph.node(a).unwrap().outputs()[0];

        let inserted = graph
            .insert_on_edge(b, 0, MockElementwise::unary("Copy"), "copy")
            .unwrap();
        let copy_out = graph.node(inserted).unwrap().outputs()[0];

        assert_eq!(graph.node(b).unwrap().inputs(), &[copy_out]);
        assert_eq!(graph.tensor_consumers(a_out), vec![inserted]);
        let order: Vec<_> = graph.topological_order().collect();
        let pos = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(a) < pos(inserted) && pos(inserted) < pos(b));
    }

    #[test]
    fn test_remove_operator() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![2]);
        let n = graph
            .add_operator_inferred(MockElementwise::unary("Neg"), "neg", &[x])
            .unwrap();
        let out = graph.node(n).unwrap().outputs()[0];

        graph.remove_operator(n).unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(graph.tensor(out).is_err());
        assert!(graph.tensor_consumers(x).is_empty());
    }

    #[test]
    fn test_remove_operator_in_use() {
        let (mut graph, _, a, ..) = chain();
        assert!(matches!(
            graph.remove_operator(a),
            Err(Error::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_fix_layout_via_graph() {
        let (mut graph, x, ..) = chain();
        graph
            .fix_layout(x, FormatStridePair::row_major(&[2, 3]))
            .unwrap();
        assert!(matches!(
            graph.fix_layout(x, FormatStridePair::row_major(&[2, 3])),
            Err(Error::LayoutAlreadyFixed(_))
        ));
    }

    #[test]
    fn test_graph_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Graph>();
    }
}

//! Common test utilities for compiler integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{
    Attributes, DataType, DecomposeCtx, Fragment, Graph, LAYOUT_CONVERT, NegotiateCtx,
    Negotiation, NodeId, Operator, Result, TensorId, TensorSpec,
};
use tessera_operators::core_operator_registry;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_test_writer()
        .try_init();
}

/// Build an operator of `kind` through the core registry.
pub fn create(kind: &str, attrs: &Attributes) -> Arc<dyn Operator> {
    core_operator_registry().create(kind, attrs).unwrap()
}

/// Append `kind(inputs)` to `graph` and return its first output.
pub fn push(graph: &mut Graph, kind: &str, attrs: &Attributes, inputs: &[TensorId]) -> TensorId {
    let name = format!("{}_{}", kind.to_lowercase(), graph.node_count());
    let node = graph
        .add_operator_inferred(create(kind, attrs), name, inputs)
        .unwrap();
    graph.node(node).unwrap().outputs()[0]
}

/// x[4, 8] -> Gelu -> y
pub fn gelu_graph(approximate: &str) -> (Graph, TensorId, TensorId) {
    let mut graph = Graph::new();
    let x = graph.add_input("x", DataType::F32, vec![4, 8]);
    let y = push(
        &mut graph,
        "Gelu",
        &Attributes::new().with("approximate", approximate),
        &[x],
    );
    graph.mark_output(y).unwrap();
    (graph, x, y)
}

/// Number of `LayoutConvert` nodes in `graph`.
pub fn conversion_count(graph: &Graph) -> usize {
    graph
        .nodes()
        .filter(|(_, node)| node.kind() == LAYOUT_CONVERT)
        .count()
}

/// Evaluate `graph` and return the buffer of `output`.
pub fn run(graph: &Graph, inputs: &[(TensorId, Vec<f32>)], output: TensorId) -> Vec<f32> {
    let inputs: HashMap<TensorId, Vec<f32>> = inputs.iter().cloned().collect();
    let mut values = tessera_core::eval::evaluate(graph, &inputs).unwrap();
    values.remove(&output).unwrap()
}

/// Position of every node in `order`.
pub fn positions(order: &[NodeId]) -> HashMap<NodeId, usize> {
    order.iter().enumerate().map(|(i, &id)| (id, i)).collect()
}

// ──────────────────────────── Test operators ─────────────────────────────

/// Prepends a unit axis: `[d..] -> [1, d..]`.
#[derive(Debug)]
pub struct Unsqueeze;

impl Operator for Unsqueeze {
    fn kind(&self) -> &str {
        "Unsqueeze"
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        let mut shape = vec![1];
        shape.extend_from_slice(&inputs[0].shape);
        Ok(vec![TensorSpec::new(inputs[0].dtype, shape)])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        ctx.passthrough()
    }
}

/// Composite whose fragment produces a tensor one rank too high.
#[derive(Debug)]
pub struct RankRaising;

impl Operator for RankRaising {
    fn kind(&self) -> &str {
        "RankRaising"
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        Ok(vec![inputs[0].clone()])
    }

    fn decompose(&self, ctx: &DecomposeCtx) -> Result<Fragment> {
        let mut b = ctx.builder()?;
        let x = b.input(0)?;
        let y = b.push(Unsqueeze, &[x])?;
        b.finish(&[y])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        ctx.passthrough()
    }
}

//! Common test utilities for operator tests.
//!
//! Graph builders plus a minimal lowering loop, so operator tests do not
//! depend on the compiler crate.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{
    Attributes, DataType, DecomposeCtx, Graph, NodeId, Operator, Result, TensorId,
};
use tessera_operators::core_operator_registry;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Build an operator of `kind` through the core registry.
pub fn create(kind: &str, attrs: &Attributes) -> Arc<dyn Operator> {
    core_operator_registry().create(kind, attrs).unwrap()
}

/// Create a single-input graph for unary operations.
///
/// Graph structure:
/// - Input: x:[f32;shape]
/// - Operation: op(x) -> y
/// - Output: y
pub fn make_unary_graph(op: Arc<dyn Operator>, shape: &[usize]) -> (Graph, TensorId, TensorId) {
    let mut graph = Graph::new();
    let x = graph.add_input("x", DataType::F32, shape.to_vec());
    let node = graph.add_operator_inferred(op, "op", &[x]).unwrap();
    let y = graph.node(node).unwrap().outputs()[0];
    graph.mark_output(y).unwrap();
    (graph, x, y)
}

/// Create a two-input graph.
///
/// Graph structure:
/// - Inputs: a:[f32;a_shape], b:[f32;b_shape]
/// - Operation: op(a, b) -> c
/// - Output: c
pub fn make_binary_graph(
    op: Arc<dyn Operator>,
    a_shape: &[usize],
    b_shape: &[usize],
) -> (Graph, [TensorId; 2], TensorId) {
    let mut graph = Graph::new();
    let a = graph.add_input("a", DataType::F32, a_shape.to_vec());
    let b = graph.add_input("b", DataType::F32, b_shape.to_vec());
    let node = graph.add_operator_inferred(op, "op", &[a, b]).unwrap();
    let c = graph.node(node).unwrap().outputs()[0];
    graph.mark_output(c).unwrap();
    (graph, [a, b], c)
}

/// Decompose composite nodes until none remain.
pub fn lower(graph: &mut Graph) -> Result<()> {
    for _ in 0..16 {
        let composites: Vec<NodeId> = graph.composite_nodes();
        if composites.is_empty() {
            return Ok(());
        }
        for id in composites {
            let fragment = {
                let ctx = DecomposeCtx::new(graph, id)?;
                graph.node(id)?.op().decompose(&ctx)?
            };
            graph.replace_operator(id, fragment)?;
        }
    }
    Err(tessera_core::Error::Decomposition(
        "lowering did not converge".to_string(),
    ))
}

/// Evaluate `graph` and return the buffer of `output`.
pub fn run(graph: &Graph, inputs: &[(TensorId, Vec<f32>)], output: TensorId) -> Vec<f32> {
    let inputs: HashMap<TensorId, Vec<f32>> = inputs.iter().cloned().collect();
    let mut values = tessera_core::eval::evaluate(graph, &inputs).unwrap();
    values.remove(&output).unwrap()
}

/// Closed-form exact GELU.
pub fn gelu_exact(x: f32) -> f32 {
    0.5 * x * (1.0 + libm::erff(x / std::f32::consts::SQRT_2))
}

/// Closed-form tanh-approximated GELU.
pub fn gelu_tanh(x: f32) -> f32 {
    let c = (2.0 / std::f32::consts::PI).sqrt();
    0.5 * x * (1.0 + (c * (x + 0.044715 * x.powi(3))).tanh())
}

pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {i}: got {a}, expected {e}"
        );
    }
}

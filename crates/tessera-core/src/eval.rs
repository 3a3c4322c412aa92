//! Reference evaluator: runs `Operator::evaluate` over a graph.
//!
//! Buffers are logical row-major f32 regardless of the negotiated layouts;
//! layout conversions evaluate as identities. This is for checking rewrites,
//! not for speed.

use crate::context::EvalCtx;
use crate::ir::{Graph, TensorId};
use crate::{Error, Result};
use std::collections::HashMap;

/// Evaluate `graph` on the given input buffers.
///
/// Returns the buffer of every tensor computed, graph inputs included.
///
/// # Errors
///
/// Returns `Error::Evaluation` if an input is missing or has the wrong
/// length, or if an operator has no reference evaluation (composite
/// operators never do).
#[tracing::instrument(skip_all, fields(nodes = graph.node_count()))]
pub fn evaluate(
    graph: &Graph,
    inputs: &HashMap<TensorId, Vec<f32>>,
) -> Result<HashMap<TensorId, Vec<f32>>> {
    let mut values: HashMap<TensorId, Vec<f32>> = HashMap::new();
    for &id in graph.inputs() {
        let desc = graph.tensor(id)?;
        let data = inputs.get(&id).ok_or_else(|| {
            Error::Evaluation(format!("no value supplied for input '{}'", desc.name()))
        })?;
        if data.len() != desc.numel() {
            return Err(Error::Evaluation(format!(
                "input '{}' has {} elements, expected {}",
                desc.name(),
                data.len(),
                desc.numel()
            )));
        }
        values.insert(id, data.clone());
    }

    for node_id in graph.topological_order() {
        let node = graph.node(node_id)?;
        let outputs = {
            let buffers = node
                .inputs()
                .iter()
                .map(|id| {
                    values.get(id).map(Vec::as_slice).ok_or_else(|| {
                        Error::Evaluation(format!("{id} has not been computed"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let ctx = EvalCtx::new(graph, node, buffers);
            node.op().evaluate(&ctx)?
        };

        if outputs.len() != node.outputs().len() {
            return Err(Error::Evaluation(format!(
                "{} node '{}' returned {} buffers for {} outputs",
                node.kind(),
                node.name(),
                outputs.len(),
                node.outputs().len()
            )));
        }
        for (&id, data) in node.outputs().iter().zip(outputs) {
            let expected = graph.tensor(id)?.numel();
            if data.len() != expected {
                return Err(Error::Evaluation(format!(
                    "{} node '{}' produced {} elements for {id}, expected {expected}",
                    node.kind(),
                    node.name(),
                    data.len()
                )));
            }
            values.insert(id, data);
        }
        tracing::trace!(node = node.name(), kind = node.kind(), "evaluated");
    }

    Ok(values)
}

//! Compilation output handed to the code generator.
//!
//! A `CompiledGraph` is a fully decomposed graph in which every tensor has a
//! fixed layout. The code generator walks `operations()` in order and emits
//! one kernel per planned op.

use crate::ir::{Graph, NodeId, TensorId};
use crate::layout::FormatStridePair;
use crate::target::TargetDescriptor;
use crate::types::TensorSpec;
use crate::{Error, Result};
use std::sync::Arc;

/// A compiled graph ready for code generation.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    graph: Graph,
    target: Arc<TargetDescriptor>,
}

impl CompiledGraph {
    /// Wrap a negotiated graph. Callers are expected to have verified it.
    pub fn new(graph: Graph, target: Arc<TargetDescriptor>) -> Self {
        Self { graph, target }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Target the layouts were negotiated for.
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    /// Planned operations in topological order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidGraph` if a tensor has no fixed layout.
    pub fn operations(&self) -> Result<Vec<PlannedOp>> {
        self.graph
            .topological_order()
            .map(|id| {
                let node = self.graph.node(id)?;
                Ok(PlannedOp {
                    node: id,
                    name: node.name().to_string(),
                    kind: node.kind().to_string(),
                    inputs: self.tensor_refs(node.inputs())?,
                    outputs: self.tensor_refs(node.outputs())?,
                })
            })
            .collect()
    }

    fn tensor_refs(&self, ids: &[TensorId]) -> Result<Vec<TensorRef>> {
        ids.iter()
            .map(|&id| {
                let desc = self.graph.tensor(id)?;
                let layout = desc.fixed_layout().cloned().ok_or_else(|| {
                    Error::InvalidGraph(format!(
                        "tensor '{}' ({id}) has no fixed layout",
                        desc.name()
                    ))
                })?;
                Ok(TensorRef {
                    id,
                    spec: desc.spec().clone(),
                    layout,
                })
            })
            .collect()
    }
}

/// A single planned operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOp {
    pub node: NodeId,

    /// Node name (for debugging/profiling).
    pub name: String,

    pub kind: String,
    pub inputs: Vec<TensorRef>,
    pub outputs: Vec<TensorRef>,
}

/// Tensor as seen by the code generator: identity, spec, fixed layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRef {
    pub id: TensorId,
    pub spec: TensorSpec,
    pub layout: FormatStridePair,
}

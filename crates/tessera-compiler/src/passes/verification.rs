//! Post-negotiation verification.

use std::sync::Arc;
use tessera_core::{Error, Graph, LAYOUT_CONVERT, Pass, Result, Stage, TargetDescriptor};

/// Check the invariants the code generator relies on.
///
/// The graph must be acyclic with no dangling references, contain no
/// composite node, have every tensor fixed to a layout `target` supports,
/// produce every graph output, and never chain two conversions on one edge.
pub fn verify_graph(graph: &Graph, target: &TargetDescriptor) -> Result<()> {
    graph.validate()?;

    if let Some(&id) = graph.composite_nodes().first() {
        let node = graph.node(id)?;
        return Err(Error::InvalidGraph(format!(
            "composite {} node '{}' survived lowering",
            node.kind(),
            node.name()
        )));
    }

    for (id, desc) in graph.tensors() {
        let layout = desc.fixed_layout().ok_or_else(|| {
            Error::InvalidGraph(format!("tensor '{}' ({id}) has no fixed layout", desc.name()))
        })?;
        if !target.supports(layout, desc.dtype(), desc.shape()) {
            return Err(Error::UnsupportedFormat(format!(
                "tensor '{}' is stored as {layout}, which target '{}' does not support",
                desc.name(),
                target.name
            )));
        }
    }

    for (_, node) in graph.nodes() {
        if node.kind() != LAYOUT_CONVERT {
            continue;
        }
        for &input in node.inputs() {
            let chained = graph
                .tensor_producer(input)
                .and_then(|producer| graph.node(producer).ok())
                .is_some_and(|producer| producer.kind() == LAYOUT_CONVERT);
            if chained {
                return Err(Error::InvalidGraph(format!(
                    "conversion '{}' reads the output of another conversion",
                    node.name()
                )));
            }
        }
    }

    Ok(())
}

/// Pass wrapper around `verify_graph`. Never changes the graph.
pub struct VerificationPass {
    target: Arc<TargetDescriptor>,
}

impl VerificationPass {
    pub fn new(target: Arc<TargetDescriptor>) -> Self {
        Self { target }
    }
}

impl Pass for VerificationPass {
    fn name(&self) -> &str {
        "verification"
    }

    fn stage(&self) -> Stage {
        Stage::Verification
    }

    fn run(&self, graph: &mut Graph) -> Result<bool> {
        verify_graph(graph, &self.target)?;
        Ok(false)
    }
}

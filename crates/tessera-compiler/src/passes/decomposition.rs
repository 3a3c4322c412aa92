//! Decomposition (lowering) pass.
//!
//! Rewrites composite operators into primitives, round by round, until no
//! composite node remains.

use tessera_core::{DecomposeCtx, Error, Graph, NodeId, Pass, Result, Stage};

/// Default bound on lowering rounds.
pub const DEFAULT_MAX_DECOMPOSITION_DEPTH: usize = 16;

/// Pass that replaces every composite node with its decomposition.
///
/// Each round collects the composite nodes present at its start (in
/// insertion order), then decomposes and splices each one. Fragments may
/// contain further composites, which the next round picks up. The number of
/// rounds is bounded so that a self-referential decomposition fails instead
/// of looping.
pub struct DecompositionPass {
    max_depth: usize,
}

impl DecompositionPass {
    /// Create a decomposition pass allowing at most `max_depth` rounds.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decompose a single node and splice the result.
    fn lower_node(&self, graph: &mut Graph, id: NodeId) -> Result<()> {
        let fragment = {
            let ctx = DecomposeCtx::new(graph, id)?;
            let node = graph.node(id)?;
            tracing::debug!(node = node.name(), kind = node.kind(), "decomposing");
            node.op().decompose(&ctx)?
        };
        let primitives = fragment.nodes().len();
        let inserted = graph.replace_operator(id, fragment)?;
        tracing::trace!(primitives, inserted = inserted.len(), "spliced fragment");
        Ok(())
    }
}

impl Default for DecompositionPass {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECOMPOSITION_DEPTH)
    }
}

impl Pass for DecompositionPass {
    fn name(&self) -> &str {
        "decomposition"
    }

    fn stage(&self) -> Stage {
        Stage::Lowering
    }

    fn run(&self, graph: &mut Graph) -> Result<bool> {
        let mut rounds = 0;
        loop {
            // Collected up front: the graph is not mutated while iterating it.
            let composites = graph.composite_nodes();
            if composites.is_empty() {
                return Ok(rounds > 0);
            }
            if rounds == self.max_depth {
                let names = composites
                    .iter()
                    .filter_map(|&id| graph.node(id).ok())
                    .map(|node| format!("'{}' ({})", node.name(), node.kind()))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(Error::Decomposition(format!(
                    "composite operators remain after {} lowering rounds: {names}",
                    self.max_depth
                )));
            }

            rounds += 1;
            tracing::debug!(round = rounds, count = composites.len(), "lowering round");
            for id in composites {
                self.lower_node(graph, id)?;
            }
        }
    }
}

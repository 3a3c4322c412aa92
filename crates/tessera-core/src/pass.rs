//! Compiler pass trait and stage definitions.

use crate::Result;
use crate::ir::Graph;

/// Compilation stage for organizing passes.
///
/// Passes are grouped into stages and run in a fixed order. Within each stage,
/// passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Rewrite composite operators into primitives.
    Lowering,

    /// Graph rewriting on primitive graphs (fusion, dead code elimination).
    ///
    /// Runs before layouts are fixed, so passes here are free to restructure.
    Optimization,

    /// Fix a memory layout on every tensor, inserting conversions where
    /// producers and consumers disagree.
    Negotiation,

    /// Check the invariants the code generator relies on.
    Verification,
}

/// Trait for implementing compiler passes.
///
/// A pass is a graph transformation that runs during a specific compilation
/// stage. Passes are standalone objects (not owned by operators) so that
/// rewrites can span multiple operator kinds.
///
/// # Return Value
///
/// The `run()` method returns `Ok(true)` if the pass made changes to the
/// graph, or `Ok(false)` if no changes were made.
///
/// # Example
///
/// ```ignore
/// struct DeadCodeEliminationPass;
///
/// impl Pass for DeadCodeEliminationPass {
///     fn name(&self) -> &str {
///         "dead_code_elimination"
///     }
///
///     fn stage(&self) -> Stage {
///         Stage::Optimization
///     }
///
///     fn run(&self, graph: &mut Graph) -> Result<bool> {
///         let mut changed = false;
///         // Remove nodes whose outputs nobody reads...
///         Ok(changed)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Get the compilation stage this pass belongs to.
    fn stage(&self) -> Stage;

    /// Run the pass on the given graph.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if the pass made changes to the graph.
    /// * `Ok(false)` if no changes were made.
    /// * `Err(_)` if the pass encountered an error.
    fn run(&self, graph: &mut Graph) -> Result<bool>;
}

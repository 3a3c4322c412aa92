//! Lowering and layout compiler for Tessera.
//!
//! This crate takes a `tessera_core::Graph` of high-level operators and turns
//! it into a `CompiledGraph` the code generator can consume: only primitive
//! operators remain and every tensor has a fixed memory layout.
//!
//! The compiler is organized as a pipeline of passes that run in stages:
//! 1. **Lowering** - Decompose composite operators (e.g. GELU) into primitives
//! 2. **Optimization** - Graph rewrites on the primitive graph (custom passes)
//! 3. **Negotiation** - Fix a layout on every tensor, inserting conversions
//! 4. **Verification** - Check the invariants the code generator relies on
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_compiler::{CompilerPipeline, core_operator_registry};
//! use tessera_core::{Attributes, DataType, Graph, TargetDescriptor};
//!
//! # fn main() -> tessera_core::Result<()> {
//! let registry = core_operator_registry();
//! let mut graph = Graph::new();
//! let x = graph.add_input("x", DataType::F32, vec![4, 8]);
//! let gelu = registry.create("Gelu", &Attributes::new())?;
//! let node = graph.add_operator_inferred(gelu, "gelu", &[x])?;
//! let y = graph.node(node)?.outputs()[0];
//! graph.mark_output(y)?;
//!
//! let mut pipeline = CompilerPipeline::new(Arc::new(TargetDescriptor::avx2()));
//! let compiled = pipeline.compile(graph)?;
//!
//! println!("Compiled {} operations", compiled.operations()?.len());
//! # Ok(())
//! # }
//! ```

pub mod passes;
pub mod printer;

pub use passes::{
    DEFAULT_MAX_DECOMPOSITION_DEPTH, DecompositionPass, FormatNegotiationPass,
    NegotiationOptions, VerificationPass, verify_graph,
};
pub use printer::print_graph;

// Re-export commonly used types from tessera-core
pub use tessera_core::{CompiledGraph, Graph, Pass, Result, Stage, TargetDescriptor};
pub use tessera_operators::core_operator_registry;

use std::sync::Arc;

/// Pipeline-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Maximum number of lowering rounds before giving up.
    pub max_decomposition_depth: usize,

    /// Run the verification stage.
    pub verify: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_decomposition_depth: DEFAULT_MAX_DECOMPOSITION_DEPTH,
            verify: true,
        }
    }
}

/// Compiler pipeline with pluggable passes.
///
/// The pipeline runs in fixed stages: Lowering → Optimization → Negotiation →
/// Verification. Built-in passes are registered in their respective stages,
/// and custom passes can be added via `add_pass()`.
pub struct CompilerPipeline {
    /// All passes to run, ordered by (stage, registration order).
    passes: Vec<Box<dyn Pass>>,

    target: Arc<TargetDescriptor>,
}

impl CompilerPipeline {
    /// Create a pipeline with built-in passes and default options.
    ///
    /// The built-in passes are:
    /// - `DecompositionPass` (Lowering stage)
    /// - `FormatNegotiationPass` (Negotiation stage)
    /// - `VerificationPass` (Verification stage)
    ///
    /// The Optimization stage is empty by default. Custom passes can be added
    /// via `add_pass()`.
    pub fn new(target: Arc<TargetDescriptor>) -> Self {
        Self::with_options(target, CompileOptions::default(), NegotiationOptions::default())
    }

    /// Create a pipeline with explicit options.
    pub fn with_options(
        target: Arc<TargetDescriptor>,
        options: CompileOptions,
        negotiation: NegotiationOptions,
    ) -> Self {
        let mut pipeline = Self {
            passes: Vec::new(),
            target: target.clone(),
        };

        // Register built-in passes
        pipeline.add_pass(DecompositionPass::new(options.max_decomposition_depth));
        pipeline.add_pass(FormatNegotiationPass::with_options(
            target.clone(),
            negotiation,
        ));
        if options.verify {
            pipeline.add_pass(VerificationPass::new(target));
        }

        pipeline
    }

    /// Add a custom pass to the pipeline.
    ///
    /// The pass will be inserted into the appropriate stage (determined by
    /// `pass.stage()`). Within a stage, passes run in the order they were
    /// registered.
    ///
    /// # Returns
    ///
    /// Returns a mutable reference to self for method chaining.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Number of registered passes.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn target(&self) -> &Arc<TargetDescriptor> {
        &self.target
    }

    /// Run all passes in stage order and wrap the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the input graph is malformed or any pass fails.
    /// The graph is consumed either way.
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count(), num_tensors = graph.tensor_count(), target = %self.target.name))]
    pub fn compile(&mut self, mut graph: Graph) -> Result<CompiledGraph> {
        graph.validate()?;

        // Stable sort: registration order is kept within a stage.
        self.passes.sort_by_key(|p| p.stage());

        for pass in &self.passes {
            let _span =
                tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage()).entered();
            let changed = pass.run(&mut graph)?;
            tracing::debug!(changed, nodes = graph.node_count(), "pass finished");
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("compiled graph:\n{}", print_graph(&graph)?);
        }
        Ok(CompiledGraph::new(graph, self.target.clone()))
    }
}

/// Convenience function: creates a default pipeline and runs it.
///
/// # Errors
///
/// Returns an error if any pass fails.
#[tracing::instrument(skip_all)]
pub fn compile(graph: Graph, target: Arc<TargetDescriptor>) -> Result<CompiledGraph> {
    CompilerPipeline::new(target).compile(graph)
}

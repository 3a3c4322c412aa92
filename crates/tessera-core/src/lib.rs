//! Core intermediate representation, operator contract, and layout model for Tessera.
//!
//! This crate provides the foundational abstractions that the other Tessera crates depend on:
//! - Graph-based IR (`Graph`, `Node`, `TensorDesc`) with producer/consumer tables
//! - The `Operator` trait: shape inference, decomposition, format negotiation
//! - Decomposition fragments and the `replace_operator` splice
//! - Layout currency (`Format`, `FormatStridePair`) and the `TargetDescriptor`
//! - Operator registry keyed by kind name, `Pass` trait, reference evaluator

pub mod attributes;
pub mod broadcast;
pub mod context;
pub mod convert;
pub mod eval;
pub mod fragment;
pub mod ir;
pub mod layout;
pub mod operator;
pub mod pass;
pub mod plan;
pub mod registry;
pub mod target;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use attributes::{AttributeValue, Attributes};
pub use broadcast::broadcast_shape;
pub use context::{DecomposeCtx, EvalCtx, NegotiateCtx};
pub use convert::{LAYOUT_CONVERT, LayoutConvertOp};
pub use fragment::{Fragment, FragmentBuilder, FragmentValue};
pub use ir::{Graph, Node, NodeId, TensorId, TopologicalOrder};
pub use layout::{Format, FormatStridePair, Layout};
pub use operator::{Acceptance, Negotiation, Operator};
pub use pass::{Pass, Stage};
pub use plan::{CompiledGraph, PlannedOp, TensorRef};
pub use registry::{OperatorFactory, OperatorRegistry};
pub use target::TargetDescriptor;
pub use types::{DataType, TensorDesc, TensorSpec};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tessera-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Graph construction error: {0}")]
    GraphConstruction(String),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Layout already fixed: {0}")]
    LayoutAlreadyFixed(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

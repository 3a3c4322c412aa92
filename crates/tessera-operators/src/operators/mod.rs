//! Individual operator implementations that don't fit into families.
//!
//! These operators have unique logic that doesn't generalize well into families.

pub mod activation;
pub mod conv;
pub mod matmul;

// Re-export all operators
pub use activation::{Approximation, GeluBackwardOp, GeluConfig, GeluOp, ReluOp};
pub use conv::{Conv2dConfig, Conv2dOp};
pub use matmul::MatMulOp;

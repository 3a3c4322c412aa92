//! Collapsed operator families that eliminate code duplication.
//!
//! These families group similar operators together, implementing shared logic once
//! and parameterizing only the differences (kind name, evaluation function).

pub mod binary_elementwise;
pub mod scalar_elementwise;
pub mod unary_elementwise;

pub use binary_elementwise::BinaryElementwiseOp;
pub use scalar_elementwise::ScalarElementwiseOp;
pub use unary_elementwise::UnaryElementwiseOp;

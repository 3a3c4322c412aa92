//! Core operator set for Tessera.
//!
//! This crate provides the primitive and composite operators the compiler
//! understands, using collapsed operator families to share the common logic.
//!
//! # Operator Families
//!
//! - **Unary elementwise**: Erf, Tanh, Exp, Neg
//! - **Scalar elementwise**: MulScalar, AddScalar, PowScalar
//! - **Binary elementwise**: Add, Sub, Mul (NumPy broadcasting)
//!
//! # Individual Operators
//!
//! - Activation (Relu, and the composites Gelu and GeluBackward)
//! - Matrix operations (MatMul)
//! - Convolution (Conv2d)
//!
//! Layout conversion (`LayoutConvert`) lives in `tessera-core`, since the
//! negotiation engine inserts it on its own.

pub mod families;
pub mod operators;

mod helpers;
mod registry;

// Re-export operator types
pub use families::{BinaryElementwiseOp, ScalarElementwiseOp, UnaryElementwiseOp};
pub use operators::{
    Approximation, Conv2dConfig, Conv2dOp, GeluBackwardOp, GeluConfig, GeluOp, MatMulOp, ReluOp,
};
pub use registry::core_operator_registry;

/// Result type for operator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for operator configuration.
///
/// Converts into `tessera_core::Error` at the factory boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid {kind} configuration: {message}")]
    InvalidConfig { kind: &'static str, message: String },

    #[error("Unsupported GELU approximation: {0}")]
    UnsupportedApproximation(String),

    #[error(transparent)]
    Core(#[from] tessera_core::Error),
}

impl From<Error> for tessera_core::Error {
    fn from(error: Error) -> Self {
        let message = error.to_string();
        match error {
            Error::Core(inner) => inner,
            Error::UnsupportedApproximation(_) => tessera_core::Error::Decomposition(message),
            Error::InvalidConfig { .. } => tessera_core::Error::Attribute(message),
        }
    }
}

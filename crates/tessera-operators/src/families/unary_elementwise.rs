//! Unary elementwise operator family.
//!
//! Covers: Erf, Tanh, Exp, Neg

use tessera_core::{EvalCtx, NegotiateCtx, Negotiation, Operator, Result, TensorSpec};

use crate::helpers::{expect_float, expect_inputs};

/// Unary elementwise operator family.
///
/// All unary elementwise operations share the same structure:
/// - Identity shape inference (output spec = input spec)
/// - Layout-agnostic negotiation (any layout in, same layout out)
/// - Element-by-element reference evaluation
///
/// The only difference is the evaluation function.
#[derive(Debug, Clone, Copy)]
pub struct UnaryElementwiseOp {
    name: &'static str,
    eval_fn: fn(f32) -> f32,
}

impl UnaryElementwiseOp {
    /// Create an Erf operator.
    pub fn erf() -> Self {
        Self {
            name: "Erf",
            eval_fn: libm::erff,
        }
    }

    /// Create a Tanh operator.
    pub fn tanh() -> Self {
        Self {
            name: "Tanh",
            eval_fn: f32::tanh,
        }
    }

    /// Create an Exp operator.
    pub fn exp() -> Self {
        Self {
            name: "Exp",
            eval_fn: f32::exp,
        }
    }

    /// Create a Neg operator.
    pub fn neg() -> Self {
        Self {
            name: "Neg",
            eval_fn: |x| -x,
        }
    }
}

impl Operator for UnaryElementwiseOp {
    fn kind(&self) -> &str {
        self.name
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        expect_inputs(self.name, inputs, 1)?;
        expect_float(self.name, inputs[0])?;
        Ok(vec![inputs[0].clone()])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        ctx.passthrough()
    }

    fn evaluate(&self, ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        ctx.unary_f32(self.eval_fn)
    }
}

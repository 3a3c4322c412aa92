//! Scalar elementwise operator family.
//!
//! Covers: MulScalar, AddScalar, PowScalar

use tessera_core::{Attributes, EvalCtx, NegotiateCtx, Negotiation, Operator, Result, TensorSpec};

use crate::helpers::{expect_float, expect_inputs};

/// Elementwise operation with a compile-time scalar operand.
///
/// The scalar comes from the `scalar` attribute. A missing attribute takes
/// the identity of the operation (1 for Mul and Pow, 0 for Add).
#[derive(Debug, Clone, Copy)]
pub struct ScalarElementwiseOp {
    name: &'static str,
    scalar: f32,
    eval_fn: fn(f32, f32) -> f32,
}

// `name` identifies `eval_fn`.
impl PartialEq for ScalarElementwiseOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.scalar == other.scalar
    }
}

impl ScalarElementwiseOp {
    /// `x * scalar`
    pub fn mul_scalar(scalar: f32) -> Self {
        Self {
            name: "MulScalar",
            scalar,
            eval_fn: |x, s| x * s,
        }
    }

    /// `x + scalar`
    pub fn add_scalar(scalar: f32) -> Self {
        Self {
            name: "AddScalar",
            scalar,
            eval_fn: |x, s| x + s,
        }
    }

    /// `x ^ scalar`
    pub fn pow_scalar(scalar: f32) -> Self {
        Self {
            name: "PowScalar",
            scalar,
            eval_fn: f32::powf,
        }
    }

    /// Build from an attribute map, for the registry.
    pub fn from_attributes(
        constructor: fn(f32) -> Self,
        identity: f32,
        attrs: &Attributes,
    ) -> Result<Self> {
        Ok(constructor(attrs.f32_or("scalar", identity)?))
    }

    pub fn scalar(&self) -> f32 {
        self.scalar
    }
}

impl Operator for ScalarElementwiseOp {
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
        let (f, s) = (self.eval_fn, self.scalar);
        ctx.unary_f32(|x| f(x, s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_eval_fn() {
        assert_eq!(
            ScalarElementwiseOp::mul_scalar(2.0),
            ScalarElementwiseOp::mul_scalar(2.0)
        );
        assert_ne!(
            ScalarElementwiseOp::mul_scalar(2.0),
            ScalarElementwiseOp::add_scalar(2.0)
        );
        assert_ne!(
            ScalarElementwiseOp::pow_scalar(2.0),
            ScalarElementwiseOp::pow_scalar(3.0)
        );
    }

    #[test]
    fn test_from_attributes_defaults() {
        let attrs = Attributes::new();
        let mul =
            ScalarElementwiseOp::from_attributes(ScalarElementwiseOp::mul_scalar, 1.0, &attrs)
                .unwrap();
        assert_eq!(mul.scalar(), 1.0);
        assert_eq!(mul.kind(), "MulScalar");

        let attrs = Attributes::new().with("scalar", 3.0f32);
        let pow =
            ScalarElementwiseOp::from_attributes(ScalarElementwiseOp::pow_scalar, 1.0, &attrs)
                .unwrap();
        assert_eq!(pow.scalar(), 3.0);
        assert_eq!((pow.eval_fn)(-2.0, pow.scalar()), -8.0);
    }

    #[test]
    fn test_from_attributes_wrong_type() {
        let attrs = Attributes::new().with("scalar", "half");
        assert!(
            ScalarElementwiseOp::from_attributes(ScalarElementwiseOp::add_scalar, 0.0, &attrs)
                .is_err()
        );
    }
}

//! Binary elementwise operator family.
//!
//! Covers: Add, Sub, Mul

use tessera_core::{
    Acceptance, EvalCtx, FormatStridePair, NegotiateCtx, Negotiation, Operator, Result,
    TensorSpec, broadcast_shape,
};

use crate::helpers::{common_dtype, expect_inputs};

/// Binary elementwise operator family.
///
/// All binary elementwise operations share the same structure:
/// - NumPy-style broadcasting for shape inference
/// - Element-by-element reference evaluation
///
/// Layouts: when both operands have the same shape the kernel walks them in
/// lockstep, so the second operand must match the first one's layout (any
/// layout will do). Broadcasting kernels index logically and want dense
/// row-major operands.
#[derive(Debug, Clone, Copy)]
pub struct BinaryElementwiseOp {
    name: &'static str,
    eval_fn: fn(f32, f32) -> f32,
}

impl BinaryElementwiseOp {
    /// Create an Add operator.
    pub fn add() -> Self {
        Self {
            name: "Add",
            eval_fn: |a, b| a + b,
        }
    }

    /// Create a Sub operator.
    pub fn sub() -> Self {
        Self {
            name: "Sub",
            eval_fn: |a, b| a - b,
        }
    }

    /// Create a Mul operator.
    pub fn mul() -> Self {
        Self {
            name: "Mul",
            eval_fn: |a, b| a * b,
        }
    }
}

impl Operator for BinaryElementwiseOp {
    fn kind(&self) -> &str {
        self.name
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        expect_inputs(self.name, inputs, 2)?;
        let dtype = common_dtype(self.name, inputs)?;
        let shape = broadcast_shape(&inputs[0].shape, &inputs[1].shape)?;
        Ok(vec![TensorSpec::new(dtype, shape)])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        let lhs = ctx.input(0)?;
        let rhs = ctx.input(1)?;

        if lhs.shape() == rhs.shape() {
            let shape = lhs.shape();
            let lhs_offered = ctx.offered(0)?;
            let rhs_acceptance = ctx.accept_if(
                1,
                |pair| lhs_offered.iter().any(|l| l.equivalent(pair, shape)),
                lhs_offered.to_vec(),
            )?;
            let mut outputs = lhs_offered.to_vec();
            let preferred = ctx.preferred_output(0)?;
            if !outputs.contains(&preferred) {
                outputs.push(preferred);
            }
            return Ok(Negotiation::new(
                vec![Acceptance::Accepted(lhs_offered.to_vec()), rhs_acceptance],
                vec![outputs],
            ));
        }

        let out_shape = ctx.output(0)?.shape();
        Ok(Negotiation::new(
            vec![ctx.accept_row_major(0)?, ctx.accept_row_major(1)?],
            vec![vec![FormatStridePair::row_major(out_shape)]],
        ))
    }

    fn evaluate(&self, ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        ctx.binary_f32(self.eval_fn)
    }
}

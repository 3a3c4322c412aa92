//! Layout conversion primitive inserted by format negotiation.

use crate::context::{EvalCtx, NegotiateCtx};
use crate::layout::FormatStridePair;
use crate::operator::{Negotiation, Operator};
use crate::types::TensorSpec;
use crate::{Error, Result};

/// Operator kind of `LayoutConvertOp`.
pub const LAYOUT_CONVERT: &str = "LayoutConvert";

/// Pure data movement: same dtype and shape in and out, output stored in
/// `target` layout. Reads its input in whatever layout it has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutConvertOp {
    target: FormatStridePair,
}

impl LayoutConvertOp {
    pub fn new(target: FormatStridePair) -> Self {
        Self { target }
    }

    /// Layout the output is stored in.
    pub fn target(&self) -> &FormatStridePair {
        &self.target
    }
}

impl Operator for LayoutConvertOp {
    fn kind(&self) -> &str {
        LAYOUT_CONVERT
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        let [input] = inputs else {
            return Err(Error::GraphConstruction(format!(
                "{LAYOUT_CONVERT} expects 1 input, got {}",
                inputs.len()
            )));
        };
        self.target.validate(&input.shape)?;
        Ok(vec![(*input).clone()])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        Ok(Negotiation::new(
            vec![ctx.accept_all(0)?],
            vec![vec![self.target.clone()]],
        ))
    }

    fn evaluate(&self, ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        Ok(vec![ctx.input(0)?.to_vec()])
    }
}

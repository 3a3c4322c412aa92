//! Mock operators shared by the unit tests of this crate.

use crate::broadcast::broadcast_shape;
use crate::context::{DecomposeCtx, EvalCtx, NegotiateCtx};
use crate::fragment::Fragment;
use crate::operator::{Negotiation, Operator};
use crate::types::TensorSpec;
use crate::{Error, Result};
use std::sync::Arc;

/// Layout-agnostic elementwise mock. Evaluates as the sum of its inputs.
///
/// The composite flavour decomposes into the primitive flavour of the same
/// arity.
#[derive(Debug)]
pub(crate) struct MockElementwise {
    kind: &'static str,
    arity: usize,
    composite: bool,
}

impl MockElementwise {
    pub(crate) fn unary(kind: &'static str) -> Arc<dyn Operator> {
        Arc::new(Self {
            kind,
            arity: 1,
            composite: false,
        })
    }

    pub(crate) fn binary(kind: &'static str) -> Arc<dyn Operator> {
        Arc::new(Self {
            kind,
            arity: 2,
            composite: false,
        })
    }

    pub(crate) fn composite(kind: &'static str) -> Arc<dyn Operator> {
        Arc::new(Self {
            kind,
            arity: 1,
            composite: true,
        })
    }
}

impl Operator for MockElementwise {
    fn kind(&self) -> &str {
        self.kind
    }

    fn is_composite(&self) -> bool {
        self.composite
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        if inputs.len() != self.arity {
            return Err(Error::GraphConstruction(format!(
                "{} expects {} inputs, got {}",
                self.kind,
                self.arity,
                inputs.len()
            )));
        }
        let mut shape = inputs[0].shape.clone();
        for spec in &inputs[1..] {
            shape = broadcast_shape(&shape, &spec.shape)?;
        }
        Ok(vec![TensorSpec::new(inputs[0].dtype, shape)])
    }

    fn decompose(&self, ctx: &DecomposeCtx) -> Result<Fragment> {
        if !self.composite {
            return ctx.identity();
        }
        let mut builder = ctx.builder()?;
        let x = builder.input(0)?;
        let outputs = builder.push_shared(MockElementwise::unary("Lowered"), &[x])?;
        builder.finish(&outputs)
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        ctx.passthrough()
    }

    fn evaluate(&self, ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        if self.arity == 1 {
            ctx.unary_f32(|x| x)
        } else {
            ctx.binary_f32(|x, y| x + y)
        }
    }
}

/// Prepends a unit axis. Used to provoke rank mismatches.
#[derive(Debug)]
pub(crate) struct MockUnsqueeze;

impl Operator for MockUnsqueeze {
    fn kind(&self) -> &str {
        "Unsqueeze"
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        let mut shape = vec![1];
        shape.extend_from_slice(&inputs[0].shape);
        Ok(vec![TensorSpec::new(inputs[0].dtype, shape)])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        ctx.passthrough()
    }
}

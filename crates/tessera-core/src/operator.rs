//! Operator trait: the capability set every operator kind implements.

use crate::context::{DecomposeCtx, EvalCtx, NegotiateCtx};
use crate::fragment::Fragment;
use crate::layout::FormatStridePair;
use crate::types::TensorSpec;
use crate::{Error, Result};
use std::fmt;

/// Trait for implementing tensor operators.
///
/// An operator instance carries its typed configuration (parsed from an
/// attribute map by its factory) and answers four questions for the
/// compiler: what it produces, how it lowers to primitives, which memory
/// layouts it works with, and how to compute it for reference.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug)]
/// struct NegOp;
///
/// impl Operator for NegOp {
///     fn kind(&self) -> &str {
///         "Neg"
///     }
///
///     fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
///         Ok(vec![inputs[0].clone()])
///     }
///
///     fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
///         ctx.passthrough()
///     }
/// }
/// ```
pub trait Operator: Send + Sync + fmt::Debug {
    /// Operator kind (e.g., "Add", "Gelu", "LayoutConvert").
    fn kind(&self) -> &str;

    /// Composite operators must be decomposed before format negotiation.
    fn is_composite(&self) -> bool {
        false
    }

    /// Compute output dtypes and shapes from the input specs.
    ///
    /// Also validates arity and rank/type relationships. Called by
    /// `Graph::add_operator` and `FragmentBuilder::push` before a node is
    /// inserted.
    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>>;

    /// Rewrite this operator into a fragment of simpler operators.
    ///
    /// The fragment's inputs are this node's inputs and its outputs must
    /// match this node's outputs exactly in dtype and shape. The default is
    /// a single-node fragment containing the operator itself, which is what
    /// primitives want.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decomposition` for unsupported attribute combinations
    /// or input shapes that cannot be made compatible.
    fn decompose(&self, ctx: &DecomposeCtx) -> Result<Fragment> {
        ctx.identity()
    }

    /// Decide which of the offered input layouts this operator consumes and
    /// which layouts it can produce.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedFormat` if the operator cannot work with
    /// any layout on this target.
    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation>;

    /// Reference f32 evaluation over logical row-major buffers.
    ///
    /// Returns one buffer per output.
    fn evaluate(&self, _ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        Err(Error::Evaluation(format!(
            "{} has no reference evaluation",
            self.kind()
        )))
    }
}

// ─────────────────────────────── Negotiation ─────────────────────────────

/// Answer for one input during format negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// The operator consumes the input as offered. Holds the accepted subset
    /// of the offered layouts.
    Accepted(Vec<FormatStridePair>),

    /// None of the offered layouts work. `wanted` lists the layouts the
    /// operator could consume after a conversion, most preferred first.
    Rejected { wanted: Vec<FormatStridePair> },
}

impl Acceptance {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Acceptance::Accepted(_))
    }
}

/// Result of `Operator::negotiate_format`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiation {
    /// One entry per input, in input order.
    pub inputs: Vec<Acceptance>,

    /// Candidate layouts per output, in output order.
    pub outputs: Vec<Vec<FormatStridePair>>,
}

impl Negotiation {
    pub fn new(inputs: Vec<Acceptance>, outputs: Vec<Vec<FormatStridePair>>) -> Self {
        Self { inputs, outputs }
    }

    /// Whether every input was accepted.
    pub fn all_accepted(&self) -> bool {
        self.inputs.iter().all(Acceptance::is_accepted)
    }
}

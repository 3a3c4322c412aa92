//! Activation operators.
//!
//! `Relu` is a primitive. `Gelu` and `GeluBackward` are composites: they
//! have no kernel of their own and lower into the elementwise families.

use std::f32::consts::{FRAC_1_SQRT_2, FRAC_2_SQRT_PI, PI};
use tessera_core::{
    AttributeValue, Attributes, DecomposeCtx, Error, EvalCtx, Fragment, NegotiateCtx,
    Negotiation, Operator, Result, TensorSpec, broadcast_shape,
};

use crate::families::{BinaryElementwiseOp, ScalarElementwiseOp, UnaryElementwiseOp};
use crate::helpers::{expect_float, expect_inputs};

/// Cubic coefficient of the tanh approximation.
const GELU_TANH_COEFF: f32 = 0.044715;

/// sqrt(2 / pi)
const SQRT_2_OVER_PI: f32 = FRAC_2_SQRT_PI * FRAC_1_SQRT_2;

// ──────────────────────────────── Relu ───────────────────────────────────

/// Rectified linear unit, leaky when `negative_slope` is non-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReluOp {
    negative_slope: f32,
}

impl ReluOp {
    pub fn new() -> Self {
        Self {
            negative_slope: 0.0,
        }
    }

    pub fn leaky(negative_slope: f32) -> Self {
        Self { negative_slope }
    }

    /// Reads `negative_slope` (default 0).
    pub fn from_attributes(attrs: &Attributes) -> crate::Result<Self> {
        let negative_slope = attrs.f32_or("negative_slope", 0.0)?;
        if !negative_slope.is_finite() {
            return Err(crate::Error::InvalidConfig {
                kind: "Relu",
                message: format!("negative_slope must be finite, got {negative_slope}"),
            });
        }
        Ok(Self::leaky(negative_slope))
    }

    pub fn negative_slope(&self) -> f32 {
        self.negative_slope
    }
}

impl Default for ReluOp {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for ReluOp {
    fn kind(&self) -> &str {
        "Relu"
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        expect_inputs("Relu", inputs, 1)?;
        expect_float("Relu", inputs[0])?;
        Ok(vec![inputs[0].clone()])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        ctx.passthrough()
    }

    fn evaluate(&self, ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        let slope = self.negative_slope;
        ctx.unary_f32(|x| if x > 0.0 { x } else { x * slope })
    }
}

// ──────────────────────────────── GELU ───────────────────────────────────

/// Which GELU formula to lower to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Approximation {
    /// `0.5 * x * (1 + erf(x / sqrt(2)))`
    #[default]
    Exact,

    /// `0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))`
    Tanh,
}

impl Approximation {
    /// Parse the `approximate` attribute.
    ///
    /// Accepts a bool (`true` = tanh), the ints 0 and 1, and the strings
    /// `"none"`, `"erf"`, `"exact"` and `"tanh"`. A missing attribute means
    /// exact.
    pub fn from_attribute(value: Option<&AttributeValue>) -> crate::Result<Self> {
        match value {
            None | Some(AttributeValue::Bool(false)) | Some(AttributeValue::Int(0)) => {
                Ok(Approximation::Exact)
            }
            Some(AttributeValue::Bool(true)) | Some(AttributeValue::Int(1)) => {
                Ok(Approximation::Tanh)
            }
            Some(AttributeValue::String(s)) => match s.to_ascii_lowercase().as_str() {
                "none" | "erf" | "exact" => Ok(Approximation::Exact),
                "tanh" => Ok(Approximation::Tanh),
                _ => Err(crate::Error::UnsupportedApproximation(format!("{s:?}"))),
            },
            Some(other) => Err(crate::Error::UnsupportedApproximation(format!("{other:?}"))),
        }
    }
}

/// Typed configuration shared by `Gelu` and `GeluBackward`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeluConfig {
    pub approximation: Approximation,
}

impl GeluConfig {
    pub fn from_attributes(attrs: &Attributes) -> crate::Result<Self> {
        Ok(Self {
            approximation: Approximation::from_attribute(attrs.get("approximate"))?,
        })
    }
}

/// GELU (Gaussian Error Linear Unit) activation.
///
/// GELU(x) = x * Φ(x) where Φ is the standard normal CDF. Composite: lowers
/// to Erf or Tanh plus scalar and binary elementwise primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeluOp {
    config: GeluConfig,
}

impl GeluOp {
    pub fn new(config: GeluConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> GeluConfig {
        self.config
    }
}

impl Operator for GeluOp {
    fn kind(&self) -> &str {
        "Gelu"
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        expect_inputs("Gelu", inputs, 1)?;
        expect_float("Gelu", inputs[0])?;
        Ok(vec![inputs[0].clone()])
    }

    fn decompose(&self, ctx: &DecomposeCtx) -> Result<Fragment> {
        let mut b = ctx.builder()?;
        let x = b.input(0)?;

        let cdf_arg = match self.config.approximation {
            // erf(x / sqrt(2))
            Approximation::Exact => {
                let scaled = b.push(ScalarElementwiseOp::mul_scalar(FRAC_1_SQRT_2), &[x])?;
                b.push(UnaryElementwiseOp::erf(), &[scaled])?
            }
            // tanh(sqrt(2/pi) * (x + 0.044715 * x^3))
            Approximation::Tanh => {
                let u = push_tanh_argument(&mut b, x)?;
                b.push(UnaryElementwiseOp::tanh(), &[u])?
            }
        };
        let one_plus = b.push(ScalarElementwiseOp::add_scalar(1.0), &[cdf_arg])?;
        let x_times = b.push(BinaryElementwiseOp::mul(), &[x, one_plus])?;
        let out = b.push(ScalarElementwiseOp::mul_scalar(0.5), &[x_times])?;

        tracing::trace!(
            node = ctx.name(),
            approximation = ?self.config.approximation,
            "decomposed Gelu"
        );
        b.finish(&[out])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        Err(composite_negotiation_error(ctx, "Gelu"))
    }
}

/// Gradient of GELU with respect to its input.
///
/// Inputs are `[x, dy]` where `dy` must broadcast to the shape of `x`;
/// output `dx` has the spec of `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeluBackwardOp {
    config: GeluConfig,
}

impl GeluBackwardOp {
    pub fn new(config: GeluConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> GeluConfig {
        self.config
    }
}

impl Operator for GeluBackwardOp {
    fn kind(&self) -> &str {
        "GeluBackward"
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        expect_inputs("GeluBackward", inputs, 2)?;
        let (x, dy) = (inputs[0], inputs[1]);
        expect_float("GeluBackward", x)?;
        if dy.dtype != x.dtype {
            return Err(Error::GraphConstruction(format!(
                "GeluBackward gradient is {} but input is {}",
                dy.dtype, x.dtype
            )));
        }
        if broadcast_shape(&x.shape, &dy.shape)? != x.shape {
            return Err(Error::GraphConstruction(format!(
                "GeluBackward gradient {:?} does not broadcast to input {:?}",
                dy.shape, x.shape
            )));
        }
        Ok(vec![x.clone()])
    }

    fn decompose(&self, ctx: &DecomposeCtx) -> Result<Fragment> {
        let mut b = ctx.builder()?;
        let x = b.input(0)?;
        let dy = b.input(1)?;

        let grad = match self.config.approximation {
            // 0.5 * (1 + erf(x / sqrt(2))) + x * exp(-x^2 / 2) / sqrt(2 pi)
            Approximation::Exact => {
                let scaled = b.push(ScalarElementwiseOp::mul_scalar(FRAC_1_SQRT_2), &[x])?;
                let erf = b.push(UnaryElementwiseOp::erf(), &[scaled])?;
                let one_plus = b.push(ScalarElementwiseOp::add_scalar(1.0), &[erf])?;
                let cdf = b.push(ScalarElementwiseOp::mul_scalar(0.5), &[one_plus])?;

                let square = b.push(ScalarElementwiseOp::pow_scalar(2.0), &[x])?;
                let neg_half = b.push(ScalarElementwiseOp::mul_scalar(-0.5), &[square])?;
                let gauss = b.push(UnaryElementwiseOp::exp(), &[neg_half])?;
                let pdf = b.push(
                    ScalarElementwiseOp::mul_scalar(1.0 / (2.0 * PI).sqrt()),
                    &[gauss],
                )?;
                let x_pdf = b.push(BinaryElementwiseOp::mul(), &[x, pdf])?;

                b.push(BinaryElementwiseOp::add(), &[cdf, x_pdf])?
            }
            // 0.5 (1 + t) + 0.5 x (1 - t^2) sqrt(2/pi) (1 + 3 * 0.044715 x^2)
            Approximation::Tanh => {
                let u = push_tanh_argument(&mut b, x)?;
                let t = b.push(UnaryElementwiseOp::tanh(), &[u])?;
                let one_plus = b.push(ScalarElementwiseOp::add_scalar(1.0), &[t])?;
                let left = b.push(ScalarElementwiseOp::mul_scalar(0.5), &[one_plus])?;

                let t_sq = b.push(ScalarElementwiseOp::pow_scalar(2.0), &[t])?;
                let neg_t_sq = b.push(UnaryElementwiseOp::neg(), &[t_sq])?;
                let sech_sq = b.push(ScalarElementwiseOp::add_scalar(1.0), &[neg_t_sq])?;

                let x_sq = b.push(ScalarElementwiseOp::pow_scalar(2.0), &[x])?;
                let cubic = b.push(
                    ScalarElementwiseOp::mul_scalar(3.0 * GELU_TANH_COEFF),
                    &[x_sq],
                )?;
                let poly = b.push(ScalarElementwiseOp::add_scalar(1.0), &[cubic])?;
                let du = b.push(
                    ScalarElementwiseOp::mul_scalar(0.5 * SQRT_2_OVER_PI),
                    &[poly],
                )?;

                let x_sech = b.push(BinaryElementwiseOp::mul(), &[x, sech_sq])?;
                let right = b.push(BinaryElementwiseOp::mul(), &[x_sech, du])?;
                b.push(BinaryElementwiseOp::add(), &[left, right])?
            }
        };
        let dx = b.push(BinaryElementwiseOp::mul(), &[dy, grad])?;

        tracing::trace!(
            node = ctx.name(),
            approximation = ?self.config.approximation,
            "decomposed GeluBackward"
        );
        b.finish(&[dx])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        Err(composite_negotiation_error(ctx, "GeluBackward"))
    }
}

/// Push `sqrt(2/pi) * (x + 0.044715 * x^3)`.
fn push_tanh_argument(
    b: &mut tessera_core::FragmentBuilder,
    x: tessera_core::FragmentValue,
) -> Result<tessera_core::FragmentValue> {
    let cube = b.push(ScalarElementwiseOp::pow_scalar(3.0), &[x])?;
    let scaled_cube = b.push(ScalarElementwiseOp::mul_scalar(GELU_TANH_COEFF), &[cube])?;
    let inner = b.push(BinaryElementwiseOp::add(), &[x, scaled_cube])?;
    b.push(ScalarElementwiseOp::mul_scalar(SQRT_2_OVER_PI), &[inner])
}

fn composite_negotiation_error(ctx: &NegotiateCtx, kind: &str) -> Error {
    Error::UnsupportedFormat(format!(
        "composite {kind} node '{}' has no layouts; lower it first",
        ctx.node.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_core::{DataType, Graph};

    #[test]
    fn test_approximation_parsing() {
        use AttributeValue as V;
        let parse = |v: V| Approximation::from_attribute(Some(&v));

        assert_eq!(Approximation::from_attribute(None).unwrap(), Approximation::Exact);
        assert_eq!(parse(V::Bool(false)).unwrap(), Approximation::Exact);
        assert_eq!(parse(V::Bool(true)).unwrap(), Approximation::Tanh);
        assert_eq!(parse(V::Int(1)).unwrap(), Approximation::Tanh);
        assert_eq!(parse(V::String("none".into())).unwrap(), Approximation::Exact);
        assert_eq!(parse(V::String("erf".into())).unwrap(), Approximation::Exact);
        assert_eq!(parse(V::String("tanh".into())).unwrap(), Approximation::Tanh);

        assert!(matches!(
            parse(V::String("sigmoid".into())),
            Err(crate::Error::UnsupportedApproximation(_))
        ));
        assert!(parse(V::Int(2)).is_err());
        assert!(parse(V::Float(1.0)).is_err());
    }

    #[test]
    fn test_unsupported_approximation_is_decomposition_error() {
        let attrs = Attributes::new().with("approximate", "sigmoid");
        let err: Error = GeluConfig::from_attributes(&attrs).unwrap_err().into();
        assert!(matches!(err, Error::Decomposition(_)));
    }

    #[test]
    fn test_sqrt_2_over_pi() {
        assert!((SQRT_2_OVER_PI - 0.797_884_6).abs() < 1e-6);
    }

    #[test]
    fn test_gelu_is_composite() {
        let op = GeluOp::default();
        assert!(op.is_composite());
        assert_eq!(op.config().approximation, Approximation::Exact);
    }

    #[test]
    fn test_gelu_exact_fragment_kinds() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![4, 8]);
        let n = graph
            .add_operator_inferred(Arc::new(GeluOp::default()), "gelu", &[x])
            .unwrap();

        let ctx = DecomposeCtx::new(&graph, n).unwrap();
        let fragment = graph.node(n).unwrap().op().decompose(&ctx).unwrap();
        let kinds: Vec<_> = fragment.nodes().iter().map(|n| n.op.kind()).collect();
        assert_eq!(kinds, vec!["MulScalar", "Erf", "AddScalar", "Mul", "MulScalar"]);
        assert!(!fragment.has_composite());
    }

    #[test]
    fn test_gelu_tanh_fragment_kinds() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![3]);
        let op = GeluOp::new(GeluConfig {
            approximation: Approximation::Tanh,
        });
        let n = graph.add_operator_inferred(Arc::new(op), "gelu", &[x]).unwrap();

        let ctx = DecomposeCtx::new(&graph, n).unwrap();
        let fragment = graph.node(n).unwrap().op().decompose(&ctx).unwrap();
        let kinds: Vec<_> = fragment.nodes().iter().map(|n| n.op.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "PowScalar",
                "MulScalar",
                "Add",
                "MulScalar",
                "Tanh",
                "AddScalar",
                "Mul",
                "MulScalar"
            ]
        );
    }

    #[test]
    fn test_gelu_backward_shape_checks() {
        let op = GeluBackwardOp::default();
        let x = TensorSpec::new(DataType::F32, vec![4, 8]);
        let dy = TensorSpec::new(DataType::F32, vec![4, 8]);
        assert_eq!(op.infer_outputs(&[&x, &dy]).unwrap(), vec![x.clone()]);

        let row = TensorSpec::new(DataType::F32, vec![8]);
        assert!(op.infer_outputs(&[&x, &row]).is_ok());

        let wide = TensorSpec::new(DataType::F32, vec![2, 4, 8]);
        assert!(op.infer_outputs(&[&x, &wide]).is_err());

        let half = TensorSpec::new(DataType::F16, vec![4, 8]);
        assert!(op.infer_outputs(&[&x, &half]).is_err());
    }

    #[test]
    fn test_relu_from_attributes() {
        let relu = ReluOp::from_attributes(&Attributes::new()).unwrap();
        assert_eq!(relu.negative_slope(), 0.0);

        let leaky =
            ReluOp::from_attributes(&Attributes::new().with("negative_slope", 0.1f32)).unwrap();
        assert_eq!(leaky.negative_slope(), 0.1);

        let bad = Attributes::new().with("negative_slope", f32::NAN);
        assert!(ReluOp::from_attributes(&bad).is_err());
    }
}

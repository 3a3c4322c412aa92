//! Core operator registry.
//!
//! Provides a pre-populated registry with every built-in operator kind.

use tessera_core::{
    AttributeValue, Attributes, Format, FormatStridePair, LAYOUT_CONVERT, LayoutConvertOp,
    OperatorRegistry,
};

use crate::families::{BinaryElementwiseOp, ScalarElementwiseOp, UnaryElementwiseOp};
use crate::helpers::shared;
use crate::operators::{
    Conv2dConfig, Conv2dOp, GeluBackwardOp, GeluConfig, GeluOp, MatMulOp, ReluOp,
};

/// Returns an operator registry pre-populated with the built-in operators.
///
/// The registry includes:
/// - 4 unary elementwise operators (Erf, Tanh, Exp, Neg) and Relu
/// - 3 scalar elementwise operators (MulScalar, AddScalar, PowScalar)
/// - 3 binary elementwise operators (Add, Sub, Mul)
/// - MatMul and Conv2d
/// - 2 composite activations (Gelu, GeluBackward)
/// - LayoutConvert
///
/// Custom operators can be added to the returned registry via
/// `registry.register(kind, factory)`.
pub fn core_operator_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();

    // Unary elementwise operators
    registry
        .register("Erf", |_| Ok(shared(UnaryElementwiseOp::erf())))
        .register("Tanh", |_| Ok(shared(UnaryElementwiseOp::tanh())))
        .register("Exp", |_| Ok(shared(UnaryElementwiseOp::exp())))
        .register("Neg", |_| Ok(shared(UnaryElementwiseOp::neg())))
        .register("Relu", |attrs| Ok(shared(ReluOp::from_attributes(attrs)?)));

    // Scalar elementwise operators
    registry
        .register("MulScalar", |attrs| {
            Ok(shared(ScalarElementwiseOp::from_attributes(
                ScalarElementwiseOp::mul_scalar,
                1.0,
                attrs,
            )?))
        })
        .register("AddScalar", |attrs| {
            Ok(shared(ScalarElementwiseOp::from_attributes(
                ScalarElementwiseOp::add_scalar,
                0.0,
                attrs,
            )?))
        })
        .register("PowScalar", |attrs| {
            Ok(shared(ScalarElementwiseOp::from_attributes(
                ScalarElementwiseOp::pow_scalar,
                1.0,
                attrs,
            )?))
        });

    // Binary elementwise operators
    registry
        .register("Add", |_| Ok(shared(BinaryElementwiseOp::add())))
        .register("Sub", |_| Ok(shared(BinaryElementwiseOp::sub())))
        .register("Mul", |_| Ok(shared(BinaryElementwiseOp::mul())));

    // Contractions
    registry
        .register("MatMul", |_| Ok(shared(MatMulOp::new())))
        .register("Conv2d", |attrs| {
            Ok(shared(Conv2dOp::new(Conv2dConfig::from_attributes(attrs)?)))
        });

    // Composite activations
    registry
        .register("Gelu", |attrs| {
            Ok(shared(GeluOp::new(GeluConfig::from_attributes(attrs)?)))
        })
        .register("GeluBackward", |attrs| {
            Ok(shared(GeluBackwardOp::new(GeluConfig::from_attributes(
                attrs,
            )?)))
        });

    registry.register(LAYOUT_CONVERT, |attrs| {
        Ok(shared(LayoutConvertOp::new(layout_from_attributes(attrs)?)))
    });

    registry
}

/// Parse a `LayoutConvert` target layout.
///
/// `format` is one of `row_major`, `channels_last`, `permuted` (with an
/// `order` list) or `blocked` (with `axis` and `block`); `strides` lists one
/// stride per physical dimension.
fn layout_from_attributes(attrs: &Attributes) -> crate::Result<FormatStridePair> {
    let invalid = |message: String| crate::Error::InvalidConfig {
        kind: "LayoutConvert",
        message,
    };

    let format = match attrs.get("format") {
        Some(AttributeValue::String(s)) => match s.as_str() {
            "row_major" => Format::RowMajor,
            "channels_last" => Format::ChannelsLast,
            "permuted" => Format::Permuted(non_negative(attrs.ints_or("order", &[])?)?),
            "blocked" => {
                let axis = attrs.i64_or("axis", -1)?;
                let block = attrs.i64_or("block", 0)?;
                if axis < 0 || block <= 0 {
                    return Err(invalid(format!(
                        "blocked format needs axis >= 0 and block > 0, got {axis} and {block}"
                    )));
                }
                Format::Blocked {
                    axis: axis as usize,
                    block: block as usize,
                }
            }
            other => return Err(invalid(format!("unknown format '{other}'"))),
        },
        Some(other) => {
            return Err(invalid(format!(
                "format must be a string, got {}",
                other.type_name()
            )));
        }
        None => return Err(invalid("missing 'format' attribute".to_string())),
    };

    if !attrs.contains("strides") {
        return Err(invalid("missing 'strides' attribute".to_string()));
    }
    let strides = non_negative(attrs.ints_or("strides", &[])?)?;
    Ok(FormatStridePair::new(format, strides))
}

fn non_negative(values: Vec<i64>) -> crate::Result<Vec<usize>> {
    values
        .into_iter()
        .map(|v| {
            usize::try_from(v).map_err(|_| crate::Error::InvalidConfig {
                kind: "LayoutConvert",
                message: format!("negative value {v}"),
            })
        })
        .collect()
}

//! Helper functions for operator implementation.

use std::sync::Arc;
use tessera_core::{Error, Operator, Result, TensorSpec};

/// Box an operator for the registry and the graph.
pub(crate) fn shared<O: Operator + 'static>(op: O) -> Arc<dyn Operator> {
    Arc::new(op)
}

/// Check the input count of an operator.
pub(crate) fn expect_inputs(kind: &str, inputs: &[&TensorSpec], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(Error::GraphConstruction(format!(
            "{kind} expects {expected} inputs, got {}",
            inputs.len()
        )));
    }
    Ok(())
}

/// Check that all inputs share one element type and return it.
pub(crate) fn common_dtype(kind: &str, inputs: &[&TensorSpec]) -> Result<tessera_core::DataType> {
    let Some(first) = inputs.first() else {
        return Err(Error::GraphConstruction(format!("{kind} has no inputs")));
    };
    if let Some(other) = inputs.iter().find(|s| s.dtype != first.dtype) {
        return Err(Error::GraphConstruction(format!(
            "{kind} mixes element types {} and {}",
            first.dtype, other.dtype
        )));
    }
    Ok(first.dtype)
}

/// Require a floating-point element type.
pub(crate) fn expect_float(kind: &str, spec: &TensorSpec) -> Result<()> {
    if !spec.dtype.is_float() {
        return Err(Error::GraphConstruction(format!(
            "{kind} requires a floating-point input, got {}",
            spec.dtype
        )));
    }
    Ok(())
}

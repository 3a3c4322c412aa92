//! Decomposition fragments: self-contained subgraphs that stand in for one node.
//!
//! A fragment owns local values. The first `input_count` values are the
//! boundary inputs (bound to the replaced node's inputs on splice); every
//! other value is produced by exactly one fragment node. Nodes are stored in
//! dependency order.

use crate::operator::Operator;
use crate::types::TensorSpec;
use crate::{Error, Result};
use std::sync::Arc;

/// Handle to a value inside a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentValue(usize);

impl FragmentValue {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A local value: diagnostic name and spec.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentTensor {
    pub name: String,
    pub spec: TensorSpec,
}

/// An operator instance inside a fragment.
#[derive(Debug, Clone)]
pub struct FragmentNode {
    pub name: String,
    pub op: Arc<dyn Operator>,
    pub inputs: Vec<FragmentValue>,
    pub outputs: Vec<FragmentValue>,
}

/// A finished decomposition, ready for `Graph::replace_operator`.
#[derive(Debug, Clone)]
pub struct Fragment {
    values: Vec<FragmentTensor>,
    input_count: usize,
    nodes: Vec<FragmentNode>,
    outputs: Vec<FragmentValue>,
}

impl Fragment {
    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[FragmentTensor] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Result<&FragmentTensor> {
        self.values.get(index).ok_or_else(|| {
            Error::Decomposition(format!("fragment has no value {index}"))
        })
    }

    /// Nodes in dependency order.
    pub fn nodes(&self) -> &[FragmentNode] {
        &self.nodes
    }

    pub fn outputs(&self) -> &[FragmentValue] {
        &self.outputs
    }

    pub fn is_input(&self, value: FragmentValue) -> bool {
        value.0 < self.input_count
    }

    /// Whether any node in the fragment is itself composite.
    pub fn has_composite(&self) -> bool {
        self.nodes.iter().any(|n| n.op.is_composite())
    }
}

// ──────────────────────────── FragmentBuilder ────────────────────────────

/// Incremental construction of a `Fragment`.
///
/// Every `push` runs the operator's shape inference, so shape errors surface
/// while decomposing rather than when splicing.
///
/// # Example
///
/// ```ignore
/// let mut b = FragmentBuilder::new(&[x_spec]);
/// let x = b.input(0)?;
/// let y = b.push(UnaryOp::tanh(), &[x])?;
/// let fragment = b.finish(&[y])?;
/// ```
#[derive(Debug)]
pub struct FragmentBuilder {
    values: Vec<FragmentTensor>,
    input_count: usize,
    nodes: Vec<FragmentNode>,
}

impl FragmentBuilder {
    /// Start a fragment whose boundary inputs have the given specs.
    pub fn new(inputs: &[TensorSpec]) -> Self {
        let values = inputs
            .iter()
            .enumerate()
            .map(|(i, spec)| FragmentTensor {
                name: format!("in{i}"),
                spec: spec.clone(),
            })
            .collect();
        Self {
            values,
            input_count: inputs.len(),
            nodes: Vec::new(),
        }
    }

    /// Boundary input `index`.
    pub fn input(&self, index: usize) -> Result<FragmentValue> {
        if index < self.input_count {
            Ok(FragmentValue(index))
        } else {
            Err(Error::Decomposition(format!(
                "fragment has {} inputs, no input {index}",
                self.input_count
            )))
        }
    }

    pub fn spec(&self, value: FragmentValue) -> Result<&TensorSpec> {
        self.values
            .get(value.0)
            .map(|v| &v.spec)
            .ok_or_else(|| Error::Decomposition(format!("unknown fragment value {}", value.0)))
    }

    /// Append a single-output operator.
    pub fn push<O: Operator + 'static>(
        &mut self,
        op: O,
        inputs: &[FragmentValue],
    ) -> Result<FragmentValue> {
        let kind = op.kind().to_string();
        let outputs = self.push_shared(Arc::new(op), inputs)?;
        match outputs.as_slice() {
            [single] => Ok(*single),
            _ => Err(Error::Decomposition(format!(
                "{kind} produces {} outputs, expected one",
                outputs.len()
            ))),
        }
    }

    /// Append an operator, returning all of its outputs.
    pub fn push_shared(
        &mut self,
        op: Arc<dyn Operator>,
        inputs: &[FragmentValue],
    ) -> Result<Vec<FragmentValue>> {
        let specs = inputs
            .iter()
            .map(|&v| self.spec(v))
            .collect::<Result<Vec<_>>>()?;
        let inferred = op
            .infer_outputs(&specs)
            .map_err(|e| Error::Decomposition(format!("{}: {e}", op.kind())))?;

        let name = format!("{}_{}", op.kind(), self.nodes.len());
        let outputs: Vec<FragmentValue> = inferred
            .into_iter()
            .enumerate()
            .map(|(j, spec)| {
                self.values.push(FragmentTensor {
                    name: format!("{name}:{j}"),
                    spec,
                });
                FragmentValue(self.values.len() - 1)
            })
            .collect();

        self.nodes.push(FragmentNode {
            name,
            op,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    /// Finish the fragment with the given outputs, in the replaced node's
    /// output order.
    pub fn finish(self, outputs: &[FragmentValue]) -> Result<Fragment> {
        for &v in outputs {
            if v.0 >= self.values.len() {
                return Err(Error::Decomposition(format!(
                    "unknown fragment output value {}",
                    v.0
                )));
            }
        }
        Ok(Fragment {
            values: self.values,
            input_count: self.input_count,
            nodes: self.nodes,
            outputs: outputs.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;
    use crate::testing::{MockElementwise, MockUnsqueeze};

    fn spec(shape: &[usize]) -> TensorSpec {
        TensorSpec::new(DataType::F32, shape.to_vec())
    }

    #[test]
    fn test_builder_infers_specs() {
        let mut b = FragmentBuilder::new(&[spec(&[4, 8])]);
        let x = b.input(0).unwrap();
        let y = b.push(MockUnsqueeze, &[x]).unwrap();
        assert_eq!(b.spec(y).unwrap(), &spec(&[1, 4, 8]));

        let fragment = b.finish(&[y]).unwrap();
        assert_eq!(fragment.input_count(), 1);
        assert_eq!(fragment.value_count(), 2);
        assert_eq!(fragment.nodes().len(), 1);
        assert_eq!(fragment.nodes()[0].name, "Unsqueeze_0");
        assert!(!fragment.is_input(y));
        assert!(!fragment.has_composite());
    }

    #[test]
    fn test_builder_rejects_incompatible_shapes() {
        let mut b = FragmentBuilder::new(&[spec(&[4, 8]), spec(&[3])]);
        let x = b.input(0).unwrap();
        let y = b.input(1).unwrap();
        let result = b.push_shared(MockElementwise::binary("Add"), &[x, y]);
        assert!(matches!(result, Err(Error::Decomposition(_))));
    }

    #[test]
    fn test_builder_input_out_of_range() {
        let b = FragmentBuilder::new(&[spec(&[1])]);
        assert!(b.input(1).is_err());
    }

    #[test]
    fn test_finish_rejects_unknown_value() {
        let b = FragmentBuilder::new(&[spec(&[1])]);
        assert!(b.finish(&[FragmentValue(3)]).is_err());
    }
}

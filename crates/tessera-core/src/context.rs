//! Contexts handed to operators during decomposition, negotiation, and
//! reference evaluation.

use crate::broadcast::broadcast_index;
use crate::fragment::{Fragment, FragmentBuilder};
use crate::ir::{Graph, Node, NodeId};
use crate::layout::FormatStridePair;
use crate::operator::{Acceptance, Negotiation};
use crate::target::TargetDescriptor;
use crate::types::{TensorDesc, TensorSpec};
use crate::{Error, Result};

// ─────────────────────────────── DecomposeCtx ────────────────────────────

/// Context for `Operator::decompose`.
pub struct DecomposeCtx<'a> {
    pub graph: &'a Graph,
    pub node_id: NodeId,
    pub node: &'a Node,
}

impl<'a> DecomposeCtx<'a> {
    pub fn new(graph: &'a Graph, node_id: NodeId) -> Result<Self> {
        let node = graph.node(node_id)?;
        Ok(Self {
            graph,
            node_id,
            node,
        })
    }

    /// Node name, for error messages.
    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn input_count(&self) -> usize {
        self.node.inputs().len()
    }

    pub fn output_count(&self) -> usize {
        self.node.outputs().len()
    }

    pub fn input(&self, index: usize) -> Result<&'a TensorDesc> {
        let id = self.node.inputs().get(index).ok_or_else(|| {
            Error::Decomposition(format!(
                "node '{}' has no input {index}",
                self.node.name()
            ))
        })?;
        self.graph.tensor(*id)
    }

    pub fn output(&self, index: usize) -> Result<&'a TensorDesc> {
        let id = self.node.outputs().get(index).ok_or_else(|| {
            Error::Decomposition(format!(
                "node '{}' has no output {index}",
                self.node.name()
            ))
        })?;
        self.graph.tensor(*id)
    }

    /// A builder whose boundary inputs match this node's inputs.
    pub fn builder(&self) -> Result<FragmentBuilder> {
        let specs = (0..self.input_count())
            .map(|i| self.input(i).map(|t| t.spec().clone()))
            .collect::<Result<Vec<TensorSpec>>>()?;
        Ok(FragmentBuilder::new(&specs))
    }

    /// Single-node fragment containing this node's own operator.
    pub fn identity(&self) -> Result<Fragment> {
        let mut builder = self.builder()?;
        let inputs = (0..self.input_count())
            .map(|i| builder.input(i))
            .collect::<Result<Vec<_>>>()?;
        let outputs = builder.push_shared(self.node.op().clone(), &inputs)?;
        builder.finish(&outputs)
    }
}

// ─────────────────────────────── NegotiateCtx ────────────────────────────

/// Context for `Operator::negotiate_format`.
///
/// Every input is offered the layouts it can be read in without conversion
/// (in practice, the fixed layout of the tensor).
pub struct NegotiateCtx<'a> {
    pub target: &'a TargetDescriptor,
    pub graph: &'a Graph,
    pub node: &'a Node,
    offered: &'a [Vec<FormatStridePair>],
}

impl<'a> NegotiateCtx<'a> {
    pub fn new(
        target: &'a TargetDescriptor,
        graph: &'a Graph,
        node_id: NodeId,
        offered: &'a [Vec<FormatStridePair>],
    ) -> Result<Self> {
        let node = graph.node(node_id)?;
        if offered.len() != node.inputs().len() {
            return Err(Error::InvalidGraph(format!(
                "node '{}' has {} inputs but {} offers were made",
                node.name(),
                node.inputs().len(),
                offered.len()
            )));
        }
        Ok(Self {
            target,
            graph,
            node,
            offered,
        })
    }

    pub fn input_count(&self) -> usize {
        self.node.inputs().len()
    }

    pub fn output_count(&self) -> usize {
        self.node.outputs().len()
    }

    pub fn input(&self, index: usize) -> Result<&'a TensorDesc> {
        let id = self.node.inputs().get(index).ok_or_else(|| {
            Error::InvalidGraph(format!("node '{}' has no input {index}", self.node.name()))
        })?;
        self.graph.tensor(*id)
    }

    pub fn output(&self, index: usize) -> Result<&'a TensorDesc> {
        let id = self.node.outputs().get(index).ok_or_else(|| {
            Error::InvalidGraph(format!("node '{}' has no output {index}", self.node.name()))
        })?;
        self.graph.tensor(*id)
    }

    /// Layouts offered for input `index`.
    pub fn offered(&self, index: usize) -> Result<&'a [FormatStridePair]> {
        self.offered.get(index).map(Vec::as_slice).ok_or_else(|| {
            Error::InvalidGraph(format!("node '{}' has no input {index}", self.node.name()))
        })
    }

    /// Target default layout for output `index`.
    pub fn preferred_output(&self, index: usize) -> Result<FormatStridePair> {
        let out = self.output(index)?;
        Ok(self.target.preferred_layout(out.dtype(), out.shape()))
    }

    /// Accept every offered layout of input `index`.
    pub fn accept_all(&self, index: usize) -> Result<Acceptance> {
        Ok(Acceptance::Accepted(self.offered(index)?.to_vec()))
    }

    /// Accept the offered layouts of input `index` that satisfy `pred`;
    /// reject with `wanted` if none does.
    pub fn accept_if(
        &self,
        index: usize,
        pred: impl Fn(&FormatStridePair) -> bool,
        wanted: Vec<FormatStridePair>,
    ) -> Result<Acceptance> {
        let accepted: Vec<_> = self
            .offered(index)?
            .iter()
            .filter(|pair| pred(pair))
            .cloned()
            .collect();
        if accepted.is_empty() {
            Ok(Acceptance::Rejected { wanted })
        } else {
            Ok(Acceptance::Accepted(accepted))
        }
    }

    /// Accept input `index` only in a layout equivalent to dense row-major.
    pub fn accept_row_major(&self, index: usize) -> Result<Acceptance> {
        let shape = self.input(index)?.shape();
        let row_major = FormatStridePair::row_major(shape);
        self.accept_if(
            index,
            |pair| pair.equivalent(&row_major, shape),
            vec![row_major.clone()],
        )
    }

    /// Negotiation for layout-agnostic elementwise operators: every input is
    /// accepted as offered, and each output proposes the offered layouts of
    /// same-shaped inputs followed by the target default.
    pub fn passthrough(&self) -> Result<Negotiation> {
        let inputs = (0..self.input_count())
            .map(|i| self.accept_all(i))
            .collect::<Result<Vec<_>>>()?;

        let mut outputs = Vec::with_capacity(self.output_count());
        for j in 0..self.output_count() {
            let shape = self.output(j)?.shape();
            let mut candidates: Vec<FormatStridePair> = Vec::new();
            for i in 0..self.input_count() {
                if self.input(i)?.shape() != shape {
                    continue;
                }
                for pair in self.offered(i)? {
                    if !candidates.contains(pair) {
                        candidates.push(pair.clone());
                    }
                }
            }
            let preferred = self.preferred_output(j)?;
            if !candidates.contains(&preferred) {
                candidates.push(preferred);
            }
            outputs.push(candidates);
        }
        Ok(Negotiation::new(inputs, outputs))
    }
}

// ──────────────────────────────── EvalCtx ────────────────────────────────

/// Context for `Operator::evaluate`. Buffers are logical row-major f32.
pub struct EvalCtx<'a> {
    pub graph: &'a Graph,
    pub node: &'a Node,
    inputs: Vec<&'a [f32]>,
}

impl<'a> EvalCtx<'a> {
    pub fn new(graph: &'a Graph, node: &'a Node, inputs: Vec<&'a [f32]>) -> Self {
        Self {
            graph,
            node,
            inputs,
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, index: usize) -> Result<&'a [f32]> {
        self.inputs.get(index).copied().ok_or_else(|| {
            Error::Evaluation(format!("node '{}' has no input {index}", self.node.name()))
        })
    }

    pub fn input_desc(&self, index: usize) -> Result<&'a TensorDesc> {
        let id = self.node.inputs().get(index).ok_or_else(|| {
            Error::Evaluation(format!("node '{}' has no input {index}", self.node.name()))
        })?;
        self.graph.tensor(*id)
    }

    pub fn output_desc(&self, index: usize) -> Result<&'a TensorDesc> {
        let id = self.node.outputs().get(index).ok_or_else(|| {
            Error::Evaluation(format!("node '{}' has no output {index}", self.node.name()))
        })?;
        self.graph.tensor(*id)
    }

    /// Apply `f` to every element of input 0.
    pub fn unary_f32(&self, f: impl Fn(f32) -> f32) -> Result<Vec<Vec<f32>>> {
        Ok(vec![self.input(0)?.iter().map(|&x| f(x)).collect()])
    }

    /// Apply `f` to inputs 0 and 1, broadcasting both to the output shape.
    pub fn binary_f32(&self, f: impl Fn(f32, f32) -> f32) -> Result<Vec<Vec<f32>>> {
        let (a, b) = (self.input(0)?, self.input(1)?);
        let a_shape = self.input_desc(0)?.shape();
        let b_shape = self.input_desc(1)?.shape();
        let out = self.output_desc(0)?;

        if a_shape == b_shape {
            return Ok(vec![a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()]);
        }
        let result = (0..out.numel())
            .map(|i| {
                let x = a[broadcast_index(i, out.shape(), a_shape)];
                let y = b[broadcast_index(i, out.shape(), b_shape)];
                f(x, y)
            })
            .collect();
        Ok(vec![result])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;
    use crate::layout::Format;
    use crate::testing::MockElementwise;

    #[test]
    fn test_decompose_ctx_identity() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![3]);
        let n = graph
            .add_operator_inferred(MockElementwise::unary("Neg"), "neg", &[x])
            .unwrap();

        let ctx = DecomposeCtx::new(&graph, n).unwrap();
        let fragment = ctx.identity().unwrap();
        assert_eq!(fragment.nodes().len(), 1);
        assert_eq!(fragment.nodes()[0].op.kind(), "Neg");
        assert_eq!(fragment.outputs().len(), 1);
        assert!(ctx.input(1).is_err());
    }

    #[test]
    fn test_passthrough_proposes_input_layout_first() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![1, 16, 2, 2]);
        let n = graph
            .add_operator_inferred(MockElementwise::unary("Neg"), "neg", &[x])
            .unwrap();
        let target = TargetDescriptor::avx2();
        let blocked =
            FormatStridePair::dense(Format::Blocked { axis: 1, block: 8 }, &[1, 16, 2, 2])
                .unwrap();
        let offered = vec![vec![blocked.clone()]];

        let ctx = NegotiateCtx::new(&target, &graph, n, &offered).unwrap();
        let negotiation = ctx.passthrough().unwrap();
        assert!(negotiation.all_accepted());
        assert_eq!(
            negotiation.outputs[0],
            vec![blocked, FormatStridePair::row_major(&[1, 16, 2, 2])]
        );
    }

    #[test]
    fn test_accept_row_major_rejects_blocked() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![1, 16, 2, 2]);
        let n = graph
            .add_operator_inferred(MockElementwise::unary("Neg"), "neg", &[x])
            .unwrap();
        let target = TargetDescriptor::avx2();
        let blocked =
            FormatStridePair::dense(Format::Blocked { axis: 1, block: 8 }, &[1, 16, 2, 2])
                .unwrap();
        let offered = vec![vec![blocked]];

        let ctx = NegotiateCtx::new(&target, &graph, n, &offered).unwrap();
        assert_eq!(
            ctx.accept_row_major(0).unwrap(),
            Acceptance::Rejected {
                wanted: vec![FormatStridePair::row_major(&[1, 16, 2, 2])]
            }
        );
    }

    #[test]
    fn test_negotiate_ctx_offer_count_checked() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", DataType::F32, vec![2]);
        let n = graph
            .add_operator_inferred(MockElementwise::unary("Neg"), "neg", &[x])
            .unwrap();
        let target = TargetDescriptor::generic();
        assert!(NegotiateCtx::new(&target, &graph, n, &[]).is_err());
    }

    #[test]
    fn test_binary_broadcast() {
        let mut graph = Graph::new();
        let a = graph.add_input("a", DataType::F32, vec![2, 3]);
        let b = graph.add_input("b", DataType::F32, vec![3]);
        let n = graph
            .add_operator_inferred(MockElementwise::binary("Add"), "add", &[a, b])
            .unwrap();

        let a_data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b_data = [10.0, 20.0, 30.0];
        let node = graph.node(n).unwrap();
        let ctx = EvalCtx::new(&graph, node, vec![&a_data[..], &b_data[..]]);
        let out = ctx.binary_f32(|x, y| x + y).unwrap();
        assert_eq!(out[0], vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }
}

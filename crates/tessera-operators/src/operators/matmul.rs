//! Matrix multiplication operator.

use tessera_core::broadcast::broadcast_index;
use tessera_core::{
    Error, EvalCtx, Format, FormatStridePair, NegotiateCtx, Negotiation, Operator, Result,
    TensorSpec, broadcast_shape,
};

use crate::helpers::{common_dtype, expect_inputs};

/// Batched matrix multiplication.
///
/// Computes C = A × B where:
/// - A: [...batch..., M, K]
/// - B: [...batch..., K, N]
/// - C: [...broadcast(batch)..., M, N]
///
/// A must be row-major. B may also be read transposed (last two axes
/// swapped), which kernels handle by walking columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMulOp;

impl MatMulOp {
    pub fn new() -> Self {
        Self
    }
}

/// Dense layout of `shape` with its last two axes swapped in memory.
fn transposed_layout(shape: &[usize]) -> Option<FormatStridePair> {
    let rank = shape.len();
    if rank < 2 {
        return None;
    }
    let mut order: Vec<usize> = (0..rank).collect();
    order.swap(rank - 2, rank - 1);
    FormatStridePair::dense(Format::Permuted(order), shape).ok()
}

impl Operator for MatMulOp {
    fn kind(&self) -> &str {
        "MatMul"
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        expect_inputs("MatMul", inputs, 2)?;
        let dtype = common_dtype("MatMul", inputs)?;
        let (a, b) = (&inputs[0].shape, &inputs[1].shape);

        if a.len() < 2 || b.len() < 2 {
            return Err(Error::GraphConstruction(format!(
                "MatMul requires at least 2D tensors, got A: {a:?}, B: {b:?}"
            )));
        }

        let (m, k_a) = (a[a.len() - 2], a[a.len() - 1]);
        let (k_b, n) = (b[b.len() - 2], b[b.len() - 1]);
        if k_a != k_b {
            return Err(Error::GraphConstruction(format!(
                "MatMul K dimensions must match, got A: {a:?}, B: {b:?}"
            )));
        }

        let mut shape = broadcast_shape(&a[..a.len() - 2], &b[..b.len() - 2])?;
        shape.push(m);
        shape.push(n);
        Ok(vec![TensorSpec::new(dtype, shape)])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        let lhs = ctx.accept_row_major(0)?;

        let b_shape = ctx.input(1)?.shape();
        let row_major = FormatStridePair::row_major(b_shape);
        let transposed = transposed_layout(b_shape);
        let rhs = ctx.accept_if(
            1,
            |pair| {
                pair.equivalent(&row_major, b_shape)
                    || transposed
                        .as_ref()
                        .is_some_and(|t| pair.equivalent(t, b_shape))
            },
            vec![row_major.clone()],
        )?;

        let out_shape = ctx.output(0)?.shape();
        Ok(Negotiation::new(
            vec![lhs, rhs],
            vec![vec![FormatStridePair::row_major(out_shape)]],
        ))
    }

    fn evaluate(&self, ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        let (a, b) = (ctx.input(0)?, ctx.input(1)?);
        let a_shape = ctx.input_desc(0)?.shape();
        let b_shape = ctx.input_desc(1)?.shape();
        let out = ctx.output_desc(0)?;
        let out_shape = out.shape();

        let rank = out_shape.len();
        let (m, n) = (out_shape[rank - 2], out_shape[rank - 1]);
        let k = a_shape[a_shape.len() - 1];
        let batch_shape = &out_shape[..rank - 2];
        let batches: usize = batch_shape.iter().product();

        let a_batch = &a_shape[..a_shape.len() - 2];
        let b_batch = &b_shape[..b_shape.len() - 2];

        let mut result = vec![0.0; out.numel()];
        for batch in 0..batches {
            let a_off = broadcast_index(batch, batch_shape, a_batch) * m * k;
            let b_off = broadcast_index(batch, batch_shape, b_batch) * k * n;
            let c_off = batch * m * n;
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0.0;
                    for p in 0..k {
                        acc += a[a_off + i * k + p] * b[b_off + p * n + j];
                    }
                    result[c_off + i * n + j] = acc;
                }
            }
        }
        Ok(vec![result])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::DataType;

    fn spec(shape: &[usize]) -> TensorSpec {
        TensorSpec::new(DataType::F32, shape.to_vec())
    }

    #[test]
    fn test_matmul_shapes() {
        let op = MatMulOp::new();
        let out = op.infer_outputs(&[&spec(&[2, 3]), &spec(&[3, 4])]).unwrap();
        assert_eq!(out[0].shape, vec![2, 4]);

        let out = op
            .infer_outputs(&[&spec(&[5, 2, 3]), &spec(&[3, 4])])
            .unwrap();
        assert_eq!(out[0].shape, vec![5, 2, 4]);

        let out = op
            .infer_outputs(&[&spec(&[5, 1, 2, 3]), &spec(&[7, 3, 4])])
            .unwrap();
        assert_eq!(out[0].shape, vec![5, 7, 2, 4]);
    }

    #[test]
    fn test_matmul_rejects_bad_shapes() {
        let op = MatMulOp::new();
        assert!(op.infer_outputs(&[&spec(&[3]), &spec(&[3, 4])]).is_err());
        assert!(op.infer_outputs(&[&spec(&[2, 3]), &spec(&[5, 4])]).is_err());

        let ints = TensorSpec::new(DataType::I32, vec![3, 4]);
        assert!(op.infer_outputs(&[&spec(&[2, 3]), &ints]).is_err());
    }

    #[test]
    fn test_transposed_layout_strides() {
        let pair = transposed_layout(&[3, 4]).unwrap();
        assert_eq!(pair.format, Format::Permuted(vec![1, 0]));
        assert_eq!(pair.strides, vec![3, 1]);
        assert!(transposed_layout(&[4]).is_none());
    }
}

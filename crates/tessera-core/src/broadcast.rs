//! NumPy-style broadcasting helpers for shape inference and reference evaluation.

use crate::{Error, Result};

/// Compute NumPy-style broadcast output shape from two input shapes.
///
/// Implements NumPy broadcasting rules:
/// - Shapes are aligned from the rightmost dimension
/// - Dimensions match if they are equal or one of them is 1
/// - Missing dimensions in shorter shapes are treated as 1
///
/// # Example
///
/// ```text
/// broadcast_shape(&[2, 3, 4], &[3, 4])    -> [2, 3, 4]
/// broadcast_shape(&[2, 3, 4], &[2, 1, 4]) -> [2, 3, 4]
/// broadcast_shape(&[8, 1, 6, 1], &[7, 1, 5]) -> [8, 7, 6, 5]
/// ```
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let max_rank = a.len().max(b.len());
    let mut result = Vec::with_capacity(max_rank);

    for i in 0..max_rank {
        let da = if i < max_rank - a.len() {
            1
        } else {
            a[i - (max_rank - a.len())]
        };
        let db = if i < max_rank - b.len() {
            1
        } else {
            b[i - (max_rank - b.len())]
        };

        if da == db {
            result.push(da);
        } else if da == 1 {
            result.push(db);
        } else if db == 1 {
            result.push(da);
        } else {
            return Err(Error::GraphConstruction(format!(
                "Cannot broadcast shapes {:?} and {:?} at dimension {i}",
                a, b
            )));
        }
    }

    Ok(result)
}

/// Map a flat row-major index into a broadcast output back to the flat
/// index of the input element it reads.
///
/// `in_shape` must broadcast to `out_shape`.
pub fn broadcast_index(flat: usize, out_shape: &[usize], in_shape: &[usize]) -> usize {
    let offset = out_shape.len() - in_shape.len();
    let mut remaining = flat;
    let mut index = 0;
    let mut stride = 1;
    for axis in (0..out_shape.len()).rev() {
        let coord = remaining % out_shape[axis].max(1);
        remaining /= out_shape[axis].max(1);
        if axis >= offset {
            let dim = in_shape[axis - offset];
            if dim != 1 {
                index += coord * stride;
            }
            stride *= dim;
        }
    }
    index
}

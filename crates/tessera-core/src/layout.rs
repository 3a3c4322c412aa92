//! Memory layout currency: formats, explicit strides, and structural equivalence.
//!
//! A `FormatStridePair` is what negotiation hands around. The `Format` decides
//! how logical axes map onto physical dimensions; the strides give the
//! distance in elements between neighbours along each physical dimension,
//! outermost first.

use crate::{Error, Result};
use std::fmt;

/// Layout tag describing how logical axes map to physical dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    /// Logical order, last axis innermost.
    RowMajor,

    /// Axis 1 (channels) moved innermost: `N, D.., C` for rank >= 3.
    ChannelsLast,

    /// Arbitrary axis order, outermost first.
    Permuted(Vec<usize>),

    /// `axis` split into `ceil(dim / block)` outer blocks and an innermost
    /// block of `block` elements (e.g. `nChw8c`).
    Blocked { axis: usize, block: usize },
}

/// One physical dimension of a format applied to a concrete shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalDim {
    /// Logical axis this dimension iterates.
    pub axis: usize,
    pub extent: usize,
}

impl Format {
    /// Physical dimensions of this format for `shape`, outermost first.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedFormat` if the format cannot describe a
    /// tensor of this rank.
    pub fn physical_dims(&self, shape: &[usize]) -> Result<Vec<PhysicalDim>> {
        let rank = shape.len();
        let order: Vec<usize> = match self {
            Format::RowMajor => (0..rank).collect(),
            Format::ChannelsLast => {
                if rank < 3 {
                    return Err(Error::UnsupportedFormat(format!(
                        "channels-last requires rank >= 3, got shape {shape:?}"
                    )));
                }
                let mut order = vec![0];
                order.extend(2..rank);
                order.push(1);
                order
            }
            Format::Permuted(order) => {
                let mut seen = vec![false; rank];
                let valid = order.len() == rank
                    && order.iter().all(|&axis| {
                        axis < rank && !std::mem::replace(&mut seen[axis], true)
                    });
                if !valid {
                    return Err(Error::UnsupportedFormat(format!(
                        "{order:?} is not a permutation of the axes of {shape:?}"
                    )));
                }
                order.clone()
            }
            Format::Blocked { axis, block } => {
                if *axis >= rank || *block == 0 {
                    return Err(Error::UnsupportedFormat(format!(
                        "cannot block axis {axis} by {block} for shape {shape:?}"
                    )));
                }
                let mut dims: Vec<PhysicalDim> = shape
                    .iter()
                    .enumerate()
                    .map(|(a, &d)| PhysicalDim {
                        axis: a,
                        extent: if a == *axis { d.div_ceil(*block) } else { d },
                    })
                    .collect();
                dims.push(PhysicalDim {
                    axis: *axis,
                    extent: *block,
                });
                return Ok(dims);
            }
        };

        Ok(order
            .into_iter()
            .map(|axis| PhysicalDim {
                axis,
                extent: shape[axis],
            })
            .collect())
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Format::Blocked { .. })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::RowMajor => f.write_str("row_major"),
            Format::ChannelsLast => f.write_str("channels_last"),
            Format::Permuted(order) => write!(f, "permuted{order:?}"),
            Format::Blocked { axis, block } => write!(f, "blocked(axis={axis}, block={block})"),
        }
    }
}

// ──────────────────────────── FormatStridePair ───────────────────────────

/// A format together with explicit strides, one per physical dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormatStridePair {
    pub format: Format,
    pub strides: Vec<usize>,
}

impl FormatStridePair {
    pub fn new(format: Format, strides: Vec<usize>) -> Self {
        Self { format, strides }
    }

    /// Densely packed strides for `format` applied to `shape`.
    ///
    /// Blocked formats pad the split axis up to a whole number of blocks.
    pub fn dense(format: Format, shape: &[usize]) -> Result<Self> {
        let dims = format.physical_dims(shape)?;
        let mut strides = vec![0; dims.len()];
        let mut acc = 1;
        for (i, dim) in dims.iter().enumerate().rev() {
            strides[i] = acc;
            acc *= dim.extent.max(1);
        }
        Ok(Self { format, strides })
    }

    /// Densely packed row-major layout.
    pub fn row_major(shape: &[usize]) -> Self {
        let mut strides = vec![0; shape.len()];
        let mut acc = 1;
        for (i, &d) in shape.iter().enumerate().rev() {
            strides[i] = acc;
            acc *= d.max(1);
        }
        Self {
            format: Format::RowMajor,
            strides,
        }
    }

    /// Check that the pair describes `shape`: the format fits the rank, there
    /// is one stride per physical dimension, and no two elements overlap.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        let dims = self.format.physical_dims(shape)?;
        if dims.len() != self.strides.len() {
            return Err(Error::UnsupportedFormat(format!(
                "{} has {} physical dimensions for shape {shape:?}, got {} strides",
                self.format,
                dims.len(),
                self.strides.len()
            )));
        }

        let mut span = 1;
        for (dim, &stride) in dims.iter().zip(&self.strides).rev() {
            if dim.extent <= 1 {
                continue;
            }
            if stride < span {
                return Err(Error::UnsupportedFormat(format!(
                    "strides {:?} overlap for {} on shape {shape:?}",
                    self.strides, self.format
                )));
            }
            span = stride * dim.extent;
        }
        Ok(())
    }

    /// Whether the strides are exactly the packed strides of the format.
    pub fn is_dense(&self, shape: &[usize]) -> bool {
        match Self::dense(self.format.clone(), shape) {
            Ok(dense) => self.canonical(shape) == dense.canonical(shape),
            Err(_) => false,
        }
    }

    /// Whether the innermost non-trivial physical dimension has stride 1.
    pub fn has_unit_inner_stride(&self, shape: &[usize]) -> bool {
        match self.canonical(shape) {
            Some(dims) => dims.last().is_none_or(|&(_, _, stride)| stride == 1),
            None => false,
        }
    }

    /// Structural equivalence for a given shape.
    ///
    /// Two pairs are equivalent when their sequences of
    /// `(axis, extent, stride)`, with extent-1 dimensions dropped, coincide.
    /// So a row-major pair, the identity permutation, and a blocking whose
    /// block spans the whole axis all compare equal when strides agree.
    pub fn equivalent(&self, other: &FormatStridePair, shape: &[usize]) -> bool {
        match (self.canonical(shape), other.canonical(shape)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn canonical(&self, shape: &[usize]) -> Option<Vec<(usize, usize, usize)>> {
        let dims = self.format.physical_dims(shape).ok()?;
        if dims.len() != self.strides.len() {
            return None;
        }
        Some(
            dims.iter()
                .zip(&self.strides)
                .filter(|(dim, _)| dim.extent != 1)
                .map(|(dim, &stride)| (dim.axis, dim.extent, stride))
                .collect(),
        )
    }
}

impl fmt::Display for FormatStridePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.format, self.strides)
    }
}

// ──────────────────────────────── Layout ─────────────────────────────────

/// Layout state of a tensor: open until negotiation fixes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    Unconstrained,
    Fixed(FormatStridePair),
}

impl Layout {
    pub fn is_fixed(&self) -> bool {
        matches!(self, Layout::Fixed(_))
    }

    pub fn as_fixed(&self) -> Option<&FormatStridePair> {
        match self {
            Layout::Fixed(pair) => Some(pair),
            Layout::Unconstrained => None,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Unconstrained => f.write_str("?"),
            Layout::Fixed(pair) => write!(f, "{pair}"),
        }
    }
}

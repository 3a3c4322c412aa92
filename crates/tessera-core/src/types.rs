//! Core types for element types, tensor specs, and tensor descriptors.

use crate::layout::{FormatStridePair, Layout};
use crate::{Error, Result};
use std::fmt;

/// Element data type of a tensor. Every type has a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    BF16,
    I32,
    I8,
    U8,
}

impl DataType {
    /// Size of this data type in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Whether this is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F16 | DataType::BF16)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I32 => "i32",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
        };
        f.write_str(name)
    }
}

// ──────────────────────────────── TensorSpec ─────────────────────────────

/// Element type and logical shape of a tensor, without a layout.
///
/// This is what `Operator::infer_outputs` produces and what fragments and
/// graphs compare when checking that a rewrite preserves a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorSpec {
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    /// Create a new tensor spec.
    pub fn new(dtype: DataType, shape: Vec<usize>) -> Self {
        Self { dtype, shape }
    }

    /// Number of logical dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements (1 for a rank-0 tensor).
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)
    }
}

// ──────────────────────────────── TensorDesc ─────────────────────────────

/// A tensor owned by a `Graph`.
///
/// The spec (dtype and shape) is immutable once created. The layout starts
/// out `Unconstrained` and can be fixed exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    name: String,
    spec: TensorSpec,
    layout: Layout,
}

impl TensorDesc {
    /// Create a new descriptor with an unconstrained layout.
    pub fn new(name: impl Into<String>, dtype: DataType, shape: Vec<usize>) -> Self {
        Self::from_spec(name, TensorSpec::new(dtype, shape))
    }

    /// Create a new descriptor from a spec.
    pub fn from_spec(name: impl Into<String>, spec: TensorSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            layout: Layout::Unconstrained,
        }
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn dtype(&self) -> DataType {
        self.spec.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.spec.shape
    }

    pub fn rank(&self) -> usize {
        self.spec.rank()
    }

    pub fn numel(&self) -> usize {
        self.spec.numel()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The fixed layout, if negotiation has decided one.
    pub fn fixed_layout(&self) -> Option<&FormatStridePair> {
        self.layout.as_fixed()
    }

    /// Fix the layout of this tensor.
    ///
    /// # Errors
    ///
    /// Returns `Error::LayoutAlreadyFixed` if a layout was already fixed, or
    /// `Error::UnsupportedFormat` if the pair does not describe this shape.
    pub(crate) fn fix_layout(&mut self, pair: FormatStridePair) -> Result<()> {
        if let Layout::Fixed(existing) = &self.layout {
            return Err(Error::LayoutAlreadyFixed(format!(
                "tensor '{}' is already fixed to {existing}, cannot refix to {pair}",
                self.name
            )));
        }
        pair.validate(self.shape())?;
        self.layout = Layout::Fixed(pair);
        Ok(())
    }
}

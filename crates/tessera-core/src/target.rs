//! Target descriptor: what the code generator can consume natively.

use crate::layout::{Format, FormatStridePair};
use crate::types::DataType;

/// Largest inner block any target accepts.
const MAX_BLOCK: usize = 64;

/// Capabilities of a code-generation target that negotiation needs to know.
///
/// Targets are immutable once built and are shared between compilations as
/// `Arc<TargetDescriptor>`.
///
/// # Example
///
/// ```
/// use tessera_core::{DataType, TargetDescriptor};
///
/// let target = TargetDescriptor::avx2();
/// assert_eq!(target.lanes(DataType::F32), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Name used in logs.
    pub name: String,

    /// Preferred vector width in bytes.
    pub vector_width: usize,

    /// Whether kernels can consume channel-blocked formats.
    pub blocked_formats: bool,

    /// Whether kernels can consume channels-last formats.
    pub channels_last: bool,

    /// Whether strides may leave gaps (padding) between rows.
    pub padded_strides: bool,

    /// Default floating-point tensors of rank >= 3 to channels-last.
    pub prefer_channels_last: bool,
}

impl TargetDescriptor {
    /// Portable 128-bit target with plain layouts only.
    pub fn generic() -> Self {
        Self {
            name: "generic".to_string(),
            vector_width: 16,
            blocked_formats: false,
            channels_last: false,
            padded_strides: true,
            prefer_channels_last: false,
        }
    }

    pub fn avx2() -> Self {
        Self {
            name: "avx2".to_string(),
            vector_width: 32,
            blocked_formats: true,
            channels_last: true,
            padded_strides: true,
            prefer_channels_last: false,
        }
    }

    pub fn avx512() -> Self {
        Self {
            name: "avx512".to_string(),
            vector_width: 64,
            blocked_formats: true,
            channels_last: true,
            padded_strides: true,
            prefer_channels_last: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_vector_width(mut self, bytes: usize) -> Self {
        self.vector_width = bytes;
        self
    }

    pub fn with_blocked_formats(mut self, enabled: bool) -> Self {
        self.blocked_formats = enabled;
        self
    }

    pub fn with_channels_last(mut self, enabled: bool) -> Self {
        self.channels_last = enabled;
        self
    }

    pub fn with_padded_strides(mut self, enabled: bool) -> Self {
        self.padded_strides = enabled;
        self
    }

    pub fn with_preferred_channels_last(mut self, enabled: bool) -> Self {
        self.prefer_channels_last = enabled;
        self
    }

    /// Number of `dtype` elements in one vector register.
    pub fn lanes(&self, dtype: DataType) -> usize {
        (self.vector_width / dtype.size()).max(1)
    }

    /// Default layout for a tensor nobody has an opinion about.
    pub fn preferred_layout(&self, dtype: DataType, shape: &[usize]) -> FormatStridePair {
        if self.prefer_channels_last && self.channels_last && dtype.is_float() && shape.len() >= 3
        {
            if let Ok(pair) = FormatStridePair::dense(Format::ChannelsLast, shape) {
                return pair;
            }
        }
        FormatStridePair::row_major(shape)
    }

    /// Dense layout blocking `axis` by the vector lane count, if this target
    /// handles blocked formats and the axis is a whole number of blocks.
    pub fn blocked_layout(
        &self,
        dtype: DataType,
        shape: &[usize],
        axis: usize,
    ) -> Option<FormatStridePair> {
        if !self.blocked_formats {
            return None;
        }
        let block = self.lanes(dtype);
        let dim = *shape.get(axis)?;
        if block <= 1 || dim == 0 || dim % block != 0 {
            return None;
        }
        FormatStridePair::dense(Format::Blocked { axis, block }, shape).ok()
    }

    /// Whether kernels for this target can consume `pair` directly.
    pub fn supports(&self, pair: &FormatStridePair, dtype: DataType, shape: &[usize]) -> bool {
        if pair.validate(shape).is_err() || !pair.has_unit_inner_stride(shape) {
            return false;
        }
        if !self.padded_strides && !pair.is_dense(shape) {
            return false;
        }
        match &pair.format {
            Format::RowMajor | Format::Permuted(_) => true,
            Format::ChannelsLast => self.channels_last,
            Format::Blocked { block, .. } => {
                self.blocked_formats
                    && block.is_power_of_two()
                    && *block > 1
                    && *block <= MAX_BLOCK.min(self.lanes(dtype) * 2)
            }
        }
    }
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self::generic()
    }
}

//! 2-D convolution.

use tessera_core::{
    Acceptance, Attributes, Error, EvalCtx, FormatStridePair, NegotiateCtx, Negotiation, Operator,
    Result, TensorSpec,
};

use crate::helpers::common_dtype;

/// Typed `Conv2d` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv2dConfig {
    /// `[stride_h, stride_w]`
    pub strides: [usize; 2],

    /// `[top, left, bottom, right]`
    pub pads: [usize; 4],

    /// `[dilation_h, dilation_w]`
    pub dilations: [usize; 2],

    pub group: usize,
}

impl Default for Conv2dConfig {
    fn default() -> Self {
        Self {
            strides: [1, 1],
            pads: [0; 4],
            dilations: [1, 1],
            group: 1,
        }
    }
}

impl Conv2dConfig {
    /// Reads `strides`, `pads` (2 symmetric or 4 explicit values),
    /// `dilations` and `group`.
    pub fn from_attributes(attrs: &Attributes) -> crate::Result<Self> {
        let strides = pair_attr(attrs, "strides", 1)?;
        let dilations = pair_attr(attrs, "dilations", 1)?;

        let pads = match positive_list(attrs, "pads", &[0, 0, 0, 0], true)?.as_slice() {
            &[h, w] => [h, w, h, w],
            &[t, l, b, r] => [t, l, b, r],
            other => {
                return Err(invalid_config(format!(
                    "pads must have 2 or 4 values, got {other:?}"
                )));
            }
        };

        let group = attrs.i64_or("group", 1)?;
        if group < 1 {
            return Err(invalid_config(format!("group must be positive, got {group}")));
        }

        Ok(Self {
            strides,
            pads,
            dilations,
            group: group as usize,
        })
    }

    /// Strides, dilations and group must all be at least 1.
    pub fn validate(&self) -> Result<()> {
        if self.group == 0 || self.strides.contains(&0) || self.dilations.contains(&0) {
            return Err(Error::GraphConstruction(format!(
                "Conv2d needs positive strides, dilations and group, got strides {:?}, \
                 dilations {:?}, group {}",
                self.strides, self.dilations, self.group
            )));
        }
        Ok(())
    }
}

fn invalid_config(message: String) -> crate::Error {
    crate::Error::InvalidConfig {
        kind: "Conv2d",
        message,
    }
}

/// Read an int list attribute, rejecting negatives (and zeros unless
/// `allow_zero`).
fn positive_list(
    attrs: &Attributes,
    key: &str,
    default: &[i64],
    allow_zero: bool,
) -> crate::Result<Vec<usize>> {
    attrs
        .ints_or(key, default)?
        .into_iter()
        .map(|v| {
            if v < 0 || (v == 0 && !allow_zero) {
                Err(invalid_config(format!("{key} has invalid value {v}")))
            } else {
                Ok(v as usize)
            }
        })
        .collect()
}

fn pair_attr(attrs: &Attributes, key: &str, default: i64) -> crate::Result<[usize; 2]> {
    match positive_list(attrs, key, &[default, default], false)?.as_slice() {
        &[h, w] => Ok([h, w]),
        other => Err(invalid_config(format!(
            "{key} must have 2 values, got {other:?}"
        ))),
    }
}

/// 2-D convolution over NCHW input.
///
/// Inputs: `x [N, C, H, W]`, `w [OC, C / group, KH, KW]`, optional
/// `bias [OC]`. The source may be read row-major or channel-blocked
/// (`nChw{lanes}c`); weights and bias are row-major. The output prefers the
/// channel-blocked layout when the target has one for it.
#[derive(Debug, Clone, Default)]
pub struct Conv2dOp {
    config: Conv2dConfig,
}

impl Conv2dOp {
    pub fn new(config: Conv2dConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    /// Output spatial extent along one axis.
    fn output_extent(&self, input: usize, kernel: usize, axis: usize) -> Result<usize> {
        let c = &self.config;
        let overflow = || {
            Error::GraphConstruction(format!(
                "Conv2d extent overflows on axis {} with pads {:?}",
                axis + 2,
                c.pads
            ))
        };
        let padded = input
            .checked_add(c.pads[axis])
            .and_then(|v| v.checked_add(c.pads[axis + 2]))
            .ok_or_else(overflow)?;
        let span = c.dilations[axis]
            .checked_mul(kernel.saturating_sub(1))
            .and_then(|v| v.checked_add(1))
            .ok_or_else(overflow)?;
        if kernel == 0 || padded < span {
            return Err(Error::GraphConstruction(format!(
                "Conv2d kernel extent {span} exceeds padded input {padded} on axis {}",
                axis + 2
            )));
        }
        Ok((padded - span) / c.strides[axis] + 1)
    }
}

impl Operator for Conv2dOp {
    fn kind(&self) -> &str {
        "Conv2d"
    }

    fn infer_outputs(&self, inputs: &[&TensorSpec]) -> Result<Vec<TensorSpec>> {
        if !(2..=3).contains(&inputs.len()) {
            return Err(Error::GraphConstruction(format!(
                "Conv2d expects 2 or 3 inputs, got {}",
                inputs.len()
            )));
        }
        self.config.validate()?;
        let dtype = common_dtype("Conv2d", inputs)?;
        let (x, w) = (&inputs[0].shape, &inputs[1].shape);
        if x.len() != 4 || w.len() != 4 {
            return Err(Error::GraphConstruction(format!(
                "Conv2d expects 4D input and weights, got {x:?} and {w:?}"
            )));
        }

        let (n, c, h, wd) = (x[0], x[1], x[2], x[3]);
        let (oc, cg, kh, kw) = (w[0], w[1], w[2], w[3]);
        let group = self.config.group;
        if c % group != 0 || oc % group != 0 || cg.checked_mul(group) != Some(c) {
            return Err(Error::GraphConstruction(format!(
                "Conv2d weights {w:?} do not match {c} input channels in {group} groups"
            )));
        }
        if let Some(bias) = inputs.get(2) {
            if bias.shape != [oc] {
                return Err(Error::GraphConstruction(format!(
                    "Conv2d bias must be [{oc}], got {:?}",
                    bias.shape
                )));
            }
        }

        let oh = self.output_extent(h, kh, 0)?;
        let ow = self.output_extent(wd, kw, 1)?;
        Ok(vec![TensorSpec::new(dtype, vec![n, oc, oh, ow])])
    }

    fn negotiate_format(&self, ctx: &NegotiateCtx) -> Result<Negotiation> {
        let x = ctx.input(0)?;
        let row_major = FormatStridePair::row_major(x.shape());
        let blocked = ctx.target.blocked_layout(x.dtype(), x.shape(), 1);

        let mut wanted: Vec<FormatStridePair> = blocked.iter().cloned().collect();
        wanted.push(row_major.clone());
        let src = ctx.accept_if(
            0,
            |pair| {
                pair.equivalent(&row_major, x.shape())
                    || blocked
                        .as_ref()
                        .is_some_and(|b| pair.equivalent(b, x.shape()))
            },
            wanted,
        )?;

        let mut inputs: Vec<Acceptance> = vec![src];
        for i in 1..ctx.input_count() {
            inputs.push(ctx.accept_row_major(i)?);
        }

        let out = ctx.output(0)?;
        let mut proposals: Vec<FormatStridePair> = ctx
            .target
            .blocked_layout(out.dtype(), out.shape(), 1)
            .into_iter()
            .collect();
        proposals.push(FormatStridePair::row_major(out.shape()));

        Ok(Negotiation::new(inputs, vec![proposals]))
    }

    fn evaluate(&self, ctx: &EvalCtx) -> Result<Vec<Vec<f32>>> {
        let x = ctx.input(0)?;
        let w = ctx.input(1)?;
        let bias = if ctx.input_count() > 2 {
            Some(ctx.input(2)?)
        } else {
            None
        };
        let xs = ctx.input_desc(0)?.shape();
        let ws = ctx.input_desc(1)?.shape();
        let os = ctx.output_desc(0)?.shape();

        let (n, c, h, wd) = (xs[0], xs[1], xs[2], xs[3]);
        let (oc, cg, kh, kw) = (ws[0], ws[1], ws[2], ws[3]);
        let (oh, ow) = (os[2], os[3]);
        let cfg = &self.config;
        let oc_per_group = oc / cfg.group;

        let mut out = vec![0.0; n * oc * oh * ow];
        for b in 0..n {
            for o in 0..oc {
                let g = o / oc_per_group;
                for y in 0..oh {
                    for xo in 0..ow {
                        let mut acc = bias.map_or(0.0, |bias| bias[o]);
                        for ci in 0..cg {
                            let channel = g * cg + ci;
                            for ky in 0..kh {
                                let iy = (y * cfg.strides[0] + ky * cfg.dilations[0])
                                    .checked_sub(cfg.pads[0]);
                                let Some(iy) = iy.filter(|&iy| iy < h) else {
                                    continue;
                                };
                                for kx in 0..kw {
                                    let ix = (xo * cfg.strides[1] + kx * cfg.dilations[1])
                                        .checked_sub(cfg.pads[1]);
                                    let Some(ix) = ix.filter(|&ix| ix < wd) else {
                                        continue;
                                    };
                                    acc += x[((b * c + channel) * h + iy) * wd + ix]
                                        * w[((o * cg + ci) * kh + ky) * kw + kx];
                                }
                            }
                        }
                        out[((b * oc + o) * oh + y) * ow + xo] = acc;
                    }
                }
            }
        }
        Ok(vec![out])
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
    fn test_conv_output_shape() {
        let op = Conv2dOp::default();
        let out = op
            .infer_outputs(&[&spec(&[1, 3, 8, 8]), &spec(&[16, 3, 3, 3])])
            .unwrap();
        assert_eq!(out[0].shape, vec![1, 16, 6, 6]);

        let padded = Conv2dOp::new(Conv2dConfig {
            strides: [2, 2],
            pads: [1, 1, 1, 1],
            ..Default::default()
        });
        let out = padded
            .infer_outputs(&[
                &spec(&[2, 4, 9, 9]),
                &spec(&[8, 4, 3, 3]),
                &spec(&[8]),
            ])
            .unwrap();
        assert_eq!(out[0].shape, vec![2, 8, 5, 5]);
    }

    #[test]
    fn test_conv_rejects_channel_mismatch() {
        let op = Conv2dOp::default();
        assert!(
            op.infer_outputs(&[&spec(&[1, 3, 8, 8]), &spec(&[16, 4, 3, 3])])
                .is_err()
        );
        assert!(
            op.infer_outputs(&[&spec(&[1, 3, 8, 8]), &spec(&[16, 3, 3, 3]), &spec(&[8])])
                .is_err()
        );
        assert!(
            op.infer_outputs(&[&spec(&[1, 3, 2, 2]), &spec(&[16, 3, 3, 3])])
                .is_err()
        );
    }

    #[test]
    fn test_conv_grouped() {
        let op = Conv2dOp::new(Conv2dConfig {
            group: 2,
            ..Default::default()
        });
        let out = op
            .infer_outputs(&[&spec(&[1, 4, 5, 5]), &spec(&[6, 2, 1, 1])])
            .unwrap();
        assert_eq!(out[0].shape, vec![1, 6, 5, 5]);
    }

    #[test]
    fn test_conv_rejects_zero_config_values() {
        let x = spec(&[1, 4, 8, 8]);
        let w = spec(&[4, 4, 3, 3]);
        let configs = [
            Conv2dConfig {
                group: 0,
                ..Default::default()
            },
            Conv2dConfig {
                strides: [0, 1],
                ..Default::default()
            },
            Conv2dConfig {
                dilations: [1, 0],
                ..Default::default()
            },
        ];
        for config in configs {
            let result = Conv2dOp::new(config).infer_outputs(&[&x, &w]);
            assert!(matches!(result, Err(Error::GraphConstruction(_))));
        }
    }

    #[test]
    fn test_conv_rejects_overflowing_pads() {
        let attrs = Attributes::new().with("pads", vec![i64::MAX, i64::MAX]);
        let op = Conv2dOp::new(Conv2dConfig::from_attributes(&attrs).unwrap());
        let result = op.infer_outputs(&[&spec(&[1, 3, 8, 8]), &spec(&[16, 3, 3, 3])]);
        assert!(matches!(result, Err(Error::GraphConstruction(_))));

        let dilated = Conv2dOp::new(Conv2dConfig {
            dilations: [usize::MAX, 1],
            ..Default::default()
        });
        let result = dilated.infer_outputs(&[&spec(&[1, 3, 8, 8]), &spec(&[16, 3, 3, 3])]);
        assert!(matches!(result, Err(Error::GraphConstruction(_))));
    }

    #[test]
    fn test_config_from_attributes() {
        let attrs = Attributes::new()
            .with("strides", vec![2i64, 2])
            .with("pads", vec![1i64, 2])
            .with("group", 1i64);
        let config = Conv2dConfig::from_attributes(&attrs).unwrap();
        assert_eq!(config.strides, [2, 2]);
        assert_eq!(config.pads, [1, 2, 1, 2]);
        assert_eq!(config.dilations, [1, 1]);

        let bad = Attributes::new().with("strides", vec![0i64, 1]);
        assert!(Conv2dConfig::from_attributes(&bad).is_err());
        let bad = Attributes::new().with("pads", vec![1i64, 1, 1]);
        assert!(Conv2dConfig::from_attributes(&bad).is_err());
        let bad = Attributes::new().with("group", 0i64);
        assert!(Conv2dConfig::from_attributes(&bad).is_err());
    }
}

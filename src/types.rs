use crate::error::{ConvError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F32,
    S32,
    S16,
    S8,
    U8,
}

impl DataType {
    pub fn size(self) -> usize {
        match self {
            DataType::F32 | DataType::S32 => 4,
            DataType::S16 => 2,
            DataType::S8 | DataType::U8 => 1,
        }
    }

    pub fn is_int8(self) -> bool { matches!(self, DataType::S8 | DataType::U8) }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::F32 => "f32",
            DataType::S32 => "s32",
            DataType::S16 => "s16",
            DataType::S8 => "s8",
            DataType::U8 => "u8",
        };
        f.write_str(s)
    }
}

impl FromStr for DataType {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" => Ok(DataType::F32),
            "s32" => Ok(DataType::S32),
            "s16" => Ok(DataType::S16),
            "s8" => Ok(DataType::S8),
            "u8" => Ok(DataType::U8),
            other => Err(ConvError::invalid(format!("unknown data type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    ForwardTraining,
    ForwardInference,
    BackwardData,
    BackwardWeights,
}

impl PropKind {
    pub fn is_forward(self) -> bool { matches!(self, PropKind::ForwardTraining | PropKind::ForwardInference) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgKind {
    ConvolutionDirect,
    ConvolutionWinograd,
}

/// Physical layout of a tensor. Activations use `Nchw`/`Nhwc`, weights the
/// `o`/`g` formats (4D without groups, 5D with), bias is `X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Nchw,
    Nhwc,
    Oihw,
    Ohwi,
    Goihw,
    Gohwi,
    X,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDesc {
    pub dims: Vec<usize>,
    pub data_type: DataType,
    pub format: Format,
}

impl MemoryDesc {
    pub fn new(dims: &[usize], data_type: DataType, format: Format) -> Self {
        Self { dims: dims.to_vec(), data_type, format }
    }

    pub fn ndims(&self) -> usize { self.dims.len() }

    pub fn nelems(&self) -> usize { self.dims.iter().product() }

    pub fn size_bytes(&self) -> usize { self.nelems() * self.data_type.size() }
}

/// Immutable description of a convolution. Dilations follow the "0 means
/// dense" convention.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvDesc {
    pub prop_kind: PropKind,
    pub alg_kind: AlgKind,
    pub src_desc: MemoryDesc,
    pub weights_desc: MemoryDesc,
    pub bias_desc: Option<MemoryDesc>,
    pub dst_desc: MemoryDesc,
    pub strides: [usize; 2],
    pub dilates: [usize; 2],
    pub padding_l: [usize; 2],
    pub padding_r: [usize; 2],
    pub accum_data_type: DataType,
}

/// Accumulation type implied by the src/weights pair.
pub fn default_accum_data_type(src: DataType, weights: DataType) -> DataType {
    match (src, weights) {
        (DataType::U8 | DataType::S8, DataType::S8) => DataType::S32,
        (DataType::S16, DataType::S16) => DataType::S32,
        _ => DataType::F32,
    }
}

fn out_size(input: usize, kernel: usize, stride: usize, dilate: usize, pad_l: usize, pad_r: usize) -> Option<usize> {
    let ext = (kernel - 1) * (dilate + 1) + 1;
    let span = (input + pad_l + pad_r).checked_sub(ext)?;
    Some(span / stride + 1)
}

impl ConvDesc {
    /// Builds a 2D forward convolution request and checks that the shapes agree.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        prop_kind: PropKind,
        alg_kind: AlgKind,
        src_desc: MemoryDesc,
        weights_desc: MemoryDesc,
        bias_desc: Option<MemoryDesc>,
        dst_desc: MemoryDesc,
        strides: [usize; 2],
        padding_l: [usize; 2],
        padding_r: [usize; 2],
    ) -> Result<Self> {
        Self::forward_dilated(prop_kind, alg_kind, src_desc, weights_desc, bias_desc, dst_desc, strides, [0, 0], padding_l, padding_r)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn forward_dilated(
        prop_kind: PropKind,
        alg_kind: AlgKind,
        src_desc: MemoryDesc,
        weights_desc: MemoryDesc,
        bias_desc: Option<MemoryDesc>,
        dst_desc: MemoryDesc,
        strides: [usize; 2],
        dilates: [usize; 2],
        padding_l: [usize; 2],
        padding_r: [usize; 2],
    ) -> Result<Self> {
        let desc = Self {
            prop_kind,
            alg_kind,
            accum_data_type: default_accum_data_type(src_desc.data_type, weights_desc.data_type),
            src_desc,
            weights_desc,
            bias_desc,
            dst_desc,
            strides,
            dilates,
            padding_l,
            padding_r,
        };
        desc.check_shapes()?;
        Ok(desc)
    }

    /// Checks that src, weights, bias and dst agree with each other and with
    /// the strides, dilations and padding.
    pub fn check_shapes(&self) -> Result<()> {
        let (src_desc, weights_desc, dst_desc) = (&self.src_desc, &self.weights_desc, &self.dst_desc);
        let (strides, dilates, padding_l, padding_r) = (self.strides, self.dilates, self.padding_l, self.padding_r);
        if src_desc.ndims() != 4 || dst_desc.ndims() != 4 {
            return Err(ConvError::invalid("src and dst must be 4D (n, c, h, w)"));
        }
        let with_groups = match weights_desc.ndims() {
            4 => false,
            5 => true,
            n => return Err(ConvError::invalid(format!("weights must be 4D or 5D, got {}D", n))),
        };
        if strides.iter().any(|&s| s == 0) {
            return Err(ConvError::invalid("strides must be positive"));
        }
        let w = &weights_desc.dims;
        let (g, oc, ic, kh, kw) = if with_groups { (w[0], w[1], w[2], w[3], w[4]) } else { (1, w[0], w[1], w[2], w[3]) };
        if g == 0 || kh == 0 || kw == 0 {
            return Err(ConvError::invalid("empty weights"));
        }
        let (mb, src_c, ih, iw) = (src_desc.dims[0], src_desc.dims[1], src_desc.dims[2], src_desc.dims[3]);
        let (dst_mb, dst_c, oh, ow) = (dst_desc.dims[0], dst_desc.dims[1], dst_desc.dims[2], dst_desc.dims[3]);
        if mb != dst_mb {
            return Err(ConvError::invalid(format!("minibatch mismatch: src {} vs dst {}", mb, dst_mb)));
        }
        if src_c != g * ic || dst_c != g * oc {
            return Err(ConvError::invalid(format!(
                "channel mismatch: src {} dst {} vs weights g{} ic{} oc{}", src_c, dst_c, g, ic, oc
            )));
        }
        let exp_oh = out_size(ih, kh, strides[0], dilates[0], padding_l[0], padding_r[0]);
        let exp_ow = out_size(iw, kw, strides[1], dilates[1], padding_l[1], padding_r[1]);
        if exp_oh != Some(oh) || exp_ow != Some(ow) {
            return Err(ConvError::invalid(format!(
                "output spatial size {}x{} does not match expected {:?}x{:?}", oh, ow, exp_oh, exp_ow
            )));
        }
        if let Some(b) = &self.bias_desc {
            if b.ndims() != 1 || b.dims[0] != g * oc {
                return Err(ConvError::invalid(format!("bias must be 1D of size {}", g * oc)));
            }
        }
        Ok(())
    }

    pub fn with_accum_data_type(mut self, dt: DataType) -> Self {
        self.accum_data_type = dt;
        self
    }

    pub fn with_groups(&self) -> bool { self.weights_desc.ndims() == self.src_desc.ndims() + 1 }

    pub fn with_bias(&self) -> bool { self.bias_desc.is_some() }

    pub fn ngroups(&self) -> usize { if self.with_groups() { self.weights_desc.dims[0] } else { 1 } }

    /// Total output channels across all groups.
    pub fn oc_total(&self) -> usize { self.dst_desc.dims[1] }

    pub fn ic_total(&self) -> usize { self.src_desc.dims[1] }
}

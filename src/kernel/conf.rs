use log::debug;

use crate::attr::{Attr, RoundMode, PER_OC_MASK};
use crate::error::{ConvError, Result};
use crate::isa::CpuIsa;
use crate::types::{ConvDesc, DataType, Format};

/// Weight scale applied when the input is signed, keeping pairwise u8*s8
/// products clear of 16-bit saturation in the vector kernel.
pub const SIGNED_INPUT_WEI_ADJ_SCALE: f32 = 0.5;

/// Registers the output tile of one row may occupy.
const OUTPUT_TILE_REGS: usize = 12;

/// Immutable plan for one convolution on one ISA tier.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConf {
    pub isa: CpuIsa,
    pub mb: usize,
    pub ngroups: usize,
    /// Channels per group.
    pub ic: usize,
    pub oc: usize,
    pub ih: usize,
    pub iw: usize,
    pub oh: usize,
    pub ow: usize,
    pub kh: usize,
    pub kw: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub t_pad: usize,
    pub l_pad: usize,
    pub dilate_h: usize,
    pub dilate_w: usize,
    pub src_dt: DataType,
    pub dst_dt: DataType,
    pub bia_dt: Option<DataType>,
    pub with_bias: bool,
    pub with_relu: bool,
    pub relu_negative_slope: f32,
    pub with_sum: bool,
    pub sum_scale: f32,
    pub eltwise_alpha: Option<f32>,
    pub is_oc_scale: bool,
    pub round_mode: RoundMode,
    pub signed_input: bool,
    pub wei_adj_scale: f32,
    pub oc_block: usize,
    pub nb_oc: usize,
    pub ur_w: usize,
}

impl KernelConf {
    pub fn oc_total(&self) -> usize { self.ngroups * self.oc }

    pub fn ic_total(&self) -> usize { self.ngroups * self.ic }

    /// Factor applied to bias before scaling so that bias * scale survives the
    /// scale correction.
    pub fn bias_alpha(&self) -> f32 { if self.signed_input { self.wei_adj_scale } else { 1.0 } }
}

fn reject(isa: CpuIsa, reason: String) -> ConvError {
    debug!("jit:{} init_conf rejected: {}", isa, reason);
    ConvError::Unimplemented(reason)
}

/// Derives the kernel configuration for `desc` on `isa`, or reports the
/// problem as unimplemented for this tier.
pub fn init_conf(isa: CpuIsa, desc: &ConvDesc, attr: &Attr, with_relu: bool, negative_slope: f32) -> Result<KernelConf> {
    let src_d = &desc.src_desc;
    let wei_d = &desc.weights_desc;
    let dst_d = &desc.dst_desc;
    let with_groups = desc.with_groups();

    if src_d.ndims() != 4 {
        return Err(reject(isa, format!("{}D src, only 2D convolution is supported", src_d.ndims() - 2)));
    }
    if src_d.format != Format::Nhwc || dst_d.format != Format::Nhwc {
        return Err(reject(isa, format!("src {:?} / dst {:?}, expected nhwc", src_d.format, dst_d.format)));
    }
    let want_wei = if with_groups { Format::Gohwi } else { Format::Ohwi };
    if wei_d.format != want_wei {
        return Err(reject(isa, format!("weights {:?}, expected {:?}", wei_d.format, want_wei)));
    }
    if wei_d.data_type != DataType::S8 {
        return Err(reject(isa, format!("weights {}, expected s8", wei_d.data_type)));
    }
    if let Some(b) = &desc.bias_desc {
        if b.format != Format::X {
            return Err(reject(isa, format!("bias {:?}, expected x", b.format)));
        }
    }

    let ngroups = desc.ngroups();
    let ic = desc.ic_total() / ngroups;
    let oc = desc.oc_total() / ngroups;
    let simd_w = isa.simd_w();
    if oc % simd_w != 0 {
        return Err(reject(isa, format!("oc per group {} not a multiple of {}", oc, simd_w)));
    }
    if ic % 4 != 0 {
        return Err(reject(isa, format!("ic per group {} not a multiple of 4", ic)));
    }

    let scales = &attr.output_scales;
    if scales.count() == 0 {
        return Err(reject(isa, "empty output scales".to_string()));
    }
    let is_oc_scale = scales.mask == PER_OC_MASK;
    let scales_ok = match (scales.mask, scales.count()) {
        (0, 1) => true,
        (PER_OC_MASK, n) => n == ngroups * oc,
        _ => false,
    };
    if !scales_ok {
        return Err(reject(isa, format!("output scales mask {} with {} entries for {} channels", scales.mask, scales.count(), ngroups * oc)));
    }
    if !attr.post_ops_ok() {
        return Err(reject(isa, format!("unsupported post-op chain {:?}", attr.post_ops)));
    }

    let signed_input = src_d.data_type == DataType::S8;
    let wei_adj_scale = if signed_input { SIGNED_INPUT_WEI_ADJ_SCALE } else { 1.0 };

    let ow = dst_d.dims[3];
    let nb_oc = oc / simd_w;
    let nb_oc_blocking = nb_oc.clamp(1, 4);
    let ur_w = ow.min((OUTPUT_TILE_REGS / nb_oc_blocking).max(1));

    let conf = KernelConf {
        isa,
        mb: src_d.dims[0],
        ngroups,
        ic,
        oc,
        ih: src_d.dims[2],
        iw: src_d.dims[3],
        oh: dst_d.dims[2],
        ow,
        kh: wei_d.dims[wei_d.ndims() - 2],
        kw: wei_d.dims[wei_d.ndims() - 1],
        stride_h: desc.strides[0],
        stride_w: desc.strides[1],
        t_pad: desc.padding_l[0],
        l_pad: desc.padding_l[1],
        dilate_h: desc.dilates[0],
        dilate_w: desc.dilates[1],
        src_dt: src_d.data_type,
        dst_dt: dst_d.data_type,
        bia_dt: desc.bias_desc.as_ref().map(|b| b.data_type),
        with_bias: desc.with_bias(),
        with_relu,
        relu_negative_slope: negative_slope,
        with_sum: attr.sum_scale().is_some(),
        sum_scale: attr.sum_scale().unwrap_or(0.0),
        eltwise_alpha: attr.eltwise_alpha(),
        is_oc_scale,
        round_mode: attr.round_mode,
        signed_input,
        wei_adj_scale,
        oc_block: simd_w,
        nb_oc,
        ur_w,
    };
    debug!("jit:{} conf: g{} ic{} oc{} {}x{} -> {}x{} ur_w {} signed_input {}", isa, ngroups, ic, oc, conf.ih, conf.iw, conf.oh, conf.ow, ur_w, signed_input);
    Ok(conf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::OutputScales;
    use crate::types::{AlgKind, MemoryDesc, PropKind};

    fn desc(src_dt: DataType, oc: usize, ic: usize) -> ConvDesc {
        ConvDesc::forward(
            PropKind::ForwardInference,
            AlgKind::ConvolutionDirect,
            MemoryDesc::new(&[1, ic, 5, 5], src_dt, Format::Nhwc),
            MemoryDesc::new(&[oc, ic, 3, 3], DataType::S8, Format::Ohwi),
            None,
            MemoryDesc::new(&[1, oc, 3, 3], DataType::U8, Format::Nhwc),
            [1, 1],
            [0, 0],
            [0, 0],
        )
        .unwrap()
    }

    #[test]
    fn signed_input_sets_adjustment() {
        let c = init_conf(CpuIsa::Avx2, &desc(DataType::S8, 16, 8), &Attr::default(), false, 0.0).unwrap();
        assert!(c.signed_input);
        assert_eq!(c.wei_adj_scale, SIGNED_INPUT_WEI_ADJ_SCALE);
        assert_eq!(c.nb_oc, 2);
        assert_eq!(c.ur_w, 3);
        let c = init_conf(CpuIsa::Avx2, &desc(DataType::U8, 16, 8), &Attr::default(), false, 0.0).unwrap();
        assert!(!c.signed_input);
        assert_eq!(c.wei_adj_scale, 1.0);
    }

    #[test]
    fn oc_must_fill_vector_width() {
        let d = desc(DataType::U8, 4, 8);
        assert!(init_conf(CpuIsa::Avx2, &d, &Attr::default(), false, 0.0).unwrap_err().is_unimplemented());
        assert!(init_conf(CpuIsa::Sse42, &d, &Attr::default(), false, 0.0).is_ok());
    }

    #[test]
    fn scale_count_must_match_channels() {
        let d = desc(DataType::U8, 8, 8);
        let attr = Attr::default().with_output_scales(OutputScales::per_channel(vec![1.0; 4]));
        assert!(init_conf(CpuIsa::Avx2, &d, &attr, false, 0.0).is_err());
        let attr = Attr::default().with_output_scales(OutputScales::per_channel(vec![1.0; 8]));
        assert!(init_conf(CpuIsa::Avx2, &d, &attr, false, 0.0).unwrap().is_oc_scale);
    }
}

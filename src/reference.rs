//! Straightforward convolution used to check the kernels.

use crate::attr::{Attr, RoundMode};
use crate::memory::Memory;
use crate::types::{ConvDesc, DataType};

/// Knobs the reference needs that live in the kernel configuration.
#[derive(Debug, Clone, Copy)]
pub struct RefParams {
    pub with_relu: bool,
    /// Factor the weights were pre-multiplied by; 1.0 for unsigned input.
    pub wei_adj_scale: f32,
}

impl Default for RefParams {
    fn default() -> Self { Self { with_relu: false, wei_adj_scale: 1.0 } }
}

fn round_and_clamp(v: f64, dt: DataType, mode: RoundMode) -> f64 {
    let r = match mode {
        RoundMode::Nearest => v.round_ties_even(),
        RoundMode::Down => v.floor(),
    };
    match dt {
        DataType::F32 => v,
        DataType::S32 => r.clamp(i32::MIN as f64, i32::MAX as f64),
        DataType::S16 => r.clamp(i16::MIN as f64, i16::MAX as f64),
        DataType::S8 => r.clamp(-128.0, 127.0),
        DataType::U8 => r.clamp(0.0, 255.0),
    }
}

/// Computes the destination in f64 and returns it as f32 in dst layout.
/// `dst_prev` supplies the values a sum post-op accumulates onto.
pub fn conv_fwd(
    desc: &ConvDesc,
    attr: &Attr,
    params: RefParams,
    src: &Memory,
    weights: &Memory,
    bias: Option<&Memory>,
    dst_prev: &Memory,
) -> Vec<f32> {
    let g_n = desc.ngroups();
    let (mb, ih, iw) = (desc.src_desc.dims[0], desc.src_desc.dims[2], desc.src_desc.dims[3]);
    let (oh, ow) = (desc.dst_desc.dims[2], desc.dst_desc.dims[3]);
    let ic_t = desc.ic_total();
    let oc_t = desc.oc_total();
    let (ic, oc) = (ic_t / g_n, oc_t / g_n);
    let wd = &desc.weights_desc.dims;
    let (kh, kw) = (wd[wd.len() - 2], wd[wd.len() - 1]);
    let [sh, sw] = desc.strides;
    let [dh, dw] = desc.dilates;
    let [ph, pw] = desc.padding_l;

    let s = src.buffer();
    let w = weights.buffer();
    let prev = dst_prev.buffer();
    let adj = params.wei_adj_scale as f64;
    let dst_dt = desc.dst_desc.data_type;
    let mut out = vec![0f32; mb * oh * ow * oc_t];

    for n in 0..mb {
        for g in 0..g_n {
            for o in 0..oc {
                let oc_g = g * oc + o;
                let scale = (if attr.output_scales.is_per_tensor() { attr.output_scales.scales[0] } else { attr.output_scales.scales[oc_g] }) as f64;
                for y in 0..oh {
                    for x in 0..ow {
                        let mut acc: i64 = 0;
                        for ky in 0..kh {
                            let iy = (y * sh + ky * (dh + 1)) as i64 - ph as i64;
                            if iy < 0 || iy >= ih as i64 { continue; }
                            for kx in 0..kw {
                                let ix = (x * sw + kx * (dw + 1)) as i64 - pw as i64;
                                if ix < 0 || ix >= iw as i64 { continue; }
                                for c in 0..ic {
                                    let si = ((n * ih + iy as usize) * iw + ix as usize) * ic_t + g * ic + c;
                                    let wi = ((oc_g * kh + ky) * kw + kx) * ic + c;
                                    acc += s.get_f32(si) as i64 * w.get_f32(wi) as i64;
                                }
                            }
                        }
                        let mut d = acc as f64;
                        if let Some(b) = bias { d += b.buffer().get_f32(oc_g) as f64 * adj; }
                        d *= scale / adj;
                        if params.with_relu && d < 0.0 { d *= attr.negative_slope as f64; }
                        let di = ((n * oh + y) * ow + x) * oc_t + oc_g;
                        if let Some(sum) = attr.sum_scale() { d += sum as f64 * prev.get_f32(di) as f64; }
                        if let Some(alpha) = attr.eltwise_alpha() {
                            if d < 0.0 { d *= alpha as f64; }
                        }
                        out[di] = round_and_clamp(d, dst_dt, attr.round_mode) as f32;
                    }
                }
            }
        }
    }
    out
}

/// Largest element-wise difference between two equally sized outputs.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

use log::trace;
use rayon::prelude::*;

use super::conf::KernelConf;
use super::dot::dot_x8s8;
use super::{ConvKernel, KernelCall};
use crate::attr::Attr;
use crate::isa::CpuIsa;
use crate::memory::{Buffer, Element, SrcElement};

/// Portable x8s8s32x forward kernel working on blocks of `W` output channels,
/// `W` being the f32 lane count of the target tier.
#[derive(Debug, Clone)]
pub struct UniKernel<const W: usize> {
    jcp: KernelConf,
    bias_alpha: f32,
}

pub type Avx2Kernel = UniKernel<8>;
pub type Sse42Kernel = UniKernel<4>;

struct RowArgs<'a, S> {
    src: &'a [S],
    weights: &'a [i8],
    bias: Option<&'a Buffer>,
    scales: &'a [f32],
}

/// Input coordinate read by output `o` through tap `k`, if inside the image.
#[inline]
fn tap(o: usize, k: usize, stride: usize, pad: usize, dilate: usize, size: usize) -> Option<usize> {
    let pos = (o * stride + k * (dilate + 1)).checked_sub(pad)?;
    if pos < size { Some(pos) } else { None }
}

impl<const W: usize> UniKernel<W> {
    pub fn jcp(&self) -> &KernelConf { &self.jcp }

    fn accumulate<S: SrcElement>(&self, a: &RowArgs<'_, S>, n: usize, oy: usize, ox: usize, g: usize, ocb: usize) -> [i32; W] {
        let c = &self.jcp;
        let ic_total = c.ic_total();
        let oc0 = g * c.oc + ocb * W;
        let mut acc = [0i32; W];
        for ky in 0..c.kh {
            let Some(iy) = tap(oy, ky, c.stride_h, c.t_pad, c.dilate_h, c.ih) else { continue };
            for kx in 0..c.kw {
                let Some(ix) = tap(ox, kx, c.stride_w, c.l_pad, c.dilate_w, c.iw) else { continue };
                let s_off = ((n * c.ih + iy) * c.iw + ix) * ic_total + g * c.ic;
                let src_px = &a.src[s_off..s_off + c.ic];
                for (lane, acc_l) in acc.iter_mut().enumerate() {
                    let w_off = (((oc0 + lane) * c.kh + ky) * c.kw + kx) * c.ic;
                    *acc_l = acc_l.wrapping_add(dot_x8s8(src_px, &a.weights[w_off..w_off + c.ic]));
                }
            }
        }
        acc
    }

    #[inline]
    fn store<S, D: Element>(&self, a: &RowArgs<'_, S>, acc: i32, o: usize, prev: D) -> D {
        let c = &self.jcp;
        let mut d = acc as f32;
        if let Some(b) = a.bias { d += b.get_f32(o) * self.bias_alpha; }
        d *= a.scales[if c.is_oc_scale { o } else { 0 }];
        if c.with_relu && d < 0.0 { d *= c.relu_negative_slope; }
        if c.with_sum { d += c.sum_scale * prev.to_f32(); }
        if let Some(alpha) = c.eltwise_alpha {
            if d < 0.0 { d *= alpha; }
        }
        D::saturate(d, c.round_mode)
    }

    fn compute_row<S: SrcElement, D: Element>(&self, a: &RowArgs<'_, S>, n: usize, oy: usize, dst_row: &mut [D]) {
        let c = &self.jcp;
        let oc_total = c.oc_total();
        for ox0 in (0..c.ow).step_by(c.ur_w) {
            for ox in ox0..(ox0 + c.ur_w).min(c.ow) {
                let dst_px = &mut dst_row[ox * oc_total..(ox + 1) * oc_total];
                for g in 0..c.ngroups {
                    for ocb in 0..c.nb_oc {
                        let acc = self.accumulate(a, n, oy, ox, g, ocb);
                        let oc0 = g * c.oc + ocb * W;
                        for (lane, &v) in acc.iter().enumerate() {
                            let o = oc0 + lane;
                            dst_px[o] = self.store(a, v, o, dst_px[o]);
                        }
                    }
                }
            }
        }
    }
}

impl<const W: usize> ConvKernel for UniKernel<W> {
    const ISA: CpuIsa = CpuIsa::from_simd_w(W);

    fn new(conf: &KernelConf, _attr: &Attr) -> Self {
        debug_assert_eq!(conf.oc_block, W);
        Self { jcp: conf.clone(), bias_alpha: conf.bias_alpha() }
    }

    fn execute<S: SrcElement, D: Element>(&self, call: KernelCall<'_, S, D>) {
        let c = &self.jcp;
        let row_len = c.ow * c.oc_total();
        if row_len == 0 { return; }
        let KernelCall { src, weights, bias, scales, dst } = call;
        trace!("jit:{} execute mb{} {}x{} rows {}", Self::ISA, c.mb, c.oh, c.ow, c.mb * c.oh);
        let args = RowArgs { src, weights, bias, scales };
        dst.par_chunks_mut(row_len).enumerate().for_each(|(row, dst_row)| {
            self.compute_row(&args, row / c.oh, row % c.oh, dst_row);
        });
    }
}

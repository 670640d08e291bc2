pub mod conf;
pub mod dot;
pub mod uni;

use crate::attr::Attr;
use crate::error::Result;
use crate::isa::CpuIsa;
use crate::memory::{Buffer, Element, SrcElement};
use crate::types::ConvDesc;

pub use conf::KernelConf;
pub use uni::{Avx2Kernel, Sse42Kernel, UniKernel};

/// Tensors handed to a kernel for one forward pass.
pub struct KernelCall<'a, S, D> {
    pub src: &'a [S],
    pub weights: &'a [i8],
    pub bias: Option<&'a Buffer>,
    /// Output scales to apply: the corrected table when the primitive owns one,
    /// the caller's scales otherwise.
    pub scales: &'a [f32],
    pub dst: &'a mut [D],
}

/// An ISA-specialized convolution kernel together with the deriver that plans
/// work for it.
pub trait ConvKernel: Send + Sync + Sized + 'static {
    const ISA: CpuIsa;

    /// Plans `desc` for this kernel or reports it as unimplemented.
    fn init_conf(desc: &ConvDesc, attr: &Attr, with_relu: bool, negative_slope: f32) -> Result<KernelConf> {
        conf::init_conf(Self::ISA, desc, attr, with_relu, negative_slope)
    }

    fn new(conf: &KernelConf, attr: &Attr) -> Self;

    /// Runs the whole forward pass; returns once `dst` is written.
    fn execute<S: SrcElement, D: Element>(&self, call: KernelCall<'_, S, D>);
}

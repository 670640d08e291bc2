use log::debug;

use super::{ConvPrimitive, ConvolutionFwd, ConvolutionFwdPd};
use crate::attr::Attr;
use crate::error::{ConvError, Result};
use crate::isa::CpuIsa;
use crate::kernel::{Avx2Kernel, ConvKernel, Sse42Kernel};
use crate::memory::{Element, SrcElement};
use crate::types::{ConvDesc, DataType};

/// Activation fused into the convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    None,
    /// Leaky relu; the slope comes from `Attr::negative_slope`.
    Relu,
}

pub const SRC_TYPES: [DataType; 2] = [DataType::U8, DataType::S8];
pub const DST_TYPES: [DataType; 4] = [DataType::F32, DataType::S32, DataType::S8, DataType::U8];

/// Selects one concrete primitive variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImplKey {
    pub isa: CpuIsa,
    pub activation: Activation,
    pub src: DataType,
    pub dst: DataType,
}

impl ImplKey {
    pub fn for_desc(isa: CpuIsa, activation: Activation, desc: &ConvDesc) -> Self {
        Self { isa, activation, src: desc.src_desc.data_type, dst: desc.dst_desc.data_type }
    }
}

/// Every variant the factory can build.
pub fn variants() -> Vec<ImplKey> {
    let mut out = Vec::with_capacity(32);
    for isa in CpuIsa::ALL {
        for activation in [Activation::None, Activation::Relu] {
            for src in SRC_TYPES {
                for dst in DST_TYPES { out.push(ImplKey { isa, activation, src, dst }); }
            }
        }
    }
    out
}

fn build<K: ConvKernel, const RELU: bool, S: SrcElement, D: Element>(desc: &ConvDesc, attr: &Attr) -> Result<Box<dyn ConvPrimitive>> {
    let pd = ConvolutionFwdPd::<K, RELU, S, D>::new(desc, attr)?;
    Ok(Box::new(ConvolutionFwd::new(&pd)))
}

fn by_dst<K: ConvKernel, const RELU: bool, S: SrcElement>(key: ImplKey, desc: &ConvDesc, attr: &Attr) -> Result<Box<dyn ConvPrimitive>> {
    match key.dst {
        DataType::F32 => build::<K, RELU, S, f32>(desc, attr),
        DataType::S32 => build::<K, RELU, S, i32>(desc, attr),
        DataType::S8 => build::<K, RELU, S, i8>(desc, attr),
        DataType::U8 => build::<K, RELU, S, u8>(desc, attr),
        other => Err(ConvError::unimplemented(format!("no variant with {} destination", other))),
    }
}

fn by_src<K: ConvKernel, const RELU: bool>(key: ImplKey, desc: &ConvDesc, attr: &Attr) -> Result<Box<dyn ConvPrimitive>> {
    match key.src {
        DataType::U8 => by_dst::<K, RELU, u8>(key, desc, attr),
        DataType::S8 => by_dst::<K, RELU, i8>(key, desc, attr),
        other => Err(ConvError::unimplemented(format!("no variant with {} source", other))),
    }
}

/// Builds the variant for `isa` and `activation`; the type axes come from the
/// request.
pub fn create_primitive(isa: CpuIsa, activation: Activation, desc: &ConvDesc, attr: &Attr) -> Result<Box<dyn ConvPrimitive>> {
    let key = ImplKey::for_desc(isa, activation, desc);
    match (key.isa, key.activation) {
        (CpuIsa::Avx2, Activation::None) => by_src::<Avx2Kernel, false>(key, desc, attr),
        (CpuIsa::Avx2, Activation::Relu) => by_src::<Avx2Kernel, true>(key, desc, attr),
        (CpuIsa::Sse42, Activation::None) => by_src::<Sse42Kernel, false>(key, desc, attr),
        (CpuIsa::Sse42, Activation::Relu) => by_src::<Sse42Kernel, true>(key, desc, attr),
    }
}

/// Tries every tier up to `max_isa`, widest first, moving on when a tier
/// reports the problem as unimplemented.
pub fn create_with_max_isa(max_isa: CpuIsa, activation: Activation, desc: &ConvDesc, attr: &Attr) -> Result<Box<dyn ConvPrimitive>> {
    let mut last = ConvError::unimplemented(format!("no tier at or below {}", max_isa));
    for isa in CpuIsa::ALL.into_iter().filter(|isa| *isa <= max_isa) {
        match create_primitive(isa, activation, desc, attr) {
            Ok(p) => return Ok(p),
            Err(e) if e.is_unimplemented() => {
                debug!("jit:{} skipped: {}", isa, e);
                last = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

/// Probes the CPU and builds the widest variant that accepts the problem.
pub fn create_best(activation: Activation, desc: &ConvDesc, attr: &Attr) -> Result<Box<dyn ConvPrimitive>> {
    let top = CpuIsa::detect().ok_or_else(|| ConvError::unimplemented("no supported CPU ISA tier"))?;
    create_with_max_isa(top, activation, desc, attr)
}

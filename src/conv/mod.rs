pub mod factory;

use std::fmt;
use std::marker::PhantomData;

use log::{debug, info, trace};

use crate::attr::Attr;
use crate::error::{ConvError, Result};
use crate::event::{Event, EventState};
use crate::kernel::{Avx2Kernel, ConvKernel, KernelCall, KernelConf, Sse42Kernel};
use crate::memory::{Element, Memory, SrcElement};
use crate::scales::{correct_output_scales, AlignedScales};
use crate::types::{AlgKind, ConvDesc, DataType, MemoryDesc};

pub use factory::{create_best, create_primitive, create_with_max_isa, variants, Activation, ImplKey};

/// Bias types the x8s8s32x kernels can convert.
pub const ALLOWED_BIAS_TYPES: [DataType; 4] = [DataType::F32, DataType::S32, DataType::S8, DataType::U8];

/// Checks the numeric contract of an int8 forward convolution specialized for
/// `src_type -> dst_type`. Returns the reason on failure.
pub fn check_numeric_contract(desc: &ConvDesc, src_type: DataType, dst_type: DataType) -> std::result::Result<(), String> {
    if !desc.prop_kind.is_forward() {
        return Err(format!("prop kind {:?} is not forward", desc.prop_kind));
    }
    if desc.alg_kind != AlgKind::ConvolutionDirect {
        return Err(format!("algorithm {:?} is not direct", desc.alg_kind));
    }
    if let Some(b) = &desc.bias_desc {
        if !ALLOWED_BIAS_TYPES.contains(&b.data_type) {
            return Err(format!("bias type {} not supported", b.data_type));
        }
    }
    if desc.accum_data_type != DataType::S32 {
        return Err(format!("accumulation type {} is not s32", desc.accum_data_type));
    }
    if desc.src_desc.data_type != src_type {
        return Err(format!("src type {} does not match {}", desc.src_desc.data_type, src_type));
    }
    if desc.dst_desc.data_type != dst_type {
        return Err(format!("dst type {} does not match {}", desc.dst_desc.data_type, dst_type));
    }
    Ok(())
}

/// Validated convolution request plus the kernel configuration derived for it.
///
/// Building one has no side effects, so it can be retried or inspected freely
/// before committing to a primitive.
pub struct ConvolutionFwdPd<K, const RELU: bool, S, D> {
    desc: ConvDesc,
    attr: Attr,
    jcp: KernelConf,
    _marker: PhantomData<fn() -> (K, S, D)>,
}

impl<K, const RELU: bool, S, D> Clone for ConvolutionFwdPd<K, RELU, S, D> {
    fn clone(&self) -> Self {
        Self { desc: self.desc.clone(), attr: self.attr.clone(), jcp: self.jcp.clone(), _marker: PhantomData }
    }
}

impl<K, const RELU: bool, S, D> fmt::Debug for ConvolutionFwdPd<K, RELU, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvolutionFwdPd").field("desc", &self.desc).field("jcp", &self.jcp).finish()
    }
}

impl<K: ConvKernel, const RELU: bool, S: SrcElement, D: Element> ConvolutionFwdPd<K, RELU, S, D> {
    pub fn new(desc: &ConvDesc, attr: &Attr) -> Result<Self> {
        if let Err(e) = desc.check_shapes() {
            debug!("{} rejected: {}", Self::name(), e);
            return Err(e);
        }
        if let Err(reason) = check_numeric_contract(desc, S::DATA_TYPE, D::DATA_TYPE) {
            debug!("{} rejected: {}", Self::name(), reason);
            return Err(ConvError::Unimplemented(reason));
        }
        let jcp = K::init_conf(desc, attr, RELU, attr.negative_slope)?;
        Ok(Self { desc: desc.clone(), attr: attr.clone(), jcp, _marker: PhantomData })
    }

    pub fn name() -> String { format!("jit:{}{}", K::ISA, if RELU { "+relu" } else { "" }) }

    pub fn desc(&self) -> &ConvDesc { &self.desc }

    pub fn attr(&self) -> &Attr { &self.attr }

    pub fn jcp(&self) -> &KernelConf { &self.jcp }

    pub fn with_bias(&self) -> bool { self.desc.with_bias() }

    pub fn negative_slope(&self) -> f32 { self.attr.negative_slope }
}

/// Memory bound to one execution, checked against the request it was bound
/// for. A primitive only executes arguments bound for its own request.
pub struct ExecArgs<'a> {
    desc: &'a ConvDesc,
    src: &'a Memory,
    weights: &'a Memory,
    bias: Option<&'a Memory>,
    dst: &'a mut Memory,
}

fn check_binding(name: &str, want: &MemoryDesc, got: &MemoryDesc) -> Result<()> {
    if want != got {
        return Err(ConvError::invalid(format!("{} memory {:?} does not match descriptor {:?}", name, got, want)));
    }
    Ok(())
}

impl<'a> ExecArgs<'a> {
    pub fn new(desc: &'a ConvDesc, src: &'a Memory, weights: &'a Memory, bias: Option<&'a Memory>, dst: &'a mut Memory) -> Result<Self> {
        check_binding("src", &desc.src_desc, src.desc())?;
        check_binding("weights", &desc.weights_desc, weights.desc())?;
        match (&desc.bias_desc, bias) {
            (Some(want), Some(m)) => check_binding("bias", want, m.desc())?,
            (None, None) => {}
            (Some(_), None) => return Err(ConvError::invalid("descriptor declares a bias but none was bound")),
            (None, Some(_)) => return Err(ConvError::invalid("bias bound to a descriptor without bias")),
        }
        check_binding("dst", &desc.dst_desc, dst.desc())?;
        Ok(Self { desc, src, weights, bias, dst })
    }

    pub fn desc(&self) -> &ConvDesc { self.desc }

    pub fn dst(&self) -> &Memory { &*self.dst }
}

/// Runnable int8 convolution: owns its kernel and, for signed input, the
/// corrected output scales.
///
/// Fields drop in declaration order, so the kernel is released before the
/// scale table, mirroring construction.
pub struct ConvolutionFwd<K, const RELU: bool, S, D> {
    pd: ConvolutionFwdPd<K, RELU, S, D>,
    kernel: K,
    local_scales: Option<AlignedScales>,
}

pub type JitAvx2ConvolutionFwdPd<S, D> = ConvolutionFwdPd<Avx2Kernel, false, S, D>;
pub type JitAvx2ConvolutionReluPd<S, D> = ConvolutionFwdPd<Avx2Kernel, true, S, D>;
pub type JitSse42ConvolutionFwdPd<S, D> = ConvolutionFwdPd<Sse42Kernel, false, S, D>;
pub type JitSse42ConvolutionReluPd<S, D> = ConvolutionFwdPd<Sse42Kernel, true, S, D>;

pub type JitAvx2ConvolutionFwd<S, D> = ConvolutionFwd<Avx2Kernel, false, S, D>;
pub type JitAvx2ConvolutionRelu<S, D> = ConvolutionFwd<Avx2Kernel, true, S, D>;
pub type JitSse42ConvolutionFwd<S, D> = ConvolutionFwd<Sse42Kernel, false, S, D>;
pub type JitSse42ConvolutionRelu<S, D> = ConvolutionFwd<Sse42Kernel, true, S, D>;

impl<K: ConvKernel, const RELU: bool, S: SrcElement, D: Element> ConvolutionFwd<K, RELU, S, D> {
    pub fn new(pd: &ConvolutionFwdPd<K, RELU, S, D>) -> Self {
        let pd = pd.clone();
        let kernel = K::new(pd.jcp(), pd.attr());
        let local_scales = if pd.jcp().signed_input {
            Some(correct_output_scales(&pd.attr().output_scales, pd.jcp().wei_adj_scale))
        } else {
            None
        };
        info!("created {} convolution {} -> {}", ConvolutionFwdPd::<K, RELU, S, D>::name(), S::DATA_TYPE, D::DATA_TYPE);
        Self { pd, kernel, local_scales }
    }

    pub fn pd(&self) -> &ConvolutionFwdPd<K, RELU, S, D> { &self.pd }

    pub fn kernel(&self) -> &K { &self.kernel }

    pub fn local_scales(&self) -> Option<&[f32]> { self.local_scales.as_deref() }

    /// Binds memory against this primitive's own request.
    pub fn bind<'a>(&'a self, src: &'a Memory, weights: &'a Memory, bias: Option<&'a Memory>, dst: &'a mut Memory) -> Result<ExecArgs<'a>> {
        ExecArgs::new(self.pd.desc(), src, weights, bias, dst)
    }

    /// Runs the convolution and marks `event` ready.
    ///
    /// Panics if `args` were bound for a different request.
    pub fn execute(&self, args: &mut ExecArgs<'_>, event: &Event) {
        self.execute_forward(args);
        event.set_state(EventState::Ready);
    }

    /// Releases the kernel and the scale table, if any.
    pub fn destroy(self) {
        debug!("destroying {} convolution", ConvolutionFwdPd::<K, RELU, S, D>::name());
    }

    fn execute_forward(&self, args: &mut ExecArgs<'_>) {
        assert!(
            std::ptr::eq(args.desc, self.pd.desc()) || args.desc == self.pd.desc(),
            "{} executed with memory bound for a different request",
            ConvolutionFwdPd::<K, RELU, S, D>::name()
        );
        let src = args.src.as_slice::<S>().expect("src type checked by the descriptor");
        let weights = args.weights.as_slice::<i8>().expect("weights type checked by the deriver");
        let bias = args.bias.map(|m| m.buffer());
        let dst = args.dst.as_mut_slice::<D>().expect("dst type checked by the descriptor");
        let scales = match &self.local_scales {
            Some(t) => t.as_slice(),
            None => self.pd.attr().output_scales.scales.as_slice(),
        };
        trace!("executing {} with {} output scales", ConvolutionFwdPd::<K, RELU, S, D>::name(), scales.len());
        self.kernel.execute(KernelCall { src, weights, bias, scales, dst });
    }
}

/// Object-safe view of any concrete convolution variant.
pub trait ConvPrimitive: Send + Sync {
    fn name(&self) -> String;
    fn desc(&self) -> &ConvDesc;
    fn attr(&self) -> &Attr;
    fn conf(&self) -> &KernelConf;
    fn local_scales(&self) -> Option<&[f32]>;
    fn bind<'a>(&'a self, src: &'a Memory, weights: &'a Memory, bias: Option<&'a Memory>, dst: &'a mut Memory) -> Result<ExecArgs<'a>>;
    fn execute(&self, args: &mut ExecArgs<'_>, event: &Event);
}

impl<K: ConvKernel, const RELU: bool, S: SrcElement, D: Element> ConvPrimitive for ConvolutionFwd<K, RELU, S, D> {
    fn name(&self) -> String { ConvolutionFwdPd::<K, RELU, S, D>::name() }
    fn desc(&self) -> &ConvDesc { self.pd.desc() }
    fn attr(&self) -> &Attr { self.pd.attr() }
    fn conf(&self) -> &KernelConf { self.pd.jcp() }
    fn local_scales(&self) -> Option<&[f32]> { ConvolutionFwd::local_scales(self) }
    fn bind<'a>(&'a self, src: &'a Memory, weights: &'a Memory, bias: Option<&'a Memory>, dst: &'a mut Memory) -> Result<ExecArgs<'a>> {
        ConvolutionFwd::bind(self, src, weights, bias, dst)
    }
    fn execute(&self, args: &mut ExecArgs<'_>, event: &Event) { ConvolutionFwd::execute(self, args, event) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scales::LIVE_TABLES;
    use crate::types::{Format, PropKind};

    fn live() -> isize { LIVE_TABLES.with(|n| n.get()) }

    fn desc(src: DataType) -> ConvDesc {
        ConvDesc::forward(
            PropKind::ForwardInference,
            AlgKind::ConvolutionDirect,
            MemoryDesc::new(&[1, 8, 3, 3], src, Format::Nhwc),
            MemoryDesc::new(&[8, 8, 1, 1], DataType::S8, Format::Ohwi),
            None,
            MemoryDesc::new(&[1, 8, 3, 3], DataType::S32, Format::Nhwc),
            [1, 1],
            [0, 0],
            [0, 0],
        )
        .unwrap()
    }

    #[test]
    fn scale_table_released_with_primitive() {
        let pd = JitAvx2ConvolutionFwdPd::<i8, i32>::new(&desc(DataType::S8), &Attr::default()).unwrap();
        let before = live();
        let prim = JitAvx2ConvolutionFwd::new(&pd);
        assert_eq!(live(), before + 1);
        prim.destroy();
        assert_eq!(live(), before);

        let a = JitAvx2ConvolutionFwd::new(&pd);
        let b = JitAvx2ConvolutionFwd::new(&pd);
        assert_eq!(live(), before + 2);
        drop(a);
        assert_eq!(live(), before + 1);
        drop(b);
        assert_eq!(live(), before);
    }

    #[test]
    fn unsigned_input_allocates_no_table() {
        let pd = JitAvx2ConvolutionFwdPd::<u8, i32>::new(&desc(DataType::U8), &Attr::default()).unwrap();
        let before = live();
        let prim = JitAvx2ConvolutionFwd::new(&pd);
        assert_eq!(live(), before);
        prim.destroy();
        assert_eq!(live(), before);
    }
}

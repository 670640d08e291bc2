use qconv::attr::Attr;
use qconv::conv::{ConvolutionFwd, ConvolutionFwdPd, ExecArgs};
use qconv::kernel::conf::init_conf;
use qconv::kernel::{ConvKernel, KernelCall, KernelConf};
use qconv::memory::{Element, Memory, SrcElement};
use qconv::scales::{PER_TENSOR_SCALES_PAD, SCALES_ALIGN};
use qconv::{AlgKind, ConvDesc, CpuIsa, DataType, Event, Format, MemoryDesc, OutputScales, PropKind};
use std::sync::Mutex;

/// Kernel whose configuration forces the signed-input flag and a 4.0
/// weight adjustment, recording the scales it is handed.
struct AdjustKernel<const SIGNED: bool> {
    seen_scales: Mutex<Vec<f32>>,
}

impl<const SIGNED: bool> ConvKernel for AdjustKernel<SIGNED> {
    const ISA: CpuIsa = CpuIsa::Avx2;

    fn init_conf(desc: &ConvDesc, attr: &Attr, with_relu: bool, negative_slope: f32) -> qconv::Result<KernelConf> {
        let mut c = init_conf(CpuIsa::Avx2, desc, attr, with_relu, negative_slope)?;
        c.signed_input = SIGNED;
        c.wei_adj_scale = if SIGNED { 4.0 } else { 1.0 };
        Ok(c)
    }

    fn new(_conf: &KernelConf, _attr: &Attr) -> Self { Self { seen_scales: Mutex::new(Vec::new()) } }

    fn execute<S: SrcElement, D: Element>(&self, call: KernelCall<'_, S, D>) {
        *self.seen_scales.lock().unwrap() = call.scales.to_vec();
    }
}

fn u8_desc(oc: usize) -> ConvDesc {
    ConvDesc::forward(
        PropKind::ForwardInference,
        AlgKind::ConvolutionDirect,
        MemoryDesc::new(&[1, 8, 4, 4], DataType::U8, Format::Nhwc),
        MemoryDesc::new(&[oc, 8, 1, 1], DataType::S8, Format::Ohwi),
        None,
        MemoryDesc::new(&[1, oc, 4, 4], DataType::U8, Format::Nhwc),
        [1, 1],
        [0, 0],
        [0, 0],
    )
    .unwrap()
}

fn execute_once<const SIGNED: bool>(prim: &ConvolutionFwd<AdjustKernel<SIGNED>, false, u8, u8>, desc: &ConvDesc) -> Event {
    let src = Memory::zeroed(desc.src_desc.clone());
    let wei = Memory::zeroed(desc.weights_desc.clone());
    let mut dst = Memory::zeroed(desc.dst_desc.clone());
    let event = Event::new();
    let mut args = ExecArgs::new(desc, &src, &wei, None, &mut dst).unwrap();
    prim.execute(&mut args, &event);
    event
}

#[test]
fn per_tensor_scale_is_padded_to_eight_corrected_entries() {
    let desc = u8_desc(8);
    let attr = Attr::default().with_output_scales(OutputScales::per_tensor(2.0));
    let pd = ConvolutionFwdPd::<AdjustKernel<true>, false, u8, u8>::new(&desc, &attr).unwrap();
    let prim = ConvolutionFwd::new(&pd);
    let table = prim.local_scales().expect("signed input allocates a table");
    assert_eq!(table.len(), PER_TENSOR_SCALES_PAD);
    assert_eq!(table, &[0.5f32; 8][..]);
    assert_eq!(table.as_ptr() as usize % SCALES_ALIGN, 0);

    let event = execute_once(&prim, &desc);
    assert!(event.is_ready());
    assert_eq!(*prim.kernel().seen_scales.lock().unwrap(), vec![0.5f32; 8]);
}

#[test]
fn per_channel_scales_keep_their_count() {
    let desc = u8_desc(16);
    let scales: Vec<f32> = (0..16).map(|i| (i + 1) as f32).collect();
    let attr = Attr::default().with_output_scales(OutputScales::per_channel(scales.clone()));
    let pd = ConvolutionFwdPd::<AdjustKernel<true>, false, u8, u8>::new(&desc, &attr).unwrap();
    let prim = ConvolutionFwd::new(&pd);
    let table = prim.local_scales().unwrap();
    assert_eq!(table.len(), 16);
    for (i, v) in table.iter().enumerate() {
        assert_eq!(*v, scales[i] * (1.0 / 4.0), "entry {}", i);
    }
    assert_eq!(table.as_ptr() as usize % SCALES_ALIGN, 0);
}

#[test]
fn unsigned_input_uses_original_scales() {
    let desc = u8_desc(8);
    let attr = Attr::default().with_output_scales(OutputScales::per_tensor(2.0));
    let pd = ConvolutionFwdPd::<AdjustKernel<false>, false, u8, u8>::new(&desc, &attr).unwrap();
    let prim = ConvolutionFwd::new(&pd);
    assert!(prim.local_scales().is_none());

    let event = execute_once(&prim, &desc);
    assert!(event.is_ready());
    assert_eq!(*prim.kernel().seen_scales.lock().unwrap(), vec![2.0f32]);
}

#[test]
fn real_signed_deriver_halves_weights_and_doubles_scales() {
    use qconv::conv::JitAvx2ConvolutionFwd;
    use qconv::conv::JitAvx2ConvolutionFwdPd;
    let mut desc = u8_desc(8);
    desc.src_desc.data_type = DataType::S8;
    let attr = Attr::default().with_output_scales(OutputScales::per_tensor(3.0));
    let pd = JitAvx2ConvolutionFwdPd::<i8, u8>::new(&desc, &attr).unwrap();
    let prim = JitAvx2ConvolutionFwd::new(&pd);
    assert_eq!(prim.local_scales().unwrap(), &[6.0f32; 8][..]);
}

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use qconv::conv::{create_primitive, Activation};
use qconv::problem::{random_data, Problem};
use qconv::{Attr, CpuIsa, DataType, Event, OutputScales};

fn bench_conv(c: &mut Criterion, name: &str, problem: &str, src: DataType, isa: CpuIsa) {
    let p: Problem = problem.parse().expect("valid problem");
    let desc = p.conv_desc(src, DataType::U8, Some(DataType::F32)).expect("descriptor");
    let attr = Attr::default().with_output_scales(OutputScales::per_tensor(0.125));
    let prim = create_primitive(isa, Activation::Relu, &desc, &attr).expect("primitive");
    let data = random_data(&desc, 1).expect("data");
    let mut dst = data.dst.clone();
    c.bench_function(name, |b| {
        b.iter(|| {
            let event = Event::new();
            let mut args = prim.bind(&data.src, &data.weights, data.bias.as_ref(), &mut dst).expect("bindings");
            prim.execute(&mut args, black_box(&event));
        })
    });
}

fn bench_resnet_3x3(c: &mut Criterion) {
    // small 3x3 layer; adjust as needed
    let p = "mb1ic64ih28oc64kh3ph1";
    bench_conv(c, "conv_u8_3x3_avx2", p, DataType::U8, CpuIsa::Avx2);
    bench_conv(c, "conv_s8_3x3_avx2", p, DataType::S8, CpuIsa::Avx2);
    bench_conv(c, "conv_u8_3x3_sse42", p, DataType::U8, CpuIsa::Sse42);
}

fn bench_pointwise(c: &mut Criterion) {
    bench_conv(c, "conv_u8_1x1_avx2", "mb1ic128ih14oc128kh1", DataType::U8, CpuIsa::Avx2);
}

criterion_group!(benches, bench_resnet_3x3, bench_pointwise);
criterion_main!(benches);

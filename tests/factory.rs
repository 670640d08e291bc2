use pretty_assertions::assert_eq;
use qconv::conv::{create_best, create_primitive, create_with_max_isa, variants, Activation};
use qconv::problem::Problem;
use qconv::{Attr, CpuIsa, DataType};
use std::collections::HashSet;

fn desc_for(problem: &str, src: DataType, dst: DataType) -> qconv::ConvDesc {
    let p: Problem = problem.parse().unwrap();
    p.conv_desc(src, dst, Some(DataType::F32)).unwrap()
}

#[test]
fn variant_table_covers_every_combination_once() {
    let keys = variants();
    assert_eq!(keys.len(), 32);
    let unique: HashSet<_> = keys.iter().copied().collect();
    assert_eq!(unique.len(), 32);
}

#[test]
fn every_variant_builds_with_matching_name() {
    for key in variants() {
        let desc = desc_for("mb1ic8ih4oc8kh3ph1", key.src, key.dst);
        let prim = create_primitive(key.isa, key.activation, &desc, &Attr::default()).unwrap();
        let suffix = if key.activation == Activation::Relu { "+relu" } else { "" };
        assert_eq!(prim.name(), format!("jit:{}{}", key.isa, suffix));
        assert_eq!(prim.conf().isa, key.isa);
        assert_eq!(prim.conf().with_relu, key.activation == Activation::Relu);
        assert_eq!(prim.local_scales().is_some(), key.src == DataType::S8);
        assert_eq!(prim.desc(), &desc);
    }
}

#[test]
fn unsupported_type_axes_are_unimplemented() {
    let desc = desc_for("mb1ic8ih4oc8kh3ph1", DataType::U8, DataType::S16);
    let err = create_primitive(CpuIsa::Avx2, Activation::None, &desc, &Attr::default()).err().unwrap();
    assert!(err.is_unimplemented());
}

#[test]
fn narrow_channels_fall_back_to_sse42() {
    let desc = desc_for("mb1ic4ih4oc4kh1", DataType::U8, DataType::U8);
    assert!(create_primitive(CpuIsa::Avx2, Activation::None, &desc, &Attr::default()).is_err());
    let prim = create_with_max_isa(CpuIsa::Avx2, Activation::None, &desc, &Attr::default()).unwrap();
    assert_eq!(prim.name(), "jit:sse42");
}

#[test]
fn max_isa_caps_the_choice() {
    let desc = desc_for("mb1ic8ih4oc8kh1", DataType::S8, DataType::F32);
    let prim = create_with_max_isa(CpuIsa::Sse42, Activation::Relu, &desc, &Attr::default()).unwrap();
    assert_eq!(prim.conf().isa, CpuIsa::Sse42);

    let odd = desc_for("mb1ic6ih4oc8kh1", DataType::S8, DataType::F32);
    assert!(create_with_max_isa(CpuIsa::Avx2, Activation::None, &odd, &Attr::default()).err().unwrap().is_unimplemented());
}

#[test]
fn best_variant_follows_detection() {
    let desc = desc_for("mb1ic8ih4oc8kh1", DataType::U8, DataType::S32);
    match CpuIsa::detect() {
        Some(isa) => {
            let prim = create_best(Activation::None, &desc, &Attr::default()).unwrap();
            assert!(prim.conf().isa <= isa);
        }
        None => assert!(create_best(Activation::None, &desc, &Attr::default()).is_err()),
    }
}

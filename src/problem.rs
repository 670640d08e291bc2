use anyhow::{bail, Context, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use crate::memory::{Buffer, Memory};
use crate::types::{AlgKind, ConvDesc, DataType, Format, MemoryDesc, PropKind};

/// Shape of one 2D convolution.
///
/// String form: `mb2g1ic16ih14iw14oc32kh3kw3sh1sw1ph1pw1dh0dw0n"name"`. Only
/// `ic`, `ih`, `oc` and `kh` are required; `iw`/`kw` default to `ih`/`kh`,
/// `mb` to 2, `g`, strides to 1, padding and dilation to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Problem {
    pub name: Option<String>,
    pub mb: usize,
    pub g: usize,
    pub ic: usize,
    pub ih: usize,
    pub iw: usize,
    pub oc: usize,
    pub kh: usize,
    pub kw: usize,
    pub sh: usize,
    pub sw: usize,
    pub ph: usize,
    pub pw: usize,
    pub dh: usize,
    pub dw: usize,
}

impl Default for Problem {
    fn default() -> Self {
        Self { name: None, mb: 2, g: 1, ic: 0, ih: 0, iw: 0, oc: 0, kh: 0, kw: 0, sh: 1, sw: 1, ph: 0, pw: 0, dh: 0, dw: 0 }
    }
}

fn out_dim(i: usize, k: usize, s: usize, p: usize, d: usize) -> usize {
    let ext = (k - 1) * (d + 1) + 1;
    (i + 2 * p).saturating_sub(ext) / s + 1
}

impl Problem {
    /// Fills derived defaults and checks required fields.
    pub fn normalized(mut self) -> Result<Self> {
        if self.iw == 0 { self.iw = self.ih; }
        if self.kw == 0 { self.kw = self.kh; }
        if self.mb == 0 || self.g == 0 || self.ic == 0 || self.ih == 0 || self.oc == 0 || self.kh == 0 {
            bail!("problem '{}' needs non-zero mb, g, ic, ih, oc and kh", self);
        }
        if self.sh == 0 || self.sw == 0 { bail!("problem '{}' has a zero stride", self); }
        if self.ic % self.g != 0 || self.oc % self.g != 0 {
            bail!("problem '{}': channels not divisible by {} groups", self, self.g);
        }
        let ext_h = (self.kh - 1) * (self.dh + 1) + 1;
        let ext_w = (self.kw - 1) * (self.dw + 1) + 1;
        if self.ih + 2 * self.ph < ext_h || self.iw + 2 * self.pw < ext_w {
            bail!("problem '{}': kernel larger than padded input", self);
        }
        Ok(self)
    }

    pub fn oh(&self) -> usize { out_dim(self.ih, self.kh, self.sh, self.ph, self.dh) }

    pub fn ow(&self) -> usize { out_dim(self.iw, self.kw, self.sw, self.pw, self.dw) }

    /// Multiply-accumulates per forward pass.
    pub fn ops(&self) -> u64 {
        (self.mb * self.oc * self.oh() * self.ow() * (self.ic / self.g) * self.kh * self.kw) as u64
    }

    pub fn conv_desc(&self, src_dt: DataType, dst_dt: DataType, bias_dt: Option<DataType>) -> Result<ConvDesc> {
        let (oh, ow) = (self.oh(), self.ow());
        let weights = if self.g > 1 {
            MemoryDesc::new(&[self.g, self.oc / self.g, self.ic / self.g, self.kh, self.kw], DataType::S8, Format::Gohwi)
        } else {
            MemoryDesc::new(&[self.oc, self.ic, self.kh, self.kw], DataType::S8, Format::Ohwi)
        };
        // Right padding absorbs whatever the stride leaves over.
        let pad_r = |i: usize, k: usize, s: usize, p: usize, d: usize, o: usize| {
            ((o - 1) * s + (k - 1) * (d + 1) + 1).saturating_sub(i + p)
        };
        let desc = ConvDesc::forward_dilated(
            PropKind::ForwardInference,
            AlgKind::ConvolutionDirect,
            MemoryDesc::new(&[self.mb, self.ic, self.ih, self.iw], src_dt, Format::Nhwc),
            weights,
            bias_dt.map(|dt| MemoryDesc::new(&[self.oc], dt, Format::X)),
            MemoryDesc::new(&[self.mb, self.oc, oh, ow], dst_dt, Format::Nhwc),
            [self.sh, self.sw],
            [self.dh, self.dw],
            [self.ph, self.pw],
            [pad_r(self.ih, self.kh, self.sh, self.ph, self.dh, oh), pad_r(self.iw, self.kw, self.sw, self.pw, self.dw, ow)],
        )
        .with_context(|| format!("build descriptor for {}", self))?;
        Ok(desc)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mb{}g{}ic{}ih{}iw{}oc{}kh{}kw{}sh{}sw{}ph{}pw{}dh{}dw{}",
            self.mb, self.g, self.ic, self.ih, self.iw, self.oc, self.kh, self.kw, self.sh, self.sw, self.ph, self.pw, self.dh, self.dw
        )?;
        if let Some(n) = &self.name { write!(f, "n\"{}\"", n)?; }
        Ok(())
    }
}

impl FromStr for Problem {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut p = Problem::default();
        let b = s.trim().as_bytes();
        let mut i = 0usize;
        while i < b.len() {
            let key_start = i;
            while i < b.len() && b[i].is_ascii_alphabetic() { i += 1; }
            let key = &s.trim()[key_start..i];
            if key.is_empty() { bail!("expected a key at offset {} in '{}'", i, s); }
            if key == "n" {
                if b.get(i) != Some(&b'"') { bail!("name must be quoted in '{}'", s); }
                let rest = &s.trim()[i + 1..];
                let end = rest.find('"').with_context(|| format!("unterminated name in '{}'", s))?;
                p.name = Some(rest[..end].to_string());
                i += end + 2;
                continue;
            }
            let val_start = i;
            while i < b.len() && b[i].is_ascii_digit() { i += 1; }
            let val: usize = s.trim()[val_start..i].parse().with_context(|| format!("value for '{}' in '{}'", key, s))?;
            match key {
                "mb" => p.mb = val,
                "g" => p.g = val,
                "ic" => p.ic = val,
                "ih" => p.ih = val,
                "iw" => p.iw = val,
                "oc" => p.oc = val,
                "kh" => p.kh = val,
                "kw" => p.kw = val,
                "sh" => p.sh = val,
                "sw" => p.sw = val,
                "ph" => p.ph = val,
                "pw" => p.pw = val,
                "dh" => p.dh = val,
                "dw" => p.dw = val,
                other => bail!("unknown key '{}' in '{}'", other, s),
            }
        }
        p.normalized()
    }
}

/// A JSON batch of problems: `{"problems": [{"ic": 16, ...}, ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemSet {
    pub problems: Vec<Problem>,
}

impl ProblemSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(&path).with_context(|| format!("open problem file: {}", path.as_ref().display()))?;
        let set: ProblemSet = serde_json::from_reader(BufReader::new(f)).context("parse problem file")?;
        let problems = set.problems.into_iter().map(Problem::normalized).collect::<Result<Vec<_>>>()?;
        Ok(Self { problems })
    }
}

/// Tensors for one run of a problem.
#[derive(Debug, Clone)]
pub struct ProblemData {
    pub src: Memory,
    pub weights: Memory,
    pub bias: Option<Memory>,
    pub dst: Memory,
}

fn random_buffer(dt: DataType, n: usize, rng: &mut SmallRng) -> Buffer {
    match dt {
        DataType::U8 => Buffer::U8((0..n).map(|_| rng.gen_range(0..=15)).collect()),
        DataType::S8 => Buffer::S8((0..n).map(|_| rng.gen_range(-8..=8)).collect()),
        DataType::S16 => Buffer::S16((0..n).map(|_| rng.gen_range(-64..=64)).collect()),
        DataType::S32 => Buffer::S32((0..n).map(|_| rng.gen_range(-64..=64)).collect()),
        DataType::F32 => {
            let normal = Normal::new(0.0f32, 4.0).expect("std dev is positive");
            Buffer::F32((0..n).map(|_| normal.sample(rng).round()).collect())
        }
    }
}

/// Deterministic inputs for `desc`; weights stay in [-4, 4] so accumulators
/// remain exactly representable in f32.
pub fn random_data(desc: &ConvDesc, seed: u64) -> Result<ProblemData> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let src = Memory::from_buffer(desc.src_desc.clone(), random_buffer(desc.src_desc.data_type, desc.src_desc.nelems(), &mut rng))?;
    let w: Vec<i8> = (0..desc.weights_desc.nelems()).map(|_| rng.gen_range(-4..=4)).collect();
    let weights = Memory::from_vec(desc.weights_desc.clone(), w)?;
    let bias = match &desc.bias_desc {
        Some(bd) => Some(Memory::from_buffer(bd.clone(), random_buffer(bd.data_type, bd.nelems(), &mut rng))?),
        None => None,
    };
    let dst = Memory::from_buffer(desc.dst_desc.clone(), random_buffer(desc.dst_desc.data_type, desc.dst_desc.nelems(), &mut rng))?;
    Ok(ProblemData { src, weights, bias, dst })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        let p: Problem = "ic16ih14oc32kh3ph1n\"resnet\"".parse().unwrap();
        assert_eq!(p.mb, 2);
        assert_eq!(p.iw, 14);
        assert_eq!(p.kw, 3);
        assert_eq!(p.oh(), 14);
        assert_eq!(p.name.as_deref(), Some("resnet"));
    }

    #[test]
    fn display_round_trips() {
        let p: Problem = "mb1g2ic8ih7iw5oc16kh3kw1sh2sw1ph1pw0dh1dw0".parse().unwrap();
        let q: Problem = p.to_string().parse().unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn rejects_unknown_keys_and_missing_fields() {
        assert!("ic16ih14oc32kh3xx1".parse::<Problem>().is_err());
        assert!("ih14oc32kh3".parse::<Problem>().is_err());
        assert!("ic16ih2oc32kh5".parse::<Problem>().is_err());
    }

    #[test]
    fn strided_problem_builds_descriptor() {
        let p: Problem = "mb1ic8ih8oc8kh3sh2ph1".parse().unwrap();
        assert_eq!(p.oh(), 4);
        let d = p.conv_desc(DataType::U8, DataType::S32, Some(DataType::F32)).unwrap();
        assert_eq!(d.dst_desc.dims, vec![1, 8, 4, 4]);
        let data = random_data(&d, 7).unwrap();
        assert_eq!(data.src.desc(), &d.src_desc);
        assert!(data.bias.is_some());
    }

    #[test]
    fn problem_set_reads_json() {
        let path = "target/qconv_problem_set.json";
        std::fs::write(path, r#"{"problems": [{"ic": 16, "ih": 7, "oc": 16, "kh": 1, "name": "pw"}]}"#).unwrap();
        let set = ProblemSet::load(path).unwrap();
        assert_eq!(set.problems.len(), 1);
        assert_eq!(set.problems[0].iw, 7);
        assert_eq!(set.problems[0].mb, 2);
    }
}

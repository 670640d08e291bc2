/// Output scales applied to the f32-converted accumulator.
///
/// `mask == 0` means a single per-tensor scale; `mask == 1 << 1` means one scale
/// per output channel (dimension 1 of the destination).
#[derive(Debug, Clone, PartialEq)]
pub struct OutputScales {
    pub mask: u32,
    pub scales: Vec<f32>,
}

pub const PER_OC_MASK: u32 = 1 << 1;

impl OutputScales {
    pub fn per_tensor(scale: f32) -> Self { Self { mask: 0, scales: vec![scale] } }

    pub fn per_channel(scales: Vec<f32>) -> Self { Self { mask: PER_OC_MASK, scales } }

    pub fn count(&self) -> usize { self.scales.len() }

    pub fn is_per_tensor(&self) -> bool { self.count() == 1 }
}

impl Default for OutputScales {
    fn default() -> Self { Self::per_tensor(1.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EltwiseAlg {
    Relu,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostOp {
    /// dst = result + scale * dst_previous
    Sum { scale: f32 },
    /// Leaky relu with `alpha` as the negative slope.
    Eltwise { alg: EltwiseAlg, alpha: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundMode {
    /// Round half to even.
    #[default]
    Nearest,
    Down,
}

impl RoundMode {
    #[inline]
    pub fn apply(self, v: f32) -> f32 {
        match self {
            RoundMode::Nearest => v.round_ties_even(),
            RoundMode::Down => v.floor(),
        }
    }
}

/// Caller-supplied modifiers of a convolution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attr {
    pub output_scales: OutputScales,
    /// Negative slope of the fused relu; only read by relu variants.
    pub negative_slope: f32,
    pub post_ops: Vec<PostOp>,
    pub round_mode: RoundMode,
}

impl Attr {
    pub fn with_output_scales(mut self, scales: OutputScales) -> Self {
        self.output_scales = scales;
        self
    }

    pub fn with_negative_slope(mut self, slope: f32) -> Self {
        self.negative_slope = slope;
        self
    }

    pub fn with_post_op(mut self, op: PostOp) -> Self {
        self.post_ops.push(op);
        self
    }

    pub fn with_round_mode(mut self, mode: RoundMode) -> Self {
        self.round_mode = mode;
        self
    }

    pub fn sum_scale(&self) -> Option<f32> {
        self.post_ops.iter().find_map(|op| match op { PostOp::Sum { scale } => Some(*scale), _ => None })
    }

    pub fn eltwise_alpha(&self) -> Option<f32> {
        self.post_ops.iter().find_map(|op| match op { PostOp::Eltwise { alpha, .. } => Some(*alpha), _ => None })
    }

    /// Accepted chains: none, `[sum]`, `[eltwise]`, `[sum, eltwise]`.
    pub fn post_ops_ok(&self) -> bool {
        use PostOp::*;
        match self.post_ops.as_slice() {
            [] | [Sum { .. }] | [Eltwise { .. }] | [Sum { .. }, Eltwise { .. }] => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_op_chains() {
        let sum = PostOp::Sum { scale: 1.0 };
        let relu = PostOp::Eltwise { alg: EltwiseAlg::Relu, alpha: 0.0 };
        assert!(Attr::default().post_ops_ok());
        assert!(Attr::default().with_post_op(sum).with_post_op(relu).post_ops_ok());
        assert!(!Attr::default().with_post_op(relu).with_post_op(sum).post_ops_ok());
        assert!(!Attr::default().with_post_op(sum).with_post_op(sum).post_ops_ok());
    }

    #[test]
    fn nearest_rounds_half_to_even() {
        assert_eq!(RoundMode::Nearest.apply(2.5), 2.0);
        assert_eq!(RoundMode::Nearest.apply(3.5), 4.0);
        assert_eq!(RoundMode::Down.apply(-0.5), -1.0);
    }
}

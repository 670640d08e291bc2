use log::{info, warn};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConvError, Result};

/// Instruction-set tiers a kernel can be specialized for, narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CpuIsa {
    Sse42,
    Avx2,
}

/// Environment variable capping the tier returned by [`CpuIsa::detect`].
pub const MAX_CPU_ISA_ENV: &str = "QCONV_MAX_CPU_ISA";

impl CpuIsa {
    /// All tiers, widest first; the order implementations are tried in.
    pub const ALL: [CpuIsa; 2] = [CpuIsa::Avx2, CpuIsa::Sse42];

    /// f32 lanes in one vector register of this tier.
    pub const fn simd_w(self) -> usize {
        match self {
            CpuIsa::Avx2 => 8,
            CpuIsa::Sse42 => 4,
        }
    }

    pub const fn from_simd_w(w: usize) -> CpuIsa {
        match w {
            8 => CpuIsa::Avx2,
            4 => CpuIsa::Sse42,
            _ => panic!("no ISA tier with this SIMD width"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CpuIsa::Avx2 => "avx2",
            CpuIsa::Sse42 => "sse42",
        }
    }

    /// Whether the host CPU reports this tier. Off x86 the kernels run as
    /// portable code, so the narrowest tier is always reported there.
    pub fn is_supported(self) -> bool {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            match self {
                CpuIsa::Avx2 => is_x86_feature_detected!("avx2"),
                CpuIsa::Sse42 => is_x86_feature_detected!("sse4.2"),
            }
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            self == CpuIsa::Sse42
        }
    }

    /// Widest supported tier, capped by `QCONV_MAX_CPU_ISA` when set.
    pub fn detect() -> Option<CpuIsa> {
        let cap = match std::env::var(MAX_CPU_ISA_ENV) {
            Ok(v) => match v.parse::<CpuIsa>() {
                Ok(isa) => Some(isa),
                Err(e) => {
                    warn!("ignoring {}: {}", MAX_CPU_ISA_ENV, e);
                    None
                }
            },
            Err(_) => None,
        };
        let found = CpuIsa::ALL.iter().copied().filter(|isa| cap.map_or(true, |c| *isa <= c)).find(|isa| isa.is_supported());
        match found {
            Some(isa) => info!("Using CPU ISA: {}", isa),
            None => info!("No supported CPU ISA tier detected"),
        }
        found
    }
}

impl fmt::Display for CpuIsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for CpuIsa {
    type Err = ConvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avx2" => Ok(CpuIsa::Avx2),
            "sse42" | "sse4.2" => Ok(CpuIsa::Sse42),
            other => Err(ConvError::invalid(format!("unknown CPU ISA '{}'", other))),
        }
    }
}

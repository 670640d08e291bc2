// Quantized x8s8s32x convolution: descriptor validation, kernel planning,
// signed-input scale correction and execution.
pub mod attr;
pub mod conv;
pub mod error;
pub mod event;
pub mod isa;
pub mod kernel;
pub mod memory;
pub mod problem;
pub mod reference;
pub mod scales;
pub mod types;

// Re-exports kept minimal: the types needed to describe and run a convolution
pub use attr::{Attr, OutputScales, PostOp, RoundMode};
pub use conv::{ConvPrimitive, ConvolutionFwd, ConvolutionFwdPd, ExecArgs};
pub use error::{ConvError, Result};
pub use event::{Event, EventState};
pub use isa::CpuIsa;
pub use memory::Memory;
pub use types::{AlgKind, ConvDesc, DataType, Format, MemoryDesc, PropKind};

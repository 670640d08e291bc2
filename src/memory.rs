use crate::attr::RoundMode;
use crate::error::{ConvError, Result};
use crate::types::{DataType, MemoryDesc};

/// Owned tensor storage, one variant per data type.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    F32(Vec<f32>),
    S32(Vec<i32>),
    S16(Vec<i16>),
    S8(Vec<i8>),
    U8(Vec<u8>),
}

impl Buffer {
    pub fn zeroed(dt: DataType, n: usize) -> Self {
        match dt {
            DataType::F32 => Buffer::F32(vec![0.0; n]),
            DataType::S32 => Buffer::S32(vec![0; n]),
            DataType::S16 => Buffer::S16(vec![0; n]),
            DataType::S8 => Buffer::S8(vec![0; n]),
            DataType::U8 => Buffer::U8(vec![0; n]),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Buffer::F32(_) => DataType::F32,
            Buffer::S32(_) => DataType::S32,
            Buffer::S16(_) => DataType::S16,
            Buffer::S8(_) => DataType::S8,
            Buffer::U8(_) => DataType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::F32(v) => v.len(),
            Buffer::S32(v) => v.len(),
            Buffer::S16(v) => v.len(),
            Buffer::S8(v) => v.len(),
            Buffer::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    #[inline]
    pub fn get_f32(&self, i: usize) -> f32 {
        match self {
            Buffer::F32(v) => v[i],
            Buffer::S32(v) => v[i] as f32,
            Buffer::S16(v) => v[i] as f32,
            Buffer::S8(v) => v[i] as f32,
            Buffer::U8(v) => v[i] as f32,
        }
    }

    pub fn to_f32_vec(&self) -> Vec<f32> { (0..self.len()).map(|i| self.get_f32(i)).collect() }
}

/// Maps a Rust scalar to its `DataType` and gives typed access to a `Buffer`.
pub trait Element: Copy + Default + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn slice(buf: &Buffer) -> Option<&[Self]>;
    fn slice_mut(buf: &mut Buffer) -> Option<&mut [Self]>;
    fn into_buffer(v: Vec<Self>) -> Buffer;
    fn to_f32(self) -> f32;
    /// Round per `mode` and clamp into the representable range.
    fn saturate(v: f32, mode: RoundMode) -> Self;
}

/// Element types accepted as convolution input.
pub trait SrcElement: Element {
    fn to_i32(self) -> i32;
}

macro_rules! int_element {
    ($t:ty, $dt:ident) => {
        impl Element for $t {
            const DATA_TYPE: DataType = DataType::$dt;

            fn slice(buf: &Buffer) -> Option<&[Self]> {
                match buf { Buffer::$dt(v) => Some(v), _ => None }
            }

            fn slice_mut(buf: &mut Buffer) -> Option<&mut [Self]> {
                match buf { Buffer::$dt(v) => Some(v), _ => None }
            }

            fn into_buffer(v: Vec<Self>) -> Buffer { Buffer::$dt(v) }

            #[inline]
            fn to_f32(self) -> f32 { self as f32 }

            #[inline]
            fn saturate(v: f32, mode: RoundMode) -> Self {
                // `as` saturates at the type bounds and maps NaN to 0
                mode.apply(v) as $t
            }
        }
    };
}

int_element!(i32, S32);
int_element!(i16, S16);
int_element!(i8, S8);
int_element!(u8, U8);

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn slice(buf: &Buffer) -> Option<&[Self]> {
        match buf { Buffer::F32(v) => Some(v), _ => None }
    }

    fn slice_mut(buf: &mut Buffer) -> Option<&mut [Self]> {
        match buf { Buffer::F32(v) => Some(v), _ => None }
    }

    fn into_buffer(v: Vec<Self>) -> Buffer { Buffer::F32(v) }

    #[inline]
    fn to_f32(self) -> f32 { self }

    #[inline]
    fn saturate(v: f32, _mode: RoundMode) -> Self { v }
}

impl SrcElement for u8 {
    #[inline]
    fn to_i32(self) -> i32 { self as i32 }
}

impl SrcElement for i8 {
    #[inline]
    fn to_i32(self) -> i32 { self as i32 }
}

/// A tensor: descriptor plus storage whose type and length agree with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    desc: MemoryDesc,
    buf: Buffer,
}

impl Memory {
    pub fn zeroed(desc: MemoryDesc) -> Self {
        let buf = Buffer::zeroed(desc.data_type, desc.nelems());
        Self { desc, buf }
    }

    pub fn from_vec<T: Element>(desc: MemoryDesc, data: Vec<T>) -> Result<Self> {
        if T::DATA_TYPE != desc.data_type {
            return Err(ConvError::invalid(format!("buffer of {} for a {} descriptor", T::DATA_TYPE, desc.data_type)));
        }
        if data.len() != desc.nelems() {
            return Err(ConvError::invalid(format!("buffer holds {} elements, descriptor needs {}", data.len(), desc.nelems())));
        }
        Ok(Self { desc, buf: T::into_buffer(data) })
    }

    pub fn from_buffer(desc: MemoryDesc, buf: Buffer) -> Result<Self> {
        if buf.data_type() != desc.data_type || buf.len() != desc.nelems() {
            return Err(ConvError::invalid(format!(
                "{} buffer of {} elements for a {} descriptor of {}",
                buf.data_type(), buf.len(), desc.data_type, desc.nelems()
            )));
        }
        Ok(Self { desc, buf })
    }

    pub fn desc(&self) -> &MemoryDesc { &self.desc }

    pub fn buffer(&self) -> &Buffer { &self.buf }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> { T::slice(&self.buf) }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> { T::slice_mut(&mut self.buf) }

    pub fn to_f32_vec(&self) -> Vec<f32> { self.buf.to_f32_vec() }
}

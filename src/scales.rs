use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use log::debug;

use crate::attr::OutputScales;

/// Alignment of the corrected scale table; kernels load scale vectors with
/// aligned reads.
pub const SCALES_ALIGN: usize = 64;

/// Entries written for a per-tensor scale so a full vector can be loaded
/// without a broadcast. Covers the widest modeled tier (8 f32 lanes).
pub const PER_TENSOR_SCALES_PAD: usize = 8;

#[cfg(test)]
thread_local! {
    /// Tables allocated and not yet released on this thread.
    pub(crate) static LIVE_TABLES: std::cell::Cell<isize> = const { std::cell::Cell::new(0) };
}

/// Owned, 64-byte-aligned f32 buffer. Released on drop.
pub struct AlignedScales {
    ptr: NonNull<f32>,
    len: usize,
}

// The buffer is uniquely owned and never mutated after construction.
unsafe impl Send for AlignedScales {}
unsafe impl Sync for AlignedScales {}

impl AlignedScales {
    fn layout(len: usize) -> Layout {
        let bytes = len.max(1) * std::mem::size_of::<f32>();
        match Layout::from_size_align(bytes, SCALES_ALIGN) {
            Ok(l) => l,
            Err(_) => panic!("scale table of {} entries overflows the address space", len),
        }
    }

    /// Allocates `len` entries, entry `i` initialized to `f(i)`.
    pub fn from_fn(len: usize, mut f: impl FnMut(usize) -> f32) -> Self {
        let layout = Self::layout(len);
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc(layout) } as *mut f32;
        let ptr = match NonNull::new(raw) {
            Some(p) => p,
            None => handle_alloc_error(layout),
        };
        for i in 0..len {
            // SAFETY: i < len and the allocation holds at least len f32s.
            unsafe { ptr.as_ptr().add(i).write(f(i)) };
        }
        #[cfg(test)]
        LIVE_TABLES.with(|n| n.set(n.get() + 1));
        Self { ptr, len }
    }

    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: ptr points to len initialized f32s owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_ptr(&self) -> *const f32 { self.ptr.as_ptr() }
}

impl Deref for AlignedScales {
    type Target = [f32];

    fn deref(&self) -> &[f32] { self.as_slice() }
}

impl Drop for AlignedScales {
    fn drop(&mut self) {
        // SAFETY: allocated in from_fn with the same layout.
        unsafe { dealloc(self.ptr.as_ptr() as *mut u8, Self::layout(self.len)) };
        #[cfg(test)]
        LIVE_TABLES.with(|n| n.set(n.get() - 1));
    }
}

impl fmt::Debug for AlignedScales {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_list().entries(self.as_slice()).finish() }
}

/// Number of entries of the corrected table for `scales`.
pub fn corrected_len(scales: &OutputScales) -> usize {
    if scales.is_per_tensor() { PER_TENSOR_SCALES_PAD } else { scales.count() }
}

/// Output scales adjusted for the signed-input convention:
/// `entry[i] = scale[i] * (1 / wei_adj_scale)`, with a per-tensor scale
/// broadcast over [`PER_TENSOR_SCALES_PAD`] entries.
pub fn correct_output_scales(scales: &OutputScales, wei_adj_scale: f32) -> AlignedScales {
    let len = corrected_len(scales);
    let factor = 1.0 / wei_adj_scale;
    let per_tensor = scales.is_per_tensor();
    debug!("allocating corrected output scales: {} entries, factor {}", len, factor);
    AlignedScales::from_fn(len, |i| {
        let s = if per_tensor { scales.scales[0] } else { scales.scales[i] };
        s * factor
    })
}

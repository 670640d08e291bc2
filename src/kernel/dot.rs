//! Quantized dot products used by the kernels.

use crate::memory::SrcElement;

/// Sum of `src[i] * w[i]` accumulated in s32.
///
/// Works in groups of four, the unit the vector kernels reduce u8*s8 pairs in;
/// callers guarantee `ic` is a multiple of 4. Overflow wraps like a vector
/// s32 add.
#[inline]
pub fn dot_x8s8<S: SrcElement>(src: &[S], w: &[i8]) -> i32 {
    debug_assert_eq!(src.len(), w.len());
    let mut acc: i32 = 0;
    for (s4, w4) in src.chunks_exact(4).zip(w.chunks_exact(4)) {
        let mut quad = 0i32;
        for i in 0..4 { quad += s4[i].to_i32() * (w4[i] as i32); }
        acc = acc.wrapping_add(quad);
    }
    for (s, w) in src.chunks_exact(4).remainder().iter().zip(w.chunks_exact(4).remainder()) {
        acc = acc.wrapping_add(s.to_i32() * (*w as i32));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_naive_sum() {
        let src: Vec<u8> = (0..12).map(|i| (i * 20) as u8).collect();
        let w: Vec<i8> = (0..12).map(|i| (i as i8) - 6).collect();
        let naive: i32 = src.iter().zip(&w).map(|(&s, &w)| s as i32 * w as i32).sum();
        assert_eq!(dot_x8s8(&src, &w), naive);
    }

    #[test]
    fn handles_signed_extremes_without_overflow() {
        let src = vec![-128i8; 8];
        let w = vec![-128i8; 8];
        assert_eq!(dot_x8s8(&src, &w), 8 * 16384);
    }

    #[test]
    fn long_reductions_wrap_instead_of_panicking() {
        let n = 80_000;
        let src = vec![255u8; n];
        let w = vec![127i8; n];
        let exact = n as i64 * 255 * 127;
        assert!(exact > i32::MAX as i64);
        assert_eq!(dot_x8s8(&src, &w), exact as i32);
    }
}

//! Numeric helpers shared by the spectral pipeline
//!
//! Complex-to-power/phase conversions, a deterministic parallel map-reduce,
//! and the 16-bit PCM sample conversions used at the stream boundary.

use num_complex::Complex64;
use rayon::prelude::*;

/// Scale factor between 16-bit PCM and the [-1, 1) sample range
pub const PCM_SCALE: f64 = 32768.0;

/// Inputs shorter than this are reduced on the calling thread
const PARALLEL_CHUNK: usize = 4096;

// ============================================================================
// Spectrum Conversions
// ============================================================================

/// Power of a complex bin: re^2 + im^2
#[inline]
pub fn complex_to_power(c: Complex64) -> f64 {
    c.re * c.re + c.im * c.im
}

/// Phase of a complex bin: atan2(im, re)
#[inline]
pub fn complex_to_phase(c: Complex64) -> f64 {
    c.im.atan2(c.re)
}

/// Fill `out` with the per-bin power of `spectrum`
///
/// Both slices must have the same length.
pub fn compute_power_spectrum(spectrum: &[Complex64], out: &mut [f64]) {
    debug_assert_eq!(spectrum.len(), out.len());
    for (o, &c) in out.iter_mut().zip(spectrum.iter()) {
        *o = complex_to_power(c);
    }
}

// ============================================================================
// Map-Reduce
// ============================================================================

/// Chunked map-reduce over a slice.
///
/// Large inputs fan out over the rayon pool; the input is partitioned into
/// fixed-size chunks so the reduction tree depends only on the input length,
/// never on scheduling. `init` must be an identity of `reduce` (it seeds every
/// chunk). For `reduce = +` on `f64` the result is deterministic and agrees
/// with a sequential fold to within rounding of 1 ULP x n.
pub fn map_reduce<T, U, M, R>(input: &[T], init: U, map: M, reduce: R) -> U
where
    T: Sync,
    U: Clone + Send + Sync,
    M: Fn(&T) -> U + Sync,
    R: Fn(U, U) -> U + Send + Sync,
{
    if input.len() < PARALLEL_CHUNK {
        return input.iter().map(&map).fold(init, &reduce);
    }

    let partials: Vec<U> = input
        .par_chunks(PARALLEL_CHUNK)
        .map(|chunk| chunk.iter().map(&map).fold(init.clone(), &reduce))
        .collect();

    partials.into_iter().fold(init, &reduce)
}

// ============================================================================
// PCM Conversions
// ============================================================================

/// Map a signed 16-bit sample into [-1, 1)
#[inline]
pub fn short_to_double(x: i16) -> f64 {
    f64::from(x) / PCM_SCALE
}

/// Map a [-1, 1] sample back to signed 16-bit, rounding and saturating
#[inline]
pub fn double_to_short(x: f64) -> i16 {
    (x * PCM_SCALE).round().clamp(-32768.0, 32767.0) as i16
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complex_to_power() {
        assert_eq!(complex_to_power(Complex64::new(3.0, 4.0)), 25.0);
        assert_eq!(complex_to_power(Complex64::new(0.0, 0.0)), 0.0);
        assert_eq!(complex_to_power(Complex64::new(-2.0, 0.0)), 4.0);
    }

    #[test]
    fn test_complex_to_phase() {
        assert!((complex_to_phase(Complex64::new(1.0, 0.0)) - 0.0).abs() < 1e-12);
        assert!((complex_to_phase(Complex64::new(0.0, 1.0)) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((complex_to_phase(Complex64::new(-1.0, 0.0)) - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_compute_power_spectrum() {
        let spectrum = vec![
            Complex64::new(1.0, 1.0),
            Complex64::new(0.0, 2.0),
            Complex64::new(-3.0, 0.0),
        ];
        let mut out = vec![0.0; 3];
        compute_power_spectrum(&spectrum, &mut out);
        assert_eq!(out, vec![2.0, 4.0, 9.0]);
    }

    #[test]
    fn test_map_reduce_small_input() {
        let data: Vec<f64> = (1..=10).map(f64::from).collect();
        let sum = map_reduce(&data, 0.0, |&x| x, |a, b| a + b);
        assert_eq!(sum, 55.0);
    }

    #[test]
    fn test_map_reduce_matches_sequential() {
        // Cross the parallel threshold and compare against a plain fold.
        let data: Vec<f64> = (0..20_000).map(|i| (i as f64 * 0.37).sin()).collect();
        let sequential: f64 = data.iter().map(|&x| x * x).sum();
        let parallel = map_reduce(&data, 0.0, |&x| x * x, |a, b| a + b);
        assert!((sequential - parallel).abs() < 1e-9 * data.len() as f64);
    }

    #[test]
    fn test_map_reduce_is_deterministic() {
        let data: Vec<f64> = (0..50_000).map(|i| 1.0 / (i as f64 + 1.0)).collect();
        let first = map_reduce(&data, 0.0, |&x| x, |a, b| a + b);
        for _ in 0..4 {
            let again = map_reduce(&data, 0.0, |&x| x, |a, b| a + b);
            assert_eq!(first.to_bits(), again.to_bits());
        }
    }

    #[test]
    fn test_map_reduce_non_additive() {
        let data: Vec<f64> = (0..10_000).map(|i| ((i * 7919) % 1000) as f64).collect();
        let max = map_reduce(&data, f64::NEG_INFINITY, |&x| x, f64::max);
        assert_eq!(max, 999.0);
    }

    #[test]
    fn test_pcm_conversion() {
        assert_eq!(short_to_double(0), 0.0);
        assert_eq!(short_to_double(-32768), -1.0);
        assert!((short_to_double(32767) - 0.99997).abs() < 1e-4);

        assert_eq!(double_to_short(0.0), 0);
        assert_eq!(double_to_short(-1.0), -32768);
        // Saturates instead of wrapping
        assert_eq!(double_to_short(1.5), 32767);
        assert_eq!(double_to_short(-1.5), -32768);
    }

    #[test]
    fn test_pcm_round_trip() {
        for &x in &[0i16, 1, -1, 1234, -4321, 32767, -32768] {
            assert_eq!(double_to_short(short_to_double(x)), x);
        }
    }
}

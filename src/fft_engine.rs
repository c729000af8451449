//! Fixed-size real FFT harness over rustfft
//!
//! Forward transform of a length-N real frame yields the N/2+1 unique bins of
//! the Hermitian spectrum, unscaled. The inverse transform rebuilds the full
//! conjugate-symmetric spectrum and divides by N, so `ifft(fft(x)) = x`.

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Minimum FFT size supported
pub const MIN_FFT_SIZE: usize = 128;

/// Maximum FFT size supported
pub const MAX_FFT_SIZE: usize = 8192;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FftError {
    InvalidSize { size: usize },
    BufferSizeMismatch { expected: usize, got: usize },
}

impl std::fmt::Display for FftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FftError::InvalidSize { size } => write!(
                f,
                "Invalid FFT size: {}. Must be a power of 2 between {} and {}",
                size, MIN_FFT_SIZE, MAX_FFT_SIZE
            ),
            FftError::BufferSizeMismatch { expected, got } => {
                write!(f, "Buffer size mismatch. Expected {}, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for FftError {}

// ============================================================================
// FFT Engine
// ============================================================================

/// Forward/inverse real-FFT pair of a fixed size, with scratch buffers
pub struct FftEngine {
    fft_size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,

    // Pre-allocated working storage, re-sized only on re-planning
    work: Vec<Complex64>,
    scratch: Vec<Complex64>,
}

impl FftEngine {
    /// Plan transforms for the given size
    pub fn new(fft_size: usize) -> Result<Self, FftError> {
        validate_size(fft_size)?;

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Ok(Self {
            fft_size,
            forward,
            inverse,
            work: vec![Complex64::new(0.0, 0.0); fft_size],
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
        })
    }

    #[inline]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of unique bins of the real-signal spectrum: N/2 + 1
    #[inline]
    pub fn spectrum_size(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Re-plan for a new size, discarding the previous plans and buffers
    pub fn set_fft_size(&mut self, fft_size: usize) -> Result<(), FftError> {
        if fft_size == self.fft_size {
            return Ok(());
        }
        *self = FftEngine::new(fft_size)?;
        Ok(())
    }

    /// Forward transform: `input` (length N) -> `spectrum` (length N/2+1)
    ///
    /// The output is unscaled, so a unit impulse yields all-ones bins.
    pub fn forward(&mut self, input: &[f64], spectrum: &mut [Complex64]) -> Result<(), FftError> {
        if input.len() != self.fft_size {
            return Err(FftError::BufferSizeMismatch {
                expected: self.fft_size,
                got: input.len(),
            });
        }
        if spectrum.len() != self.spectrum_size() {
            return Err(FftError::BufferSizeMismatch {
                expected: self.spectrum_size(),
                got: spectrum.len(),
            });
        }

        for (w, &x) in self.work.iter_mut().zip(input.iter()) {
            *w = Complex64::new(x, 0.0);
        }
        self.forward.process_with_scratch(&mut self.work, &mut self.scratch);
        spectrum.copy_from_slice(&self.work[..self.spectrum_size()]);
        Ok(())
    }

    /// Inverse transform: `spectrum` (length N/2+1) -> `output` (length N)
    ///
    /// Conjugate symmetry is rebuilt from the packed bins (DC and Nyquist
    /// imaginary parts are dropped), so the output is always real-valued even
    /// if a spectral stage nudged a bin off the Hermitian constraint.
    pub fn inverse(&mut self, spectrum: &[Complex64], output: &mut [f64]) -> Result<(), FftError> {
        let nrf = self.spectrum_size();
        if spectrum.len() != nrf {
            return Err(FftError::BufferSizeMismatch {
                expected: nrf,
                got: spectrum.len(),
            });
        }
        if output.len() != self.fft_size {
            return Err(FftError::BufferSizeMismatch {
                expected: self.fft_size,
                got: output.len(),
            });
        }

        self.work[0] = Complex64::new(spectrum[0].re, 0.0);
        self.work[nrf - 1] = Complex64::new(spectrum[nrf - 1].re, 0.0);
        for k in 1..nrf - 1 {
            self.work[k] = spectrum[k];
            self.work[self.fft_size - k] = spectrum[k].conj();
        }

        self.inverse.process_with_scratch(&mut self.work, &mut self.scratch);

        let scale = 1.0 / self.fft_size as f64;
        for (o, w) in output.iter_mut().zip(self.work.iter()) {
            *o = w.re * scale;
        }
        Ok(())
    }
}

fn validate_size(fft_size: usize) -> Result<(), FftError> {
    if !fft_size.is_power_of_two() || fft_size < MIN_FFT_SIZE || fft_size > MAX_FFT_SIZE {
        return Err(FftError::InvalidSize { size: fft_size });
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::TAU;

    #[test]
    fn test_engine_creation() {
        assert!(FftEngine::new(128).is_ok());
        assert!(FftEngine::new(512).is_ok());
        assert!(FftEngine::new(8192).is_ok());

        assert!(FftEngine::new(0).is_err());
        assert!(FftEngine::new(64).is_err());
        assert!(FftEngine::new(500).is_err());
        assert!(FftEngine::new(16384).is_err());
    }

    #[test]
    fn test_round_trip_random() {
        let mut rng = SmallRng::seed_from_u64(17);
        for n in [128usize, 512, 1024] {
            let mut engine = FftEngine::new(n).unwrap();
            let input: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let mut spectrum = vec![Complex64::new(0.0, 0.0); n / 2 + 1];
            let mut output = vec![0.0; n];

            engine.forward(&input, &mut spectrum).unwrap();
            engine.inverse(&spectrum, &mut output).unwrap();

            let tolerance = 1e-10 * n as f64;
            for (a, b) in input.iter().zip(output.iter()) {
                assert!((a - b).abs() < tolerance);
            }
        }
    }

    #[test]
    fn test_forward_is_unscaled() {
        // A unit impulse transforms to all-ones bins.
        let n = 256;
        let mut engine = FftEngine::new(n).unwrap();
        let mut input = vec![0.0; n];
        input[0] = 1.0;
        let mut spectrum = vec![Complex64::new(0.0, 0.0); n / 2 + 1];
        engine.forward(&input, &mut spectrum).unwrap();
        for bin in &spectrum {
            assert!((bin.re - 1.0).abs() < 1e-12);
            assert!(bin.im.abs() < 1e-12);
        }
    }

    #[test]
    fn test_sinusoid_lands_on_its_bin() {
        let n = 512;
        let bin = 32;
        let mut engine = FftEngine::new(n).unwrap();
        let input: Vec<f64> = (0..n)
            .map(|i| (TAU * bin as f64 * i as f64 / n as f64).cos())
            .collect();
        let mut spectrum = vec![Complex64::new(0.0, 0.0); n / 2 + 1];
        engine.forward(&input, &mut spectrum).unwrap();

        // Full-scale cosine on an exact bin: |Y[bin]| = N/2
        assert!((spectrum[bin].norm() - n as f64 / 2.0).abs() < 1e-8);
        assert!(spectrum[bin - 1].norm() < 1e-8);
        assert!(spectrum[bin + 1].norm() < 1e-8);
    }

    #[test]
    fn test_inverse_restores_hermitian_packing() {
        // Corrupt the Nyquist imaginary part; output must stay real-valued.
        let n = 128;
        let mut engine = FftEngine::new(n).unwrap();
        let input: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).sin()).collect();
        let mut spectrum = vec![Complex64::new(0.0, 0.0); n / 2 + 1];
        let mut output = vec![0.0; n];

        engine.forward(&input, &mut spectrum).unwrap();
        spectrum[n / 2].im = 5.0;
        spectrum[0].im = -3.0;
        engine.inverse(&spectrum, &mut output).unwrap();

        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_set_fft_size_replans() {
        let mut engine = FftEngine::new(512).unwrap();
        engine.set_fft_size(1024).unwrap();
        assert_eq!(engine.fft_size(), 1024);
        assert_eq!(engine.spectrum_size(), 513);

        let input = vec![0.25; 1024];
        let mut spectrum = vec![Complex64::new(0.0, 0.0); 513];
        let mut output = vec![0.0; 1024];
        engine.forward(&input, &mut spectrum).unwrap();
        engine.inverse(&spectrum, &mut output).unwrap();
        for x in &output {
            assert!((x - 0.25).abs() < 1e-10);
        }

        assert!(engine.set_fft_size(100).is_err());
        // Failed re-plan leaves the previous size in place
        assert_eq!(engine.fft_size(), 1024);
    }

    #[test]
    fn test_size_mismatch_errors() {
        let mut engine = FftEngine::new(256).unwrap();
        let input = vec![0.0; 128];
        let mut spectrum = vec![Complex64::new(0.0, 0.0); 129];
        assert!(matches!(
            engine.forward(&input, &mut spectrum),
            Err(FftError::BufferSizeMismatch { .. })
        ));
    }
}

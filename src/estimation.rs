//! Per-frame noise-power estimation
//!
//! Estimators implement a four-operation surface: the per-frame update, clone
//! (parameters only, never history), and the two lifecycle events. Dispatch
//! goes through the closed [`NoiseEstimator`] enum so the hot path is a match,
//! not a vtable call.

use num_complex::Complex64;

use crate::config::{EstimatorKind, SubtractionConfig};
use crate::martin::MartinEstimation;
use crate::math_util::{self, complex_to_power, compute_power_spectrum};

/// Per-frame noise-power estimator surface
pub trait Estimation {
    /// Update `noise_power` from the frame spectrum.
    ///
    /// Returns false on soft rejection: the frame was judged not to be noise
    /// and `noise_power` keeps the last accepted estimate.
    fn estimate_frame(
        &mut self,
        spectrum: &[Complex64],
        noise_power: &mut [f64],
        config: &SubtractionConfig,
    ) -> bool;

    /// The FFT size changed; drop all size-dependent state
    fn on_fft_size_update(&mut self);

    /// The signal changed (new speaker, explicit reset); drop all history
    fn on_data_update(&mut self);
}

// ============================================================================
// Simple Estimation
// ============================================================================

/// Reset value for the gate; large enough that the first real frame wins
const NOISE_RMS_RESET: f64 = 1.0e5;

/// A frame may exceed the gate by this factor and still count as noise
const RISE_TOLERANCE: f64 = 1.02;

/// RMS-gating estimator
///
/// Tracks the lowest spectral RMS seen so far; a frame whose RMS is steady or
/// falling relative to that level is taken as noise and its periodogram
/// becomes the estimate. Louder frames are rejected and the previous estimate
/// stays in effect.
#[derive(Debug)]
pub struct SimpleEstimation {
    noise_rms: f64,
}

impl SimpleEstimation {
    pub fn new() -> Self {
        Self {
            noise_rms: NOISE_RMS_RESET,
        }
    }
}

impl Default for SimpleEstimation {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimpleEstimation {
    /// Clones duplicate parameters, not history
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Estimation for SimpleEstimation {
    fn estimate_frame(
        &mut self,
        spectrum: &[Complex64],
        noise_power: &mut [f64],
        _config: &SubtractionConfig,
    ) -> bool {
        debug_assert_eq!(spectrum.len(), noise_power.len());

        let power_sum = math_util::map_reduce(
            spectrum,
            0.0,
            |c| complex_to_power(*c),
            |a, b| a + b,
        );
        let current_rms = (power_sum / spectrum.len() as f64).sqrt();

        // A level that is steady or falling reads as noise; rising slowly
        // enough still counts.
        if current_rms <= self.noise_rms * RISE_TOLERANCE {
            self.noise_rms = current_rms;
            compute_power_spectrum(spectrum, noise_power);
            true
        } else {
            false
        }
    }

    fn on_fft_size_update(&mut self) {
        // Nothing size-dependent to drop
    }

    fn on_data_update(&mut self) {
        self.noise_rms = NOISE_RMS_RESET;
    }
}

// ============================================================================
// Estimator Dispatch
// ============================================================================

/// Closed set of estimator variants
#[derive(Debug, Clone)]
pub enum NoiseEstimator {
    Simple(SimpleEstimation),
    Martin(MartinEstimation),
}

impl NoiseEstimator {
    pub fn from_kind(kind: EstimatorKind) -> Self {
        match kind {
            EstimatorKind::Simple => NoiseEstimator::Simple(SimpleEstimation::new()),
            EstimatorKind::Martin => NoiseEstimator::Martin(MartinEstimation::new()),
        }
    }
}

impl Estimation for NoiseEstimator {
    fn estimate_frame(
        &mut self,
        spectrum: &[Complex64],
        noise_power: &mut [f64],
        config: &SubtractionConfig,
    ) -> bool {
        match self {
            NoiseEstimator::Simple(e) => e.estimate_frame(spectrum, noise_power, config),
            NoiseEstimator::Martin(e) => e.estimate_frame(spectrum, noise_power, config),
        }
    }

    fn on_fft_size_update(&mut self) {
        match self {
            NoiseEstimator::Simple(e) => e.on_fft_size_update(),
            NoiseEstimator::Martin(e) => e.on_fft_size_update(),
        }
    }

    fn on_data_update(&mut self) {
        match self {
            NoiseEstimator::Simple(e) => e.on_data_update(),
            NoiseEstimator::Martin(e) => e.on_data_update(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Spectral-subtraction rules
//!
//! Each rule turns the frame spectrum and the current noise-power estimate
//! into per-bin real gains and applies them in place. Multiplying a complex
//! bin by a non-negative real gain keeps the phase untouched and the
//! magnitude non-negative, which is the contract every variant must honor.

use num_complex::Complex64;

use crate::config::SubtractorKind;
use crate::math_util::{complex_to_power, map_reduce};

/// Decision-directed smoothing weight for the two-step rule
const ALPHA_DD: f64 = 0.98;

/// Per-bin subtraction rule surface, mirroring the estimator lifecycle
pub trait Subtraction {
    /// Rewrite `spectrum` in place using the estimated `noise_power`
    fn apply(&mut self, spectrum: &mut [Complex64], noise_power: &[f64]);

    /// The FFT size changed; drop all size-dependent state
    fn on_fft_size_update(&mut self);

    /// The signal changed; drop all history
    fn on_data_update(&mut self);
}

// ============================================================================
// Standard Rule
// ============================================================================

/// `|S|^2 = max(|Y|^2 - alpha*P_n, beta*P_n)`
#[derive(Debug, Clone, Copy)]
pub struct StandardSubtraction {
    alpha: f64,
    beta: f64,
}

impl StandardSubtraction {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }
}

impl Subtraction for StandardSubtraction {
    fn apply(&mut self, spectrum: &mut [Complex64], noise_power: &[f64]) {
        subtract_power(spectrum, noise_power, self.alpha, self.beta);
    }

    fn on_fft_size_update(&mut self) {}

    fn on_data_update(&mut self) {}
}

/// Shared power-domain subtraction with a noise-relative floor
fn subtract_power(spectrum: &mut [Complex64], noise_power: &[f64], alpha: f64, beta: f64) {
    debug_assert_eq!(spectrum.len(), noise_power.len());

    for (bin, &noise) in spectrum.iter_mut().zip(noise_power.iter()) {
        let power = complex_to_power(*bin);
        if power <= 0.0 {
            // A zero bin carries no phase to reuse
            continue;
        }
        let target = (power - alpha * noise).max(beta * noise);
        *bin *= (target / power).sqrt();
    }
}

// ============================================================================
// Berouti Rule
// ============================================================================

/// Standard rule with the over-subtraction factor driven by the segmental SNR
#[derive(Debug, Clone, Copy)]
pub struct BeroutiSubtraction {
    alpha: f64,
    beta: f64,
}

impl BeroutiSubtraction {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }
}

impl Subtraction for BeroutiSubtraction {
    fn apply(&mut self, spectrum: &mut [Complex64], noise_power: &[f64]) {
        debug_assert_eq!(spectrum.len(), noise_power.len());

        let signal: f64 = map_reduce(spectrum, 0.0, |c| complex_to_power(*c), |a, b| a + b);
        let noise: f64 = map_reduce(noise_power, 0.0, |n| *n, |a, b| a + b);

        // alpha shrinks by 3/20 per dB of segmental SNR, never below 1
        let alpha_eff = if noise > 0.0 && signal > 0.0 {
            let snr_db = 10.0 * (signal / noise).log10();
            (self.alpha - 0.15 * snr_db).clamp(1.0, self.alpha + 0.75)
        } else {
            self.alpha
        };

        subtract_power(spectrum, noise_power, alpha_eff, self.beta);
    }

    fn on_fft_size_update(&mut self) {}

    fn on_data_update(&mut self) {}
}

// ============================================================================
// Two-Step Rule
// ============================================================================

/// Decision-directed first pass refined by a second a-priori SNR estimate
///
/// The first pass smooths the a-priori SNR with the previous frame's output
/// (weight [`ALPHA_DD`]); the second pass re-estimates the SNR through the
/// first-pass gain, which removes most of the smoothing bias on transients.
#[derive(Debug)]
pub struct TwoStepSubtraction {
    alpha: f64,
    beta: f64,
    prev_output: Vec<f64>,
}

impl TwoStepSubtraction {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self {
            alpha,
            beta,
            prev_output: Vec::new(),
        }
    }
}

impl Clone for TwoStepSubtraction {
    /// Clones duplicate parameters, not history
    fn clone(&self) -> Self {
        Self::new(self.alpha, self.beta)
    }
}

impl Subtraction for TwoStepSubtraction {
    fn apply(&mut self, spectrum: &mut [Complex64], noise_power: &[f64]) {
        debug_assert_eq!(spectrum.len(), noise_power.len());

        if self.prev_output.len() != spectrum.len() {
            self.prev_output = vec![0.0; spectrum.len()];
        }

        for (k, (bin, &noise)) in spectrum.iter_mut().zip(noise_power.iter()).enumerate() {
            let power = complex_to_power(*bin);
            if power <= 0.0 {
                self.prev_output[k] = 0.0;
                continue;
            }
            if noise <= 0.0 {
                // Nothing to subtract
                self.prev_output[k] = power;
                continue;
            }

            let post = power / (self.alpha * noise);

            // Step 1: decision-directed a-priori SNR
            let xi_dd = ALPHA_DD * self.prev_output[k] / noise
                + (1.0 - ALPHA_DD) * (post - 1.0).max(0.0);
            let gain_1 = xi_dd / (1.0 + xi_dd);

            // Step 2: re-estimate the SNR through the first-pass gain
            let xi_2 = gain_1 * gain_1 * post;
            let gain_2 = xi_2 / (1.0 + xi_2);

            let output = (gain_2 * gain_2 * power).max(self.beta * noise);
            self.prev_output[k] = output;
            *bin *= (output / power).sqrt();
        }
    }

    fn on_fft_size_update(&mut self) {
        self.prev_output.clear();
    }

    fn on_data_update(&mut self) {
        self.prev_output.fill(0.0);
    }
}

// ============================================================================
// Subtractor Dispatch
// ============================================================================

/// Closed set of subtraction variants
#[derive(Debug, Clone)]
pub enum SpectralSubtractor {
    Standard(StandardSubtraction),
    TwoStep(TwoStepSubtraction),
    Berouti(BeroutiSubtraction),
}

impl SpectralSubtractor {
    pub fn from_kind(kind: SubtractorKind) -> Self {
        match kind {
            SubtractorKind::Standard { alpha, beta } => {
                SpectralSubtractor::Standard(StandardSubtraction::new(alpha, beta))
            }
            SubtractorKind::TwoStep { alpha, beta } => {
                SpectralSubtractor::TwoStep(TwoStepSubtraction::new(alpha, beta))
            }
            SubtractorKind::Berouti { alpha, beta } => {
                SpectralSubtractor::Berouti(BeroutiSubtraction::new(alpha, beta))
            }
        }
    }
}

impl Subtraction for SpectralSubtractor {
    fn apply(&mut self, spectrum: &mut [Complex64], noise_power: &[f64]) {
        match self {
            SpectralSubtractor::Standard(s) => s.apply(spectrum, noise_power),
            SpectralSubtractor::TwoStep(s) => s.apply(spectrum, noise_power),
            SpectralSubtractor::Berouti(s) => s.apply(spectrum, noise_power),
        }
    }

    fn on_fft_size_update(&mut self) {
        match self {
            SpectralSubtractor::Standard(s) => s.on_fft_size_update(),
            SpectralSubtractor::TwoStep(s) => s.on_fft_size_update(),
            SpectralSubtractor::Berouti(s) => s.on_fft_size_update(),
        }
    }

    fn on_data_update(&mut self) {
        match self {
            SpectralSubtractor::Standard(s) => s.on_data_update(),
            SpectralSubtractor::TwoStep(s) => s.on_data_update(),
            SpectralSubtractor::Berouti(s) => s.on_data_update(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

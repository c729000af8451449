//! Session configuration
//!
//! A [`SubtractionConfig`] is immutable for the lifetime of a session; the
//! manager replaces it wholesale through an explicit reconfiguration event.
//! Validation happens before any samples flow.

use std::str::FromStr;

use crate::fft_engine::{MAX_FFT_SIZE, MIN_FFT_SIZE};
use crate::window::WindowShape;

/// Default over-subtraction factor
pub const DEFAULT_ALPHA: f64 = 2.0;

/// Default spectral floor relative to the noise estimate
pub const DEFAULT_BETA: f64 = 0.02;

/// Default FFT size
pub const DEFAULT_FFT_SIZE: usize = 512;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidFftSize { size: usize },
    InvalidHopSize { hop: usize, fft_size: usize },
    InvalidSamplingRate { rate: u32 },
    InvalidParameter { name: &'static str, value: f64 },
    UnknownVariant { field: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidFftSize { size } => write!(
                f,
                "Invalid FFT size: {}. Must be a power of 2 between {} and {}",
                size, MIN_FFT_SIZE, MAX_FFT_SIZE
            ),
            ConfigError::InvalidHopSize { hop, fft_size } => write!(
                f,
                "Invalid hop size: {}. Must be in (0, {}]",
                hop, fft_size
            ),
            ConfigError::InvalidSamplingRate { rate } => {
                write!(f, "Invalid sampling rate: {} Hz", rate)
            }
            ConfigError::InvalidParameter { name, value } => {
                write!(f, "Invalid parameter {}: {}", name, value)
            }
            ConfigError::UnknownVariant { field, value } => {
                write!(f, "Unknown {} variant: {:?}", field, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Stage Variants
// ============================================================================

/// Noise-estimation stage selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    /// RMS gating against the last accepted noise level
    Simple,
    /// Martin (2001) minimum statistics
    Martin,
}

impl FromStr for EstimatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(EstimatorKind::Simple),
            "martin" => Ok(EstimatorKind::Martin),
            _ => Err(ConfigError::UnknownVariant {
                field: "estimator",
                value: s.to_string(),
            }),
        }
    }
}

/// Spectral-subtraction rule selector, with per-variant parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubtractorKind {
    /// `|S|^2 = max(|Y|^2 - alpha*P_n, beta*P_n)`
    Standard { alpha: f64, beta: f64 },
    /// Decision-directed first pass, refined a-priori SNR second pass
    TwoStep { alpha: f64, beta: f64 },
    /// Over-subtraction driven by the segmental SNR
    Berouti { alpha: f64, beta: f64 },
}

impl SubtractorKind {
    pub fn alpha(&self) -> f64 {
        match *self {
            SubtractorKind::Standard { alpha, .. }
            | SubtractorKind::TwoStep { alpha, .. }
            | SubtractorKind::Berouti { alpha, .. } => alpha,
        }
    }

    pub fn beta(&self) -> f64 {
        match *self {
            SubtractorKind::Standard { beta, .. }
            | SubtractorKind::TwoStep { beta, .. }
            | SubtractorKind::Berouti { beta, .. } => beta,
        }
    }
}

impl FromStr for SubtractorKind {
    type Err = ConfigError;

    /// Parses the variant name; parameters take their defaults
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(SubtractorKind::Standard {
                alpha: DEFAULT_ALPHA,
                beta: DEFAULT_BETA,
            }),
            "two-step" => Ok(SubtractorKind::TwoStep {
                alpha: DEFAULT_ALPHA,
                beta: DEFAULT_BETA,
            }),
            "berouti" => Ok(SubtractorKind::Berouti {
                alpha: 4.0,
                beta: DEFAULT_BETA,
            }),
            _ => Err(ConfigError::UnknownVariant {
                field: "subtractor",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Immutable per-session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SubtractionConfig {
    /// Sampling rate in Hz
    pub sampling_rate: u32,
    /// FFT size N, a power of two in [128, 8192]
    pub fft_size: usize,
    /// Frame increment H in samples, in (0, N]
    pub hop_size: usize,
    /// Analysis window shape
    pub window: WindowShape,
    /// Noise-estimation stage
    pub estimator: EstimatorKind,
    /// Spectral-subtraction stage
    pub subtractor: SubtractorKind,
}

impl SubtractionConfig {
    /// Configuration with the given rate and FFT size, hop N/2, Hann window,
    /// Martin estimation, standard subtraction
    pub fn new(sampling_rate: u32, fft_size: usize) -> Self {
        Self {
            sampling_rate,
            fft_size,
            hop_size: fft_size / 2,
            window: WindowShape::Hann,
            estimator: EstimatorKind::Martin,
            subtractor: SubtractorKind::Standard {
                alpha: DEFAULT_ALPHA,
                beta: DEFAULT_BETA,
            },
        }
    }

    /// Validate all fields; must pass before a session is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_rate == 0 {
            return Err(ConfigError::InvalidSamplingRate {
                rate: self.sampling_rate,
            });
        }
        if !self.fft_size.is_power_of_two()
            || self.fft_size < MIN_FFT_SIZE
            || self.fft_size > MAX_FFT_SIZE
        {
            return Err(ConfigError::InvalidFftSize {
                size: self.fft_size,
            });
        }
        if self.hop_size == 0 || self.hop_size > self.fft_size {
            return Err(ConfigError::InvalidHopSize {
                hop: self.hop_size,
                fft_size: self.fft_size,
            });
        }
        if self.subtractor.alpha() < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "alpha",
                value: self.subtractor.alpha(),
            });
        }
        if !(0.0..=1.0).contains(&self.subtractor.beta()) {
            return Err(ConfigError::InvalidParameter {
                name: "beta",
                value: self.subtractor.beta(),
            });
        }
        Ok(())
    }

    /// Number of unique spectrum bins: N/2 + 1
    #[inline]
    pub fn spectrum_size(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Frame increment in seconds: H / rate
    #[inline]
    pub fn tinc(&self) -> f64 {
        self.hop_size as f64 / self.sampling_rate as f64
    }
}

impl Default for SubtractionConfig {
    fn default() -> Self {
        Self::new(16_000, DEFAULT_FFT_SIZE)
    }
}

// ============================================================================
// Tests
// ============================================================================

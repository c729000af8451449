//! Single-channel noise reduction core based on short-time spectral subtraction
//!
//! The engine turns a 16-bit PCM stream into a denoised stream of the same
//! rate: the [`SubtractionManager`] frames the stream with overlap-add,
//! estimates the instantaneous noise power spectrum per frame (RMS gating or
//! Martin minimum statistics), subtracts it from the short-time spectrum, and
//! resynthesizes. Output lags input by N - H samples.
//!
//! Hosts either drive a [`SubtractionManager`] directly
//! (`read_buffer` / `execute` / `write_buffer`) or embed the engine through
//! the C-ABI surface at the bottom of this module.

/// Session configuration and variant selection
pub mod config;
/// Per-frame noise-power estimation
pub mod estimation;
/// Fixed-size real FFT harness
pub mod fft_engine;
/// Session orchestration and the streaming surface
pub mod manager;
/// Martin minimum-statistics estimator
pub mod martin;
/// Numeric helpers
pub mod math_util;
/// Streaming sample FIFO
pub mod ring_buffer;
/// Spectral-subtraction rules
pub mod subtraction;
/// Window generation
pub mod window;

pub use config::{ConfigError, EstimatorKind, SubtractionConfig, SubtractorKind};
pub use estimation::{Estimation, NoiseEstimator, SimpleEstimation};
pub use manager::{DenoiseError, SubtractionManager};
pub use martin::MartinEstimation;
pub use subtraction::{SpectralSubtractor, Subtraction};
pub use window::WindowShape;

// ============================================================================
// C-ABI Embedding Surface
// ============================================================================

/// Create a session with the default configuration at the given rate.
///
/// Returns null if the configuration is rejected. The handle must be released
/// with [`denoise_free`].
#[no_mangle]
pub extern "C" fn denoise_new(sampling_rate: u32) -> *mut SubtractionManager {
    let config = SubtractionConfig::new(sampling_rate, config::DEFAULT_FFT_SIZE);
    match SubtractionManager::new(config) {
        Ok(manager) => Box::into_raw(Box::new(manager)),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Release a session handle.
///
/// # Safety
/// `handle` must come from [`denoise_new`] and must not be used afterwards.
/// Null is accepted and ignored.
#[no_mangle]
pub unsafe extern "C" fn denoise_free(handle: *mut SubtractionManager) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Denoise `len` samples of `buffer` in place: read, execute, write.
///
/// Returns 0 on success, -1 on a null handle or buffer.
///
/// # Safety
/// `handle` must be a live session handle and `buffer` must point to `len`
/// valid samples. Sessions are single-threaded; the caller serializes access.
#[no_mangle]
pub unsafe extern "C" fn denoise_compute_frame(
    handle: *mut SubtractionManager,
    buffer: *mut i16,
    len: usize,
) -> i32 {
    if handle.is_null() || buffer.is_null() {
        return -1;
    }
    let manager = &mut *handle;
    let samples = std::slice::from_raw_parts_mut(buffer, len);
    match manager.compute_frame(samples) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Discard all signal history, as on a speaker change.
///
/// # Safety
/// `handle` must be a live session handle; null is accepted and ignored.
#[no_mangle]
pub unsafe extern "C" fn denoise_reset_frame(handle: *mut SubtractionManager) {
    if !handle.is_null() {
        (*handle).on_data_update();
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Session orchestration
//!
//! [`SubtractionManager`] owns the configuration, the FFT engine, the stream
//! buffers, and the active estimator/subtractor pair, and drives the
//! per-frame loop: hop the sliding analysis window, apply the analysis
//! window, forward FFT, estimate, subtract, inverse FFT, overlap-add, emit.
//!
//! Synthesis is rectangular; the overlap-add sum of the analysis window at
//! the configured hop is divided out, so with estimation and subtraction
//! bypassed the engine is an identity delayed by N - H samples.
//!
//! A session is single-threaded: exactly one owner touches the manager at a
//! time and every public operation runs to completion synchronously.

use num_complex::Complex64;
use tracing::debug;

use crate::config::{ConfigError, SubtractionConfig};
use crate::estimation::{Estimation, NoiseEstimator};
use crate::fft_engine::{FftEngine, FftError};
use crate::math_util::{double_to_short, short_to_double};
use crate::ring_buffer::SampleFifo;
use crate::subtraction::{SpectralSubtractor, Subtraction};
use crate::window::cola_constant;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DenoiseError {
    Config(ConfigError),
    Fft(FftError),
    BufferTooSmall { expected: usize, got: usize },
}

impl std::fmt::Display for DenoiseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenoiseError::Config(e) => write!(f, "Configuration error: {}", e),
            DenoiseError::Fft(e) => write!(f, "FFT error: {}", e),
            DenoiseError::BufferTooSmall { expected, got } => {
                write!(f, "Destination too small: need {}, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for DenoiseError {}

impl From<ConfigError> for DenoiseError {
    fn from(e: ConfigError) -> Self {
        DenoiseError::Config(e)
    }
}

impl From<FftError> for DenoiseError {
    fn from(e: FftError) -> Self {
        DenoiseError::Fft(e)
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Owner of one denoise session
pub struct SubtractionManager {
    config: SubtractionConfig,
    fft: FftEngine,

    analysis_window: Vec<f64>,
    window_compensation: f64,

    // Stream buffers
    input: SampleFifo,
    output: SampleFifo,
    read_scratch: Vec<f64>,
    write_scratch: Vec<f64>,
    last_read_len: usize,

    // Per-frame working set
    frame_time: Vec<f64>,
    windowed: Vec<f64>,
    spectrum: Vec<Complex64>,
    noise_power: Vec<f64>,
    synth: Vec<f64>,
    overlap: Vec<f64>,

    // Processing stages
    estimator: NoiseEstimator,
    subtractor: SpectralSubtractor,

    frame_index: u64,
    first_frame_pending: bool,
    bypass: bool,
}

impl SubtractionManager {
    /// Build a session from a validated configuration
    pub fn new(config: SubtractionConfig) -> Result<Self, DenoiseError> {
        config.validate()?;

        let fft = FftEngine::new(config.fft_size)?;
        let n = config.fft_size;
        let h = config.hop_size;
        let nrf = config.spectrum_size();

        let analysis_window = config.window.generate(n);
        let window_compensation = 1.0 / cola_constant(&analysis_window, h);

        // Pre-load the latency: the stream behaves as if N - H zeros preceded
        // the first real sample, which makes overlap-add complete from the
        // first emitted hop.
        let mut input = SampleFifo::with_capacity(2 * n);
        input.push(&vec![0.0; n - h]);

        debug!(
            fft_size = n,
            hop_size = h,
            sampling_rate = config.sampling_rate,
            "denoise session configured"
        );

        Ok(Self {
            fft,
            analysis_window,
            window_compensation,
            input,
            output: SampleFifo::with_capacity(2 * n),
            read_scratch: Vec::new(),
            write_scratch: Vec::new(),
            last_read_len: 0,
            frame_time: vec![0.0; n],
            windowed: vec![0.0; n],
            spectrum: vec![Complex64::new(0.0, 0.0); nrf],
            noise_power: vec![0.0; nrf],
            synth: vec![0.0; n],
            overlap: vec![0.0; n],
            estimator: NoiseEstimator::from_kind(config.estimator),
            subtractor: SpectralSubtractor::from_kind(config.subtractor),
            frame_index: 0,
            first_frame_pending: true,
            bypass: false,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &SubtractionConfig {
        &self.config
    }

    /// Samples by which the output lags the input: N - H
    #[inline]
    pub fn latency_samples(&self) -> usize {
        self.config.fft_size - self.config.hop_size
    }

    /// Frames processed since the session (or the last data update) began
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Skip estimation and subtraction, leaving the framing harness active
    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    /// Replace the session configuration.
    ///
    /// Buffers are reallocated for the new sizes and both stages are rebuilt
    /// and notified through `on_fft_size_update`. The unconsumed input
    /// backlog and the not-yet-emitted analysis history are carried over, so
    /// the stream continues across the barrier with at most the new latency
    /// of silence inserted. On error the previous session is untouched.
    pub fn configure(&mut self, config: SubtractionConfig) -> Result<(), DenoiseError> {
        config.validate()?;
        let fft = FftEngine::new(config.fft_size)?;

        let n = config.fft_size;
        let h = config.hop_size;
        let nrf = config.spectrum_size();

        // Samples consumed into the sliding window but not yet emitted
        let history: Vec<f64> = if self.first_frame_pending {
            Vec::new()
        } else {
            self.frame_time[self.config.hop_size..].to_vec()
        };
        let backlog = self.input.drain();

        self.fft = fft;
        self.analysis_window = config.window.generate(n);
        self.window_compensation = 1.0 / cola_constant(&self.analysis_window, h);
        self.frame_time = vec![0.0; n];
        self.windowed = vec![0.0; n];
        self.spectrum = vec![Complex64::new(0.0, 0.0); nrf];
        self.noise_power = vec![0.0; nrf];
        self.synth = vec![0.0; n];
        self.overlap = vec![0.0; n];

        self.estimator = NoiseEstimator::from_kind(config.estimator);
        self.subtractor = SpectralSubtractor::from_kind(config.subtractor);
        self.estimator.on_fft_size_update();
        self.subtractor.on_fft_size_update();

        self.input.push(&vec![0.0; n - h]);
        self.input.push(&history);
        self.input.push(&backlog);

        self.frame_index = 0;
        self.first_frame_pending = true;

        debug!(
            fft_size = n,
            hop_size = h,
            sampling_rate = config.sampling_rate,
            "denoise session reconfigured"
        );
        self.config = config;
        Ok(())
    }

    /// Clear all signal history: next frame re-initializes both stages
    pub fn on_data_update(&mut self) {
        debug!("data update: discarding estimator and subtractor history");
        self.estimator.on_data_update();
        self.subtractor.on_data_update();
        self.frame_index = 0;
    }

    /// Queue 16-bit samples for processing.
    ///
    /// The conversion scratch grows to the largest request seen and is reused
    /// afterwards, never shrinking.
    pub fn read_buffer(&mut self, src: &[i16]) {
        if src.len() > self.read_scratch.len() {
            self.read_scratch.resize(src.len(), 0.0);
        }
        for (d, &s) in self.read_scratch.iter_mut().zip(src.iter()) {
            *d = short_to_double(s);
        }
        self.input.push(&self.read_scratch[..src.len()]);
        self.last_read_len = src.len();
    }

    /// Process every whole frame currently buffered; the partial tail stays
    /// queued for the next call. Returns the number of frames processed.
    pub fn execute(&mut self) -> Result<usize, DenoiseError> {
        let n = self.config.fft_size;
        let h = self.config.hop_size;
        let mut frames = 0;

        loop {
            if self.first_frame_pending {
                if !self.input.pop_into(&mut self.frame_time) {
                    break;
                }
                self.first_frame_pending = false;
            } else {
                self.frame_time.rotate_left(h);
                if !self.input.pop_into(&mut self.frame_time[n - h..]) {
                    self.frame_time.rotate_right(h);
                    break;
                }
            }

            for ((w, &x), &a) in self
                .windowed
                .iter_mut()
                .zip(self.frame_time.iter())
                .zip(self.analysis_window.iter())
            {
                *w = x * a;
            }
            self.fft.forward(&self.windowed, &mut self.spectrum)?;

            if !self.bypass {
                // A rejected frame keeps the previous accepted estimate
                self.estimator
                    .estimate_frame(&self.spectrum, &mut self.noise_power, &self.config);
                self.subtractor.apply(&mut self.spectrum, &self.noise_power);
            }

            self.fft.inverse(&self.spectrum, &mut self.synth)?;

            for (acc, &s) in self.overlap.iter_mut().zip(self.synth.iter()) {
                *acc += s * self.window_compensation;
            }
            self.output.push(&self.overlap[..h]);
            self.overlap.rotate_left(h);
            self.overlap[n - h..].fill(0.0);

            self.frame_index += 1;
            frames += 1;
        }

        Ok(frames)
    }

    /// Emit as many samples as the last `read_buffer` call queued.
    ///
    /// Inside the startup or post-reconfiguration latency window the pipeline
    /// may not have produced that many yet; the head of `dst` is then filled
    /// with silence.
    pub fn write_buffer(&mut self, dst: &mut [i16]) -> Result<usize, DenoiseError> {
        let len = self.last_read_len;
        if dst.len() < len {
            return Err(DenoiseError::BufferTooSmall {
                expected: len,
                got: dst.len(),
            });
        }

        let ready = self.output.available().min(len);
        let lead = len - ready;
        for d in dst[..lead].iter_mut() {
            *d = 0;
        }

        if self.write_scratch.len() < ready {
            self.write_scratch.resize(ready, 0.0);
        }
        let ok = self.output.pop_into(&mut self.write_scratch[..ready]);
        debug_assert!(ok);
        for (d, &s) in dst[lead..len].iter_mut().zip(self.write_scratch.iter()) {
            *d = double_to_short(s);
        }
        Ok(len)
    }

    /// Denoise `buffer` in place: read, execute, write
    pub fn compute_frame(&mut self, buffer: &mut [i16]) -> Result<(), DenoiseError> {
        self.read_buffer(buffer);
        self.execute()?;
        self.write_buffer(buffer)?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EstimatorKind, SubtractorKind};
    use crate::math_util::{double_to_short, short_to_double};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use std::f64::consts::TAU;

    const RATE: u32 = 16_000;
    const N: usize = 512;
    const H: usize = 256;

    fn manager(estimator: EstimatorKind) -> SubtractionManager {
        let mut cfg = SubtractionConfig::new(RATE, N);
        cfg.estimator = estimator;
        SubtractionManager::new(cfg).unwrap()
    }

    /// Stream `input` through the manager in hop-sized chunks
    fn run(manager: &mut SubtractionManager, input: &[i16]) -> Vec<i16> {
        let mut output = Vec::with_capacity(input.len());
        for chunk in input.chunks(H) {
            let mut buf = chunk.to_vec();
            manager.compute_frame(&mut buf).unwrap();
            output.extend_from_slice(&buf);
        }
        output
    }

    fn tone(len: usize, freq: f64, amplitude: f64) -> Vec<f64> {
        (0..len)
            .map(|i| amplitude * (TAU * freq * i as f64 / RATE as f64).sin())
            .collect()
    }

    fn to_pcm(samples: &[f64]) -> Vec<i16> {
        samples.iter().map(|&x| double_to_short(x)).collect()
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let cfg = SubtractionConfig::new(RATE, 500);
        assert!(matches!(
            SubtractionManager::new(cfg),
            Err(DenoiseError::Config(ConfigError::InvalidFftSize { .. }))
        ));
    }

    #[test]
    fn test_latency() {
        let m = manager(EstimatorKind::Martin);
        assert_eq!(m.latency_samples(), N - H);
    }

    #[test]
    fn test_bypass_is_delayed_identity() {
        let mut m = manager(EstimatorKind::Martin);
        m.set_bypass(true);

        let input = to_pcm(&tone(8192, 440.0, 0.7));
        let output = run(&mut m, &input);
        assert_eq!(output.len(), input.len());

        let latency = m.latency_samples();
        for (j, &out) in output.iter().enumerate().skip(latency) {
            let expect = input[j - latency];
            // One LSB of slack for the PCM round trip
            assert!(
                (i32::from(out) - i32::from(expect)).abs() <= 1,
                "sample {j}: {out} vs {expect}"
            );
        }
        // The latency head is the primed silence
        for &out in &output[..latency] {
            assert_eq!(out, 0);
        }
    }

    #[test]
    fn test_silence_in_silence_out() {
        // Scenario: one second of zeros stays exactly zero
        let mut m = manager(EstimatorKind::Martin);
        let input = vec![0i16; RATE as usize];
        let output = run(&mut m, &input);
        assert!(output.iter().all(|&s| s == 0));
        assert!(m.frame_index() > 60);
    }

    #[test]
    fn test_tone_preserved_after_silence() {
        // Scenario: with a zero noise estimate learned from leading silence,
        // a pure tone passes through within 0.5 dB.
        let mut m = manager(EstimatorKind::Simple);

        let silence = vec![0.0; 3072];
        let tone_sig = tone(16_128, 1000.0, 0.5);
        let mut input = silence;
        input.extend_from_slice(&tone_sig);
        let pcm = to_pcm(&input);
        let output = run(&mut m, &pcm);

        // Compare RMS over a steady stretch of the tone, shifted by latency
        let start = 3072 + 1024;
        let len = 8192;
        let rms_in: f64 = (input[start..start + len].iter().map(|x| x * x).sum::<f64>()
            / len as f64)
            .sqrt();
        let rms_out: f64 = (output[start + 256..start + 256 + len]
            .iter()
            .map(|&s| {
                let x = short_to_double(s);
                x * x
            })
            .sum::<f64>()
            / len as f64)
            .sqrt();

        let db = 20.0 * (rms_out / rms_in).log10();
        assert!(db.abs() < 0.5, "tone level moved by {db} dB");
    }

    #[test]
    fn test_snr_improves_on_noisy_tone() {
        // Scenario: noise-only warmup, then tone + noise; the denoised error
        // against the clean tone drops by at least 5 dB.
        let mut cfg = SubtractionConfig::new(RATE, N);
        cfg.estimator = EstimatorKind::Martin;
        cfg.subtractor = SubtractorKind::Standard {
            alpha: 4.0,
            beta: 0.02,
        };
        let mut m = SubtractionManager::new(cfg).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        let gauss = Normal::new(0.0, 0.05).unwrap();

        let warmup_len = 24_064; // ~1.5 s, hop aligned
        let tone_len = 16_128; // ~1 s
        let total = warmup_len + tone_len;

        let mut clean = vec![0.0; warmup_len];
        clean.extend_from_slice(&tone(tone_len, 1000.0, 0.5));
        let input: Vec<f64> = clean
            .iter()
            .map(|&c| c + gauss.sample(&mut rng))
            .collect();

        let pcm = to_pcm(&input);
        let output = run(&mut m, &pcm);
        assert_eq!(output.len(), total);

        // Last half second of the tone, past onset and convergence effects,
        // leaving room for the latency shift at the stream tail
        let start = warmup_len + tone_len - 8192;
        let len = 7936;
        let mut err_in = 0.0;
        let mut err_out = 0.0;
        for j in start..start + len {
            let e_in = input[j] - clean[j];
            let e_out = short_to_double(output[j + 256]) - clean[j];
            err_in += e_in * e_in;
            err_out += e_out * e_out;
        }
        let improvement = 10.0 * (err_in / err_out).log10();
        assert!(improvement >= 5.0, "SNR improved by only {improvement} dB");
    }

    #[test]
    fn test_reconfigure_mid_stream() {
        // Scenario: switch N = 512 -> 1024 mid-stream; the stream keeps
        // flowing and sample counts stay matched call for call.
        let mut m = manager(EstimatorKind::Martin);
        let mut rng = SmallRng::seed_from_u64(13);
        let gauss = Normal::new(0.0, 0.1).unwrap();
        let noise: Vec<i16> = (0..16_384)
            .map(|_| double_to_short(gauss.sample(&mut rng)))
            .collect();

        let first = run(&mut m, &noise[..8192]);
        assert_eq!(first.len(), 8192);

        let mut cfg = m.config().clone();
        cfg.fft_size = 1024;
        cfg.hop_size = 512;
        m.configure(cfg).unwrap();
        assert_eq!(m.latency_samples(), 512);
        assert_eq!(m.frame_index(), 0);

        let second = run(&mut m, &noise[8192..]);
        assert_eq!(second.len(), 8192);
        assert!(m.frame_index() > 0);
    }

    #[test]
    fn test_reconfigure_error_keeps_session() {
        let mut m = manager(EstimatorKind::Martin);
        let mut bad = m.config().clone();
        bad.fft_size = 999;
        assert!(m.configure(bad).is_err());
        assert_eq!(m.config().fft_size, N);

        // Still processes normally
        let input = to_pcm(&tone(2048, 500.0, 0.3));
        let output = run(&mut m, &input);
        assert_eq!(output.len(), 2048);
    }

    #[test]
    fn test_data_update_keeps_stream_flowing() {
        let mut m = manager(EstimatorKind::Simple);
        let input = to_pcm(&tone(4096, 300.0, 0.4));

        let a = run(&mut m, &input);
        assert_eq!(a.len(), 4096);
        assert!(m.frame_index() > 0);

        m.on_data_update();
        assert_eq!(m.frame_index(), 0);

        let b = run(&mut m, &input);
        assert_eq!(b.len(), 4096);
    }

    #[test]
    fn test_read_scratch_grows_never_shrinks() {
        let mut m = manager(EstimatorKind::Simple);
        m.read_buffer(&vec![0i16; 4000]);
        let grown = m.read_scratch.len();
        assert!(grown >= 4000);
        m.read_buffer(&vec![0i16; 16]);
        assert_eq!(m.read_scratch.len(), grown);
    }

    #[test]
    fn test_write_buffer_checks_destination() {
        let mut m = manager(EstimatorKind::Simple);
        m.read_buffer(&vec![0i16; 512]);
        m.execute().unwrap();
        let mut small = vec![0i16; 100];
        assert!(matches!(
            m.write_buffer(&mut small),
            Err(DenoiseError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_write_before_fill_pads_silence() {
        let mut m = manager(EstimatorKind::Simple);
        // Half a hop: no frame can complete yet
        m.read_buffer(&vec![1000i16; 128]);
        m.execute().unwrap();
        let mut out = vec![42i16; 128];
        assert_eq!(m.write_buffer(&mut out).unwrap(), 128);
        assert!(out.iter().all(|&s| s == 0));
    }
}

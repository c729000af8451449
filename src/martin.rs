//! Martin minimum-statistics noise estimator
//!
//! Tracks the minimum of the optimally smoothed periodogram over a sliding
//! window of `nu` sub-windows of `nv` frames each, and corrects the bias of
//! that minimum using the estimated inverse degrees of freedom per bin
//! (R. Martin, "Noise power spectral density estimation based on optimal
//! smoothing and minimum statistics", 2001).
//!
//! The whole working set lives in an explicit state record owned by the
//! estimator instance; it is rebuilt from the first frame after any lifecycle
//! event, so no state from a previous FFT size or speaker stays reachable.

use num_complex::Complex64;

use crate::config::SubtractionConfig;
use crate::estimation::Estimation;
use crate::math_util::compute_power_spectrum;

// Time constants in seconds, from the published algorithm
const TIME_ALPHA_C: f64 = 0.0449; // smoothing of the correction factor alpha_c
const TIME_ALPHA_MAX: f64 = 0.392; // longest smoothing of the power estimate
const TIME_ALPHA_MIN: f64 = 0.0133; // upper limit of the smoothing floor
const TIME_P_FALL: f64 = 0.064; // decay of P when the SNR collapses
const TIME_BETA_MAX: f64 = 0.0717; // longest smoothing of the variance estimate

/// Seconds spanned by the whole minimum-tracking window
const MINIMUM_SPAN: f64 = 1.536;

/// Preferred number of sub-windows
const SUBWINDOWS: usize = 8;

/// Bounds on the equivalent degrees of freedom Qeq
const QEQ_MIN: f64 = 2.0;
const QEQ_MAX: f64 = 14.0;

/// Fudge factor in the bias correction Bc
const BIAS_FUDGE: f64 = 2.12;

/// Thresholds on the mean inverse Qeq selecting the allowed noise slope
const QI_THRESHOLDS: [f64; 4] = [0.03, 0.05, 0.06, f64::INFINITY];

/// Noise-slope caps in dB per second, by threshold index
const NOISE_SLOPE_DB: [f64; 4] = [47.0, 31.4, 15.7, 4.1];

/// 18-point (d, m, h) bias table, interpolated in sqrt(d)
const DMH: [[f64; 3]; 18] = [
    [1.0, 0.0, 0.0],
    [2.0, 0.26, 0.15],
    [5.0, 0.48, 0.48],
    [8.0, 0.58, 0.78],
    [10.0, 0.61, 0.98],
    [15.0, 0.668, 1.55],
    [20.0, 0.705, 2.0],
    [30.0, 0.762, 2.3],
    [40.0, 0.8, 2.52],
    [60.0, 0.841, 3.1],
    [80.0, 0.865, 3.38],
    [120.0, 0.89, 4.15],
    [140.0, 0.9, 4.35],
    [160.0, 0.91, 4.25],
    [180.0, 0.92, 3.9],
    [220.0, 0.93, 4.1],
    [260.0, 0.935, 4.7],
    [300.0, 0.94, 5.0],
];

/// Interpolated (m, h) bias values for a minimum window of `d` frames.
///
/// Exact at table abscissae; the last row covers everything past 300.
fn mh_values(d: f64) -> (f64, f64) {
    let last = DMH.len() - 1;
    if d >= DMH[last][0] {
        return (DMH[last][1], DMH[last][2]);
    }
    let mut i = 0;
    while DMH[i][0] < d {
        i += 1;
    }
    if i == 0 || DMH[i][0] == d {
        return (DMH[i][1], DMH[i][2]);
    }

    let j = i - 1;
    let qj = DMH[j][0].sqrt();
    let qi = DMH[i][0].sqrt();
    let q = d.sqrt();
    let h = DMH[i][2] + (q - qi) * (DMH[j][2] - DMH[i][2]) / (qj - qi);
    let m = DMH[i][1] + (qi * qj / q - qj) * (DMH[j][1] - DMH[i][1]) / (qi - qj);
    (m, h)
}

// ============================================================================
// State Record
// ============================================================================

/// Complete working set of the estimator, sized to one spectrum
#[derive(Debug, Clone)]
struct MartinState {
    // Constants derived from the frame increment, fixed per session
    alpha_c_smooth: f64,
    alpha_c_min: f64,
    alpha_max: f64,
    alpha_min_h: f64,
    beta_max: f64,
    snr_exp: f64,
    nu: usize,
    nv: usize,
    nd: f64,
    m_d: f64,
    m_v: f64,
    noise_slope_max: [f64; 4],
    qeq_inv_max: f64,
    qeq_inv_min: f64,

    // Evolving scalars
    alpha_c: f64,
    subwc: usize,
    ibuf: usize,
    frame: u64,

    // Per-bin state, all of length nrf
    yft: Vec<f64>,
    p: Vec<f64>,
    sn2: Vec<f64>,
    pb: Vec<f64>,
    pb2: Vec<f64>,
    pminu: Vec<f64>,
    actmin: Vec<f64>,
    actminsub: Vec<f64>,
    lminflag: Vec<bool>,
    actbuf: Vec<Vec<f64>>,

    // Per-frame scratch kept across the two passes of the recurrence
    ah: Vec<f64>,
    qeqi: Vec<f64>,
    kmod: Vec<bool>,
}

impl MartinState {
    /// Build a fresh state from the first frame after a (re)init
    fn init(spectrum: &[Complex64], config: &SubtractionConfig) -> Self {
        let nrf = spectrum.len();
        let tinc = config.tinc();

        let alpha_c_smooth = (-tinc / TIME_ALPHA_C).exp();
        let alpha_max = (-tinc / TIME_ALPHA_MAX).exp();
        let alpha_min_h = (-tinc / TIME_ALPHA_MIN).exp();
        let beta_max = (-tinc / TIME_BETA_MAX).exp();
        let snr_exp = -tinc / TIME_P_FALL;

        let mut nu = SUBWINDOWS;
        let mut nv = (MINIMUM_SPAN / (tinc * nu as f64)).round();
        if nv < 4.0 {
            // Sub-windows this short lose the minimum statistics; stretch
            // them and shrink the ring instead.
            nv = 4.0;
            nu = (MINIMUM_SPAN / (tinc * nv)).round().max(1.0) as usize;
        }
        let nv = nv as usize;
        let nd = (nu * nv) as f64;

        let (m_d, _) = mh_values(nd);
        let (m_v, _) = mh_values(nv as f64);

        let mut noise_slope_max = [0.0; 4];
        for (cap, &db) in noise_slope_max.iter_mut().zip(NOISE_SLOPE_DB.iter()) {
            *cap = 10.0_f64.powf(db * nv as f64 * tinc / 10.0);
        }

        let mut yft = vec![0.0; nrf];
        compute_power_spectrum(spectrum, &mut yft);
        let pb2 = yft.iter().map(|&y| y * y).collect();

        Self {
            alpha_c_smooth,
            alpha_c_min: alpha_c_smooth,
            alpha_max,
            alpha_min_h,
            beta_max,
            snr_exp,
            nu,
            nv,
            nd,
            m_d,
            m_v,
            noise_slope_max,
            qeq_inv_max: 1.0 / QEQ_MIN,
            qeq_inv_min: 1.0 / QEQ_MAX,
            alpha_c: 1.0,
            subwc: nv,
            ibuf: 0,
            frame: 0,
            p: yft.clone(),
            sn2: yft.clone(),
            pb: yft.clone(),
            pminu: yft.clone(),
            actmin: vec![f64::INFINITY; nrf],
            actminsub: vec![f64::INFINITY; nrf],
            lminflag: vec![false; nrf],
            actbuf: vec![vec![f64::INFINITY; nrf]; nu],
            ah: vec![0.0; nrf],
            qeqi: vec![0.0; nrf],
            kmod: vec![false; nrf],
            pb2,
            yft,
        }
    }

    /// One step of the per-frame recurrence
    fn process_frame(&mut self, spectrum: &[Complex64], noise_power: &mut [f64]) {
        let nrf = self.yft.len();
        self.frame += 1;
        let t = self.frame as f64;

        compute_power_spectrum(spectrum, &mut self.yft);

        // Coarse correction factor from the whole-spectrum power ratio
        let sum_p: f64 = self.p.iter().sum();
        let sum_y: f64 = self.yft.iter().sum();
        let ratio = if sum_y > 0.0 { sum_p / sum_y } else { 1.0 };
        let acb = 1.0 / (1.0 + (ratio - 1.0).powi(2));
        self.alpha_c = self.alpha_c_smooth * self.alpha_c
            + (1.0 - self.alpha_c_smooth) * acb.max(self.alpha_c_min);

        // Per-bin smoothing parameter, shrinking where P strays from sn2
        let amax_ac = self.alpha_max * self.alpha_c;
        for k in 0..nrf {
            let r = if self.sn2[k] > 0.0 {
                self.p[k] / self.sn2[k]
            } else {
                1.0
            };
            self.ah[k] = amax_ac / (1.0 + (r - 1.0).powi(2));
        }

        // Smoothing floor driven by the broadband SNR
        let sum_sn2: f64 = self.sn2.iter().sum();
        let snr = if sum_sn2 > 0.0 { sum_p / sum_sn2 } else { 1.0 };
        let floor = self.alpha_min_h.min(snr.powf(self.snr_exp));

        for k in 0..nrf {
            let ah = self.ah[k].max(floor);
            self.ah[k] = ah;
            self.p[k] = ah * self.p[k] + (1.0 - ah) * self.yft[k];

            // Variance-tracking smoother and the inverse degrees of freedom
            let b = (ah * ah).min(self.beta_max);
            self.pb[k] = b * self.pb[k] + (1.0 - b) * self.p[k];
            self.pb2[k] = b * self.pb2[k] + (1.0 - b) * self.p[k] * self.p[k];

            let denom = 2.0 * self.sn2[k] * self.sn2[k];
            let raw = if denom > 0.0 {
                (self.pb2[k] - self.pb[k] * self.pb[k]) / denom
            } else {
                self.qeq_inv_max
            };
            // Fixed floor of 1/14, per-frame cap of (1/2)/t; the floor wins
            // once the cap shrinks below it, so the value always stays inside
            // [1/14, 1/2].
            self.qeqi[k] = raw.min(self.qeq_inv_max / t).max(self.qeq_inv_min);
        }

        let qiav: f64 = self.qeqi.iter().sum::<f64>() / nrf as f64;
        let bc = 1.0 + BIAS_FUDGE * qiav.sqrt();

        // Bias-corrected candidates for the running minimum
        let nv_f = self.nv as f64;
        for k in 0..nrf {
            let qeq = 1.0 / self.qeqi[k];
            let bmin_d = 1.0 + 2.0 * (self.nd - 1.0) * (1.0 - self.m_d) / (qeq - 2.0 * self.m_d);
            let bmin_v = 1.0 + 2.0 * (nv_f - 1.0) * (1.0 - self.m_v) / (qeq - 2.0 * self.m_v);

            let candidate = bc * self.p[k] * bmin_d;
            let is_new_min = candidate < self.actmin[k];
            self.kmod[k] = is_new_min;
            if is_new_min {
                self.actmin[k] = candidate;
                self.actminsub[k] = bc * self.p[k] * bmin_v;
            }
        }

        if self.subwc > 0 && self.subwc < self.nv {
            // Middle of a sub-window: fold the running minimum into sn2
            for k in 0..nrf {
                self.lminflag[k] |= self.kmod[k];
                self.pminu[k] = self.pminu[k].min(self.actminsub[k]);
                self.sn2[k] = self.pminu[k];
            }
        } else if self.subwc >= self.nv {
            // Sub-window boundary: rotate the ring and latch local minima
            for k in 0..nrf {
                self.actbuf[self.ibuf][k] = self.actmin[k];
            }
            self.ibuf = (self.ibuf + 1) % self.nu;

            for k in 0..nrf {
                let mut min = f64::INFINITY;
                for slot in &self.actbuf {
                    min = min.min(slot[k]);
                }
                self.pminu[k] = min;
            }

            // A local minimum inside the last sub-window may replace the
            // window minimum if it stays under the allowed noise slope.
            let slope_idx = QI_THRESHOLDS
                .iter()
                .position(|&th| qiav < th)
                .unwrap_or(QI_THRESHOLDS.len() - 1);
            let nsm = self.noise_slope_max[slope_idx];

            for k in 0..nrf {
                let local_min = self.lminflag[k]
                    && !self.kmod[k]
                    && self.actminsub[k] < nsm * self.pminu[k]
                    && self.actminsub[k] > self.pminu[k];
                if local_min {
                    self.pminu[k] = self.actminsub[k];
                    for slot in &mut self.actbuf {
                        slot[k] = self.actminsub[k];
                    }
                }
                self.lminflag[k] = false;
                self.actmin[k] = f64::INFINITY;
            }
            self.subwc = 0;
        }
        self.subwc += 1;

        noise_power.copy_from_slice(&self.sn2);
    }
}

// ============================================================================
// Estimator
// ============================================================================

/// Minimum-statistics estimator instance
///
/// `None` state means the next frame rebuilds the working set from scratch.
#[derive(Debug)]
pub struct MartinEstimation {
    state: Option<MartinState>,
}

impl MartinEstimation {
    pub fn new() -> Self {
        Self { state: None }
    }
}

impl Default for MartinEstimation {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MartinEstimation {
    /// Clones duplicate parameters, not history
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Estimation for MartinEstimation {
    fn estimate_frame(
        &mut self,
        spectrum: &[Complex64],
        noise_power: &mut [f64],
        config: &SubtractionConfig,
    ) -> bool {
        debug_assert_eq!(spectrum.len(), noise_power.len());

        let needs_init = match &self.state {
            Some(state) => state.yft.len() != spectrum.len(),
            None => true,
        };
        if needs_init {
            self.state = Some(MartinState::init(spectrum, config));
        }
        if let Some(state) = self.state.as_mut() {
            state.process_frame(spectrum, noise_power);
        }
        true
    }

    fn on_fft_size_update(&mut self) {
        self.state = None;
    }

    fn on_data_update(&mut self) {
        self.state = None;
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Analysis and synthesis window generation
//!
//! Windows use the periodic (DFT-even) form so that Hann at hop N/2 satisfies
//! the constant-overlap-add property with constant 1.

use std::f64::consts::TAU;
use std::str::FromStr;

use crate::config::ConfigError;

/// Supported window shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowShape {
    /// Hann window, the default analysis window
    Hann,
    /// Hamming window
    Hamming,
    /// Rectangular (no weighting)
    Rectangular,
}

impl WindowShape {
    /// Generate window coefficients for the given size
    pub fn generate(&self, size: usize) -> Vec<f64> {
        let mut window = vec![0.0; size];
        self.generate_into(&mut window);
        window
    }

    /// Generate window coefficients into an existing buffer
    pub fn generate_into(&self, window: &mut [f64]) {
        let size = window.len();
        if size == 0 {
            return;
        }

        let scale = TAU / size as f64;
        match self {
            WindowShape::Hann => {
                for (i, w) in window.iter_mut().enumerate() {
                    *w = 0.5 - 0.5 * (i as f64 * scale).cos();
                }
            }
            WindowShape::Hamming => {
                for (i, w) in window.iter_mut().enumerate() {
                    *w = 0.54 - 0.46 * (i as f64 * scale).cos();
                }
            }
            WindowShape::Rectangular => window.fill(1.0),
        }
    }
}

impl FromStr for WindowShape {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hann" => Ok(WindowShape::Hann),
            "hamming" => Ok(WindowShape::Hamming),
            "rectangular" => Ok(WindowShape::Rectangular),
            _ => Err(ConfigError::UnknownVariant {
                field: "window",
                value: s.to_string(),
            }),
        }
    }
}

/// Steady-state overlap-add sum of `window` at hop `hop`.
///
/// Position `n` of the steady-state stream is covered by the window values at
/// offsets `n + j*hop`; the returned value is the mean of that profile over
/// one hop period. Dividing synthesized frames by this constant makes bypass
/// processing unity-gain.
pub fn cola_constant(window: &[f64], hop: usize) -> f64 {
    let size = window.len();
    if size == 0 || hop == 0 {
        return 1.0;
    }

    let hop = hop.min(size);
    let mut sum = 0.0;
    for offset in 0..hop {
        let mut acc = 0.0;
        let mut idx = offset;
        while idx < size {
            acc += window[idx];
            idx += hop;
        }
        sum += acc;
    }

    let avg = sum / hop as f64;
    if avg.abs() < 1e-9 {
        1.0
    } else {
        avg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_endpoints() {
        let w = WindowShape::Hann.generate(8);
        assert_eq!(w.len(), 8);
        // Periodic form: starts at 0, peak at size/2
        assert!(w[0].abs() < 1e-12);
        assert!((w[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_hamming_endpoints() {
        let w = WindowShape::Hamming.generate(8);
        assert!((w[0] - 0.08).abs() < 1e-12);
        assert!((w[4] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rectangular() {
        let w = WindowShape::Rectangular.generate(16);
        assert!(w.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_hann_cola_at_half_overlap() {
        // Periodic Hann at hop N/2 overlap-adds to exactly 1 everywhere.
        for n in [128usize, 512, 2048] {
            let w = WindowShape::Hann.generate(n);
            let hop = n / 2;
            for offset in 0..hop {
                let s: f64 = (0..n / hop).map(|j| w[offset + j * hop]).sum();
                assert!((s - 1.0).abs() < 1e-12, "offset {offset}: sum {s}");
            }
            assert!((cola_constant(&w, hop) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rectangular_cola() {
        let w = WindowShape::Rectangular.generate(512);
        assert!((cola_constant(&w, 256) - 2.0).abs() < 1e-12);
        assert!((cola_constant(&w, 512) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse() {
        assert_eq!("hann".parse::<WindowShape>().unwrap(), WindowShape::Hann);
        assert_eq!("hamming".parse::<WindowShape>().unwrap(), WindowShape::Hamming);
        assert_eq!(
            "rectangular".parse::<WindowShape>().unwrap(),
            WindowShape::Rectangular
        );
        assert!("kaiser".parse::<WindowShape>().is_err());
    }
}

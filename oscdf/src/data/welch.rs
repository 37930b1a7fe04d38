use std::f64::consts::PI;
use std::sync::Arc;

use osccore::data::trials::TrialMatrix;
use osccore::{PeakError, Result};
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

/// Periodic Hann window of `size` points.
pub fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// One-sided power spectral density estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct Psd {
    pub frequency: Vec<f64>,
    pub density: Vec<f64>,
}

/// Welch averaged periodogram: Hann windowed segments with 50 % overlap,
/// mean removed per segment, density scaling.
pub struct WelchEstimator {
    segment_length: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl WelchEstimator {
    pub fn new(segment_length: usize) -> Result<Self> {
        if segment_length < 2 {
            return Err(PeakError::InvalidArgument(format!(
                "segment length {} is too short",
                segment_length
            )));
        }
        let fft = FftPlanner::<f64>::new().plan_fft_forward(segment_length);
        Ok(WelchEstimator { segment_length, window: hann(segment_length), fft })
    }

    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    pub fn frequencies(&self, sample_rate: f64) -> Vec<f64> {
        let n = self.segment_length;
        (0..=n / 2).map(|k| k as f64 * sample_rate / n as f64).collect()
    }

    pub fn estimate(&self, signal: &[f64], sample_rate: f64) -> Result<Psd> {
        let n = self.segment_length;
        if signal.len() < n {
            return Err(PeakError::Profiler(format!(
                "signal of {} samples is shorter than one {}-sample segment",
                signal.len(),
                n
            )));
        }
        let step = n - n / 2;
        let bins = n / 2 + 1;
        let window_power: f64 = self.window.iter().map(|w| w * w).sum();
        let scale = 1.0 / (sample_rate * window_power);

        let mut density = vec![0.0f64; bins];
        let mut buffer = vec![Complex64::new(0.0, 0.0); n];
        let mut segments = 0usize;
        let mut start = 0usize;

        while start + n <= signal.len() {
            let segment = &signal[start..start + n];
            let mean = segment.iter().sum::<f64>() / n as f64;
            for ((b, &s), &w) in buffer.iter_mut().zip(segment).zip(&self.window) {
                *b = Complex64::new((s - mean) * w, 0.0);
            }
            self.fft.process(&mut buffer);

            for (k, d) in density.iter_mut().enumerate() {
                let mut p = buffer[k].norm_sqr() * scale;
                // fold negative frequencies, except DC and an even Nyquist bin
                if k > 0 && !(n % 2 == 0 && k == n / 2) {
                    p *= 2.0;
                }
                *d += p;
            }
            segments += 1;
            start += step;
        }

        for d in &mut density {
            *d /= segments as f64;
        }
        Ok(Psd { frequency: self.frequencies(sample_rate), density })
    }

    /// Trial-averaged density of every row of `trials`.
    pub fn estimate_trials(&self, trials: &TrialMatrix, sample_rate: f64) -> Result<Psd> {
        if trials.n_trials() == 0 {
            return Err(PeakError::Profiler("no trials to estimate".to_string()));
        }
        let per_trial = (0..trials.n_trials())
            .into_par_iter()
            .map(|r| self.estimate(trials.row(r), sample_rate).map(|p| p.density))
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let mut density = vec![0.0f64; self.segment_length / 2 + 1];
        for row in &per_trial {
            for (d, v) in density.iter_mut().zip(row) {
                *d += v;
            }
        }
        let n = per_trial.len() as f64;
        for d in &mut density {
            *d /= n;
        }
        Ok(Psd { frequency: self.frequencies(sample_rate), density })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / rate).sin()).collect()
    }

    #[test]
    fn test_hann_window() {
        let w = hann(256);
        assert!(w[0].abs() < 1e-12);
        assert!((w[128] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sine_peak_bin() {
        let est = WelchEstimator::new(256).unwrap();
        let psd = est.estimate(&sine(10.0, 256.0, 2048), 256.0).unwrap();
        assert_eq!(psd.frequency.len(), 129);
        let (imax, _) = psd
            .density
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert_eq!(psd.frequency[imax], 10.0);
    }

    #[test]
    fn test_white_noise_power() {
        // unit variance white noise: one-sided density 2 / fs
        use rand::distributions::Distribution;
        use rand::rngs::StdRng;
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(11);
        let normal = statrs::distribution::Normal::new(0.0, 1.0).unwrap();
        let x: Vec<f64> = (0..256 * 200).map(|_| normal.sample(&mut rng)).collect();

        let psd = WelchEstimator::new(256).unwrap().estimate(&x, 256.0).unwrap();
        let mid: f64 = psd.density[10..100].iter().sum::<f64>() / 90.0;
        assert!((mid - 2.0 / 256.0).abs() < 0.1 * 2.0 / 256.0);
    }

    #[test]
    fn test_short_signal() {
        let est = WelchEstimator::new(256).unwrap();
        assert!(est.estimate(&[0.0; 100], 256.0).is_err());
    }
}

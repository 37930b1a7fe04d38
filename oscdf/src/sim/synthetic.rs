use std::f64::consts::PI;
use std::sync::Arc;

use osccore::data::trials::TrialMatrix;
use osccore::{PeakError, Result};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// A sinusoid present in every trial, with a random phase per trial.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Oscillation {
    pub frequency: f64,   // Hz
    pub amplitude: f64,
    pub jitter: f64,      // std of the per-trial frequency, Hz
}

/// Trials of narrowband oscillations on top of power-law noise whose
/// density falls off like 1/f^`aperiodic_exponent`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticTrials {
    pub sample_rate: f64,
    pub n_trials: usize,
    pub n_samples: usize,
    pub oscillations: Vec<Oscillation>,
    // Standard deviation of the background noise of each trial
    pub noise_std: f64,
    pub aperiodic_exponent: f64,
    pub seed: u64,
}

impl Default for SyntheticTrials {
    fn default() -> Self {
        SyntheticTrials {
            sample_rate: 500.0,
            n_trials: 60,
            n_samples: 2000,
            oscillations: vec![
                Oscillation { frequency: 10.0, amplitude: 2.0, jitter: 0.3 },
                Oscillation { frequency: 22.0, amplitude: 1.2, jitter: 0.5 },
            ],
            noise_std: 1.0,
            aperiodic_exponent: 1.0,
            seed: 0,
        }
    }
}

impl SyntheticTrials {
    fn check(&self) -> Result<()> {
        if !(self.sample_rate > 0.0) || self.n_trials == 0 || self.n_samples < 2 {
            return Err(PeakError::InvalidArgument(format!(
                "cannot simulate {} trials x {} samples at {} Hz",
                self.n_trials, self.n_samples, self.sample_rate
            )));
        }
        if !(self.aperiodic_exponent.is_finite() && self.aperiodic_exponent >= 0.0) {
            return Err(PeakError::InvalidArgument(format!(
                "aperiodic exponent must be finite and not negative, got {}",
                self.aperiodic_exponent
            )));
        }
        if !(self.noise_std >= 0.0) || self.oscillations.iter().any(|o| !(o.jitter >= 0.0)) {
            return Err(PeakError::InvalidArgument("noise and jitter must not be negative".to_string()));
        }
        Ok(())
    }

    /// White noise shaped in the frequency domain. Bins below one cycle per
    /// trial are clamped to the lowest resolved frequency and DC is zeroed.
    fn background<R: rand::Rng + ?Sized>(
        &self,
        unit: &Normal,
        forward: &Arc<dyn Fft<f64>>,
        inverse: &Arc<dyn Fft<f64>>,
        rng: &mut R,
    ) -> Vec<f64> {
        let n = self.n_samples;
        let resolution = self.sample_rate / n as f64;

        let mut buffer: Vec<Complex64> = (0..n).map(|_| Complex64::new(unit.sample(rng), 0.0)).collect();
        forward.process(&mut buffer);
        for (k, b) in buffer.iter_mut().enumerate() {
            let f = k.min(n - k) as f64 * resolution;
            *b = if k == 0 { Complex64::new(0.0, 0.0) } else { *b * f.max(resolution).powf(-0.5 * self.aperiodic_exponent) };
        }
        inverse.process(&mut buffer);

        let mut x: Vec<f64> = buffer.iter().map(|c| c.re).collect();
        let mean = x.iter().sum::<f64>() / n as f64;
        let std = (x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64).sqrt();
        let scale = if std > 0.0 { self.noise_std / std } else { 0.0 };
        x.iter_mut().for_each(|v| *v = (*v - mean) * scale);
        x
    }

    fn trial(&self, index: usize, forward: &Arc<dyn Fft<f64>>, inverse: &Arc<dyn Fft<f64>>) -> Result<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let phase = Uniform::new(0.0, 2.0 * PI);
        let unit = Normal::new(0.0, 1.0).map_err(|e| PeakError::InvalidArgument(e.to_string()))?;

        let mut x = self.background(&unit, forward, inverse, &mut rng);
        for osc in &self.oscillations {
            let f = osc.frequency + osc.jitter * unit.sample(&mut rng);
            let p = phase.sample(&mut rng);
            for (t, v) in x.iter_mut().enumerate() {
                *v += osc.amplitude * (2.0 * PI * f * t as f64 / self.sample_rate + p).sin();
            }
        }
        Ok(x)
    }

    pub fn generate(&self) -> Result<TrialMatrix> {
        self.check()?;
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(self.n_samples);
        let inverse = planner.plan_fft_inverse(self.n_samples);
        let rows = (0..self.n_trials)
            .into_par_iter()
            .map(|i| self.trial(i, &forward, &inverse))
            .collect::<Result<Vec<Vec<f64>>>>()?;
        TrialMatrix::from_rows(rows)
    }
}

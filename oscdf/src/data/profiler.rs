use osccore::data::profile::{SpectralProfile, SpectralProfiler};
use osccore::data::trials::TrialMatrix;
use osccore::pipeline::config::ProfilerConfig;
use osccore::{PeakError, Result};
use rayon::prelude::*;

use crate::data::background::flatten;
use crate::data::resample::resample_fft;
use crate::data::welch::WelchEstimator;

/// Resamples trials to the target rate, averages their Welch densities and
/// removes a log-log polynomial background inside the analysis band.
#[derive(Clone, Debug, Default)]
pub struct WelchProfiler {
    pub config: ProfilerConfig,
}

impl WelchProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        WelchProfiler { config }
    }

    fn resample_trials(&self, trials: &TrialMatrix, sample_rate: f64) -> Result<TrialMatrix> {
        let target = self.config.target_rate;
        if sample_rate == target {
            return Ok(trials.clone());
        }
        let rows = (0..trials.n_trials())
            .into_par_iter()
            .map(|r| resample_fft(trials.row(r), sample_rate, target))
            .collect::<Result<Vec<Vec<f64>>>>()?;
        TrialMatrix::from_rows(rows)
    }
}

impl SpectralProfiler for WelchProfiler {
    fn profile(&self, trials: &TrialMatrix, sample_rate: f64) -> Result<SpectralProfile> {
        let resampled = self.resample_trials(trials, sample_rate)?;
        let rate = self.config.target_rate;

        let n = resampled.n_samples();
        let segment = self.config.segment_length.min(n);
        if segment < self.config.segment_length {
            log::debug!("trials of {} samples shorten the welch segment to {}", n, segment);
        }
        let psd = WelchEstimator::new(segment)?.estimate_trials(&resampled, rate)?;

        let (lo, hi) = self.config.band;
        let (frequency, power): (Vec<f64>, Vec<f64>) = psd
            .frequency
            .iter()
            .zip(&psd.density)
            .filter(|(&f, &d)| f >= lo && f <= hi && f > 0.0 && d > 0.0)
            .map(|(&f, &d)| (f, d.log10()))
            .unzip();
        if frequency.is_empty() {
            return Err(PeakError::Profiler(format!(
                "no spectral bins between {} and {} Hz",
                lo, hi
            )));
        }

        let (_, flatspec) = flatten(&frequency, &power, self.config.background_order)?;
        SpectralProfile::new(frequency, power, flatspec)
    }
}

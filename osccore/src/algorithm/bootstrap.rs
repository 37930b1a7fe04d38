use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::error::{invalid, Result};

/// Median and percentile interval of a bootstrap distribution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSummary {
    pub median: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Medians of resamples drawn with replacement from one input set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapDistribution {
    pub medians: Vec<f64>,
    pub sample_size: usize,
}

impl BootstrapDistribution {
    /// Draws `iterations` resamples of `floor(sample_fraction * n)` values
    /// (at least one) and records the median of each.
    pub fn resample<R: Rng + ?Sized>(
        values: &[f64],
        iterations: usize,
        sample_fraction: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if values.is_empty() {
            return Err(invalid("cannot bootstrap an empty set"));
        }
        if iterations == 0 {
            return Err(invalid("bootstrap needs at least one iteration"));
        }
        if !(sample_fraction > 0.0 && sample_fraction <= 1.0) {
            return Err(invalid(format!("sample fraction {} outside (0, 1]", sample_fraction)));
        }

        let n = values.len();
        let sample_size = ((sample_fraction * n as f64).floor() as usize).max(1);
        let mut sample = vec![0.0f64; sample_size];

        let medians = (0..iterations)
            .map(|_| {
                for s in sample.iter_mut() {
                    *s = values[rng.gen_range(0..n)];
                }
                Data::new(sample.clone()).median()
            })
            .collect();

        Ok(BootstrapDistribution { medians, sample_size })
    }

    /// Median of the resampled medians with the `ci` percentiles (0-100) as bounds.
    pub fn summarize(&self, ci: (f64, f64)) -> BootstrapSummary {
        let mut data = Data::new(self.medians.clone());
        BootstrapSummary {
            median: data.median(),
            ci_low: data.quantile(ci.0 / 100.0),
            ci_high: data.quantile(ci.1 / 100.0),
        }
    }
}

/// Bootstrap estimate of the median of `values`.
pub fn bootstrap_median<R: Rng + ?Sized>(
    values: &[f64],
    iterations: usize,
    sample_fraction: f64,
    ci: (f64, f64),
    rng: &mut R,
) -> Result<BootstrapSummary> {
    Ok(BootstrapDistribution::resample(values, iterations, sample_fraction, rng)?.summarize(ci))
}

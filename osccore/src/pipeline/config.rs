//! Pipeline configuration.
//!
//! Every tunable of the extraction lives here as a named parameter. Defaults
//! reproduce the reference analysis; all groups deserialize with missing
//! fields filled from `Default`.

use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result};

/// Spectral profiling parameters, consumed by `SpectralProfiler` implementations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    // Resample rate applied before spectral estimation (Hz)
    pub target_rate: f64,
    // Retained spectral window (Hz, inclusive)
    pub band: (f64, f64),
    // Welch segment length in samples at `target_rate`
    pub segment_length: usize,
    // Polynomial order of the log-log background fit
    pub background_order: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            target_rate: 256.0,
            band: (1.0, 49.0),
            segment_length: 256,
            background_order: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    // Hysteresis margins, one extremum scan per entry
    pub thresholds: Vec<f64>,
    // Candidates above this frequency are discarded (Hz)
    pub search_band_max: f64,
    // Candidate slots per scan and polarity
    pub max_components: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![0.03, 0.05, 0.07],
            search_band_max: 30.0,
            max_components: 12,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    // Largest k evaluated for the dispersion curve
    pub max_clusters: usize,
    // Random k-means++ restarts per k
    pub restarts: usize,
    // Lloyd iteration cap per run
    pub max_iterations: usize,
    // Seeds of one polarity closer than this are merged (Hz); 0 disables
    pub min_seed_separation: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_clusters: 5,
            restarts: 10,
            max_iterations: 300,
            min_seed_separation: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub max_iterations: usize,
    // Relative cost reduction below which the fit has converged
    pub ftol: f64,
    // Relative step size below which the fit has converged
    pub xtol: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub outer_repetitions: usize,
    pub inner_splits: usize,
    // Share of all trials held out per outer repetition
    pub validation_fraction: f64,
    // Share of the training trials left out of each inner split
    pub inner_test_fraction: f64,
    // Master seed; every split, restart and resample derives from it
    pub seed: u64,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            outer_repetitions: 10,
            inner_splits: 100,
            validation_fraction: 0.2,
            inner_test_fraction: 0.2,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub histogram_bins: usize,
    // Minimum share of surviving centers a bin must hold
    pub support_fraction: f64,
    // Bins whose median fitted std exceeds this are dropped
    pub width_cutoff: f64,
    pub bootstrap_iterations: usize,
    pub bootstrap_sample_fraction: f64,
    // Percentiles of the bootstrap confidence interval
    pub ci: (f64, f64),
    // Gaussian std to full width at half maximum
    pub fwhm_factor: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            histogram_bins: 5,
            support_fraction: 0.05,
            width_cutoff: 10.0,
            bootstrap_iterations: 1000,
            bootstrap_sample_fraction: 0.8,
            ci: (2.5, 97.5),
            fwhm_factor: 2.355,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub profiler: ProfilerConfig,
    pub detection: DetectionConfig,
    pub clustering: ClusteringConfig,
    pub fit: FitConfig,
    pub cross_validation: CrossValidationConfig,
    pub consensus: ConsensusConfig,
}

fn fraction_open(name: &str, v: f64) -> Result<()> {
    if !(v > 0.0 && v < 1.0) {
        return Err(invalid(format!("{} must lie in (0, 1), got {}", name, v)));
    }
    Ok(())
}

fn positive(name: &str, v: f64) -> Result<()> {
    if !(v.is_finite() && v > 0.0) {
        return Err(invalid(format!("{} must be positive and finite, got {}", name, v)));
    }
    Ok(())
}

impl PipelineConfig {
    /// Peak search band: from the lower profiler edge up to the search cutoff.
    pub fn search_band(&self) -> (f64, f64) {
        (self.profiler.band.0, self.detection.search_band_max)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.cross_validation.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.profiler;
        if !(p.target_rate > 0.0) {
            return Err(invalid(format!("target_rate must be positive, got {}", p.target_rate)));
        }
        if !(p.band.0 >= 0.0 && p.band.1 > p.band.0) {
            return Err(invalid(format!("profiler band {:?} is empty", p.band)));
        }
        if p.segment_length < 2 {
            return Err(invalid("segment_length must be at least 2"));
        }

        let d = &self.detection;
        if d.thresholds.is_empty() {
            return Err(invalid("at least one detection threshold is required"));
        }
        if let Some(t) = d.thresholds.iter().find(|t| !(t.is_finite() && **t > 0.0)) {
            return Err(invalid(format!("detection thresholds must be positive, got {}", t)));
        }
        if d.max_components == 0 {
            return Err(invalid("max_components must be at least 1"));
        }
        if !(d.search_band_max > p.band.0) {
            return Err(invalid(format!(
                "search_band_max {} lies below the profiler band",
                d.search_band_max
            )));
        }

        let c = &self.clustering;
        if c.max_clusters == 0 {
            return Err(invalid("max_clusters must be at least 1"));
        }
        if !(c.min_seed_separation >= 0.0) {
            return Err(invalid("min_seed_separation must not be negative"));
        }

        let f = &self.fit;
        if f.max_iterations == 0 {
            return Err(invalid("fit max_iterations must be at least 1"));
        }
        positive("fit ftol", f.ftol)?;
        positive("fit xtol", f.xtol)?;

        let cv = &self.cross_validation;
        if cv.outer_repetitions == 0 || cv.inner_splits == 0 {
            return Err(invalid("outer_repetitions and inner_splits must be at least 1"));
        }
        fraction_open("validation_fraction", cv.validation_fraction)?;
        fraction_open("inner_test_fraction", cv.inner_test_fraction)?;

        let s = &self.consensus;
        if s.histogram_bins == 0 {
            return Err(invalid("histogram_bins must be at least 1"));
        }
        positive("width_cutoff", s.width_cutoff)?;
        positive("fwhm_factor", s.fwhm_factor)?;
        if !(0.0..=1.0).contains(&s.support_fraction) {
            return Err(invalid(format!("support_fraction must lie in [0, 1], got {}", s.support_fraction)));
        }
        if s.bootstrap_iterations == 0 {
            return Err(invalid("bootstrap_iterations must be at least 1"));
        }
        if !(s.bootstrap_sample_fraction > 0.0 && s.bootstrap_sample_fraction <= 1.0) {
            return Err(invalid("bootstrap_sample_fraction must lie in (0, 1]"));
        }
        if !(0.0 <= s.ci.0 && s.ci.0 < s.ci.1 && s.ci.1 <= 100.0) {
            return Err(invalid(format!("ci percentiles {:?} are not ordered within [0, 100]", s.ci)));
        }
        Ok(())
    }
}

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::cluster_count::{cluster_seeds, ClusterSeeds};
use crate::algorithm::extrema::detect_in_band;
use crate::algorithm::gauss_mixture::{seed_mixture, FitResult, MixtureFitter};
use crate::data::candidates::ObservationPool;
use crate::data::profile::{SpectralProfile, SpectralProfiler};
use crate::data::trials::TrialMatrix;
use crate::error::{invalid, PeakError, Result};
use crate::pipeline::config::{DetectionConfig, PipelineConfig};
use crate::pipeline::consensus::{aggregate, ConsensusPeak};
use crate::pipeline::rng::{shuffle_split, unit_rng, Stream};

/// Peak and valley coordinates pooled over thresholds (and splits).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePools {
    pub peaks: ObservationPool,
    pub valleys: ObservationPool,
}

impl CandidatePools {
    pub fn merge(mut self, other: CandidatePools) -> Self {
        self.peaks.merge(other.peaks);
        self.valleys.merge(other.valleys);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FoldStatus {
    Fitted(FitResult),
    Diverged { iterations: usize },
    NoCandidates,
}

/// Everything one outer repetition produced.
///
/// `validation` holds the trials reserved from this repetition. They are
/// recorded for inspection but never scored against the fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepetitionOutcome {
    pub repetition: usize,
    pub training: Vec<usize>,
    pub validation: Vec<usize>,
    pub peak_seeds: Option<ClusterSeeds>,
    pub valley_seeds: Option<ClusterSeeds>,
    pub status: FoldStatus,
}

impl RepetitionOutcome {
    pub fn fit(&self) -> Option<&FitResult> {
        match &self.status {
            FoldStatus::Fitted(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakExtraction {
    pub peaks: Vec<ConsensusPeak>,
    pub repetitions: Vec<RepetitionOutcome>,
    pub profile: SpectralProfile,
}

impl PeakExtraction {
    /// Bootstrap median center of every consensus peak (Hz).
    pub fn center_frequencies(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.center.median).collect()
    }

    /// Bootstrap median FWHM of every consensus peak (Hz).
    pub fn bandwidths(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.bandwidth.median).collect()
    }

    pub fn fits(&self) -> Vec<FitResult> {
        self.repetitions.iter().filter_map(|r| r.fit().cloned()).collect()
    }
}

/// Scans a profile at every threshold and pools the in-band candidates.
pub fn detect_candidates(profile: &SpectralProfile, detection: &DetectionConfig) -> Result<CandidatePools> {
    let mut pools = CandidatePools::default();
    for &delta in &detection.thresholds {
        let ext = detect_in_band(
            &profile.flatspec,
            &profile.frequency,
            delta,
            detection.search_band_max,
            detection.max_components,
        )?;
        pools.peaks.extend_from_candidates(&ext.maxima);
        pools.valleys.extend_from_candidates(&ext.minima);
    }
    Ok(pools)
}

fn seeds_or_none<R: rand::Rng + ?Sized>(
    pool: &ObservationPool,
    config: &PipelineConfig,
    rng: &mut R,
) -> Result<Option<ClusterSeeds>> {
    match cluster_seeds(pool, &config.clustering, rng) {
        Ok(s) => Ok(Some(s)),
        Err(PeakError::NoCandidateFound) => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct CrossValidator<'a, P: SpectralProfiler> {
    profiler: &'a P,
    config: &'a PipelineConfig,
}

impl<'a, P: SpectralProfiler> CrossValidator<'a, P> {
    pub fn new(profiler: &'a P, config: &'a PipelineConfig) -> Self {
        CrossValidator { profiler, config }
    }

    fn check_inputs(&self, trials: &TrialMatrix, sample_rate: f64) -> Result<()> {
        self.config.validate()?;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(invalid(format!("sample rate must be positive, got {}", sample_rate)));
        }
        if trials.n_samples() == 0 {
            return Err(invalid("trials hold no samples"));
        }

        let cv = &self.config.cross_validation;
        let n = trials.n_trials();
        let n_val = (cv.validation_fraction * n as f64).ceil() as usize;
        let n_train = n.saturating_sub(n_val);
        let n_inner_test = (cv.inner_test_fraction * n_train as f64).ceil() as usize;
        if n_train.saturating_sub(n_inner_test) == 0 {
            return Err(invalid(format!(
                "{} trials leave no training trials for the inner splits",
                n
            )));
        }
        Ok(())
    }

    /// Candidates of inner split `split` of repetition `rep`.
    pub fn inner_candidates(
        &self,
        trials: &TrialMatrix,
        sample_rate: f64,
        training: &[usize],
        rep: usize,
        split: usize,
    ) -> Result<CandidatePools> {
        let cv = &self.config.cross_validation;
        let mut rng = unit_rng(cv.seed, Stream::InnerSplit, rep as u64, split as u64);
        let (fit_part, _held_out) = shuffle_split(training, cv.inner_test_fraction, &mut rng);

        let subset = trials.select_rows(&fit_part)?;
        let profile = self.profiler.profile(&subset, sample_rate)?;
        detect_candidates(&profile, &self.config.detection)
    }

    pub fn run_repetition(&self, trials: &TrialMatrix, sample_rate: f64, rep: usize) -> Result<RepetitionOutcome> {
        let cv = &self.config.cross_validation;
        let all: Vec<usize> = (0..trials.n_trials()).collect();
        let mut holdout_rng = unit_rng(cv.seed, Stream::Holdout, rep as u64, 0);
        let (training, validation) = shuffle_split(&all, cv.validation_fraction, &mut holdout_rng);

        // barrier: every split's candidates are pooled before clustering
        let pools = (0..cv.inner_splits)
            .into_par_iter()
            .map(|split| self.inner_candidates(trials, sample_rate, &training, rep, split))
            .collect::<Result<Vec<CandidatePools>>>()?
            .into_iter()
            .fold(CandidatePools::default(), CandidatePools::merge);

        let mut cluster_rng = unit_rng(cv.seed, Stream::Clustering, rep as u64, 0);
        let peak_seeds = seeds_or_none(&pools.peaks, self.config, &mut cluster_rng)?;
        let valley_seeds = seeds_or_none(&pools.valleys, self.config, &mut cluster_rng)?;

        let (lo, hi) = self.config.search_band();
        let centers: Vec<f64> = peak_seeds
            .iter()
            .chain(valley_seeds.iter())
            .flat_map(|s| s.seeds.iter().copied())
            .filter(|&c| c >= lo && c <= hi)
            .collect();

        log::debug!(
            "repetition {}: {} peak and {} valley observations, seeds {:?}",
            rep,
            pools.peaks.len(),
            pools.valleys.len(),
            centers
        );

        let status = if centers.is_empty() {
            FoldStatus::NoCandidates
        } else {
            let subset = trials.select_rows(&training)?;
            let profile = self.profiler.profile(&subset, sample_rate)?;
            let fitter = MixtureFitter::new(self.config.fit.clone());

            match seed_mixture(&centers, &profile).and_then(|seed| fitter.fit(&seed, &profile, (lo, hi))) {
                Ok(fit) => FoldStatus::Fitted(fit),
                Err(PeakError::FitDivergence { iterations }) => {
                    log::warn!("repetition {}: fit diverged after {} iterations, skipping", rep, iterations);
                    FoldStatus::Diverged { iterations }
                }
                Err(PeakError::NoCandidateFound) => FoldStatus::NoCandidates,
                Err(e) => return Err(e),
            }
        };

        if let FoldStatus::Fitted(f) = &status {
            log::info!(
                "repetition {}: fitted {} components in {} iterations",
                rep,
                f.len(),
                f.iterations
            );
        }

        Ok(RepetitionOutcome { repetition: rep, training, validation, peak_seeds, valley_seeds, status })
    }

    pub fn run(&self, trials: &TrialMatrix, sample_rate: f64) -> Result<PeakExtraction> {
        self.check_inputs(trials, sample_rate)?;
        let cv = &self.config.cross_validation;

        log::info!(
            "extracting peaks from {} trials x {} samples at {} Hz: {} repetitions x {} splits, seed {}",
            trials.n_trials(),
            trials.n_samples(),
            sample_rate,
            cv.outer_repetitions,
            cv.inner_splits,
            cv.seed
        );

        let profile = self.profiler.profile(trials, sample_rate)?;

        let repetitions = (0..cv.outer_repetitions)
            .into_par_iter()
            .map(|rep| self.run_repetition(trials, sample_rate, rep))
            .collect::<Result<Vec<RepetitionOutcome>>>()?;

        let fits: Vec<FitResult> = repetitions.iter().filter_map(|r| r.fit().cloned()).collect();
        log::info!("{} of {} repetitions produced a fit", fits.len(), repetitions.len());

        let mut rng = unit_rng(cv.seed, Stream::Bootstrap, 0, 0);
        let peaks = aggregate(&fits, &profile, self.config.search_band(), &self.config.consensus, &mut rng)?;

        Ok(PeakExtraction { peaks, repetitions, profile })
    }
}

/// Runs the full cross-validated extraction on one electrode's trials.
pub fn extract_peaks<P: SpectralProfiler>(
    trials: &TrialMatrix,
    sample_rate: f64,
    profiler: &P,
    config: &PipelineConfig,
) -> Result<PeakExtraction> {
    CrossValidator::new(profiler, config).run(trials, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::gauss_mixture::MixtureParams;
    use rand::distributions::Distribution;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use statrs::distribution::Normal;
    use std::f64::consts::PI;

    /// Residual = fixed mixture + mean of the selected trials, one trial
    /// value per frequency bin.
    struct SyntheticProfiler {
        frequency: Vec<f64>,
        base: Vec<f64>,
    }

    impl SyntheticProfiler {
        fn new(base: &MixtureParams) -> Self {
            let frequency: Vec<f64> = (0..97).map(|i| 1.0 + i as f64 * 0.5).collect();
            let base = base.evaluate(&frequency).unwrap();
            SyntheticProfiler { frequency, base }
        }

        fn flat() -> Self {
            let frequency: Vec<f64> = (0..97).map(|i| 1.0 + i as f64 * 0.5).collect();
            let base = vec![0.0; frequency.len()];
            SyntheticProfiler { frequency, base }
        }
    }

    impl SpectralProfiler for SyntheticProfiler {
        fn profile(&self, trials: &TrialMatrix, _sample_rate: f64) -> Result<SpectralProfile> {
            let noise = trials.mean_row();
            let flat: Vec<f64> = self.base.iter().zip(&noise).map(|(b, n)| b + n).collect();
            SpectralProfile::new(self.frequency.clone(), flat.clone(), flat)
        }
    }

    fn noise_trials(n_trials: usize, sigma: f64, seed: u64) -> TrialMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, sigma).unwrap();
        let data: Vec<f64> = (0..n_trials * 97).map(|_| normal.sample(&mut rng)).collect();
        TrialMatrix::new(data, n_trials, 97).unwrap()
    }

    fn area(height: f64, std: f64) -> f64 {
        height * std * (2.0 * PI).sqrt()
    }

    fn two_peak_mixture() -> MixtureParams {
        // 8 Hz and 20 Hz peaks with a residual dip between them
        MixtureParams::new(
            vec![8.0, 20.0, 14.0],
            vec![0.8, 1.2, 1.5],
            vec![area(0.4, 0.8), area(0.4, 1.2), area(-0.15, 1.5)],
        ).unwrap()
    }

    #[test]
    fn test_two_peaks_end_to_end() {
        let profiler = SyntheticProfiler::new(&two_peak_mixture());
        // inner splits average 32 trials: about 0.005 noise on the residual
        let trials = noise_trials(50, 0.03, 17);
        let config = PipelineConfig::default().with_seed(1234);

        let out = extract_peaks(&trials, 256.0, &profiler, &config).unwrap();
        assert_eq!(out.repetitions.len(), 10);

        let centers = out.center_frequencies();
        let widths = out.bandwidths();
        assert_eq!(centers.len(), 2);
        assert_eq!(widths.len(), 2);

        assert!((centers[0] - 8.0).abs() <= 1.0);
        assert!((centers[1] - 20.0).abs() <= 1.0);
        assert!((widths[0] - 2.355 * 0.8).abs() <= 0.2 * 2.355 * 0.8);
        assert!((widths[1] - 2.355 * 1.2).abs() <= 0.2 * 2.355 * 1.2);

        for p in &out.peaks {
            assert!(p.center.ci_low <= p.center.median && p.center.median <= p.center.ci_high);
        }
        let fitted = out.repetitions.iter().filter(|r| r.fit().is_some()).count();
        assert!(fitted >= 8);
    }

    #[test]
    fn test_repetitions_hold_out_validation_trials() {
        let profiler = SyntheticProfiler::new(&two_peak_mixture());
        let trials = noise_trials(20, 0.01, 3);
        let mut config = PipelineConfig::default().with_seed(5);
        config.cross_validation.outer_repetitions = 2;
        config.cross_validation.inner_splits = 5;

        let out = extract_peaks(&trials, 256.0, &profiler, &config).unwrap();
        for r in &out.repetitions {
            assert_eq!(r.validation.len(), 4);
            assert_eq!(r.training.len(), 16);
            assert!(r.training.iter().all(|t| !r.validation.contains(t)));
            assert!(r.peak_seeds.is_some());
        }
    }

    #[test]
    fn test_seed_makes_runs_repeat() {
        let profiler = SyntheticProfiler::new(&two_peak_mixture());
        let trials = noise_trials(20, 0.01, 8);
        let mut config = PipelineConfig::default().with_seed(77);
        config.cross_validation.outer_repetitions = 3;
        config.cross_validation.inner_splits = 10;
        config.consensus.bootstrap_iterations = 200;

        let a = extract_peaks(&trials, 256.0, &profiler, &config).unwrap();
        let b = extract_peaks(&trials, 256.0, &profiler, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flat_residual_has_no_candidates() {
        let profiler = SyntheticProfiler::flat();
        let trials = noise_trials(20, 0.001, 4);
        let mut config = PipelineConfig::default();
        config.cross_validation.outer_repetitions = 2;
        config.cross_validation.inner_splits = 5;

        let out = extract_peaks(&trials, 256.0, &profiler, &config).unwrap();
        assert!(out.peaks.is_empty());
        assert!(out.center_frequencies().is_empty());
        assert!(out.repetitions.iter().all(|r| r.status == FoldStatus::NoCandidates));
    }

    #[test]
    fn test_rejects_malformed_input() {
        let profiler = SyntheticProfiler::flat();
        let config = PipelineConfig::default();

        let trials = noise_trials(2, 0.01, 1);
        let err = extract_peaks(&trials, 256.0, &profiler, &config).unwrap_err();
        assert!(matches!(err, PeakError::InvalidArgument(_)));

        let trials = noise_trials(20, 0.01, 1);
        let err = extract_peaks(&trials, 0.0, &profiler, &config).unwrap_err();
        assert!(matches!(err, PeakError::InvalidArgument(_)));
    }

    #[test]
    fn test_detect_candidates_pools_thresholds() {
        let profiler = SyntheticProfiler::new(&two_peak_mixture());
        let trials = TrialMatrix::new(vec![0.0; 97], 1, 97).unwrap();
        let profile = profiler.profile(&trials, 256.0).unwrap();

        let pools = detect_candidates(&profile, &DetectionConfig::default()).unwrap();
        assert_eq!(pools.peaks.as_slice(), &[8.0, 20.0, 8.0, 20.0, 8.0, 20.0]);
        assert_eq!(pools.valleys.as_slice(), &[14.0, 14.0, 14.0]);
    }
}

use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::algorithm::kmeans::{farthest_point, KMeans, KMeansFit};
use crate::data::candidates::ObservationPool;
use crate::error::{PeakError, Result};
use crate::pipeline::config::ClusteringConfig;

/// Selected component count and the dispersion curve it was read from.
///
/// `dispersion[0]` is the zero-cluster baseline, `dispersion[k]` the k-means
/// inertia for `k` clusters. A count of 0 means the pool has no spread at all
/// and collapses onto a single location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterCountEstimate {
    pub count: usize,
    pub dispersion: Vec<f64>,
}

/// Selected count plus the locations that seed the mixture fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterSeeds {
    pub estimate: ClusterCountEstimate,
    pub seeds: Vec<f64>,
}

fn median(values: &[f64]) -> f64 {
    Data::new(values.to_vec()).median()
}

/// Sum of squared deviations from the median: the spread left when every
/// observation is explained by one shared location.
pub fn baseline_dispersion(observations: &[f64]) -> f64 {
    if observations.is_empty() { return 0.0; }
    let m = median(observations);
    observations.iter().map(|&v| (v - m) * (v - m)).sum()
}

/// Best k-means partition for each k in `1..=max_clusters`.
///
/// Each k keeps the better of its random restarts and a warm start from the
/// (k-1)-solution plus the farthest observation, so inertia never increases
/// with k beyond floating point rounding.
pub fn partition_history<R: Rng + ?Sized>(
    observations: &[f64],
    config: &ClusteringConfig,
    rng: &mut R,
) -> Result<Vec<KMeansFit>> {
    let mut fits: Vec<KMeansFit> = Vec::with_capacity(config.max_clusters);

    for k in 1..=config.max_clusters {
        let km = KMeans::new(k)
            .with_restarts(config.restarts)
            .with_max_iterations(config.max_iterations);
        let mut best = km.fit(observations, rng)?;

        if let Some(prev) = fits.last() {
            let mut init = prev.centroids.clone();
            if let Some(p) = farthest_point(observations, &init) {
                init.push(p);
                let warm = km.fit_from(observations, init)?;
                if warm.inertia < best.inertia {
                    best = warm;
                }
            }
        }
        fits.push(best);
    }
    Ok(fits)
}

/// Elbow selection over `[baseline, inertia(1), .., inertia(max)]`.
///
/// The successive reductions `d[i] = seq[i] - seq[i + 1]` are scanned for
/// their largest entry (first on ties) and the count is that index plus two.
fn elbow(dispersion: &[f64]) -> usize {
    let mut best_i = 0usize;
    let mut best_d = f64::NEG_INFINITY;
    for (i, w) in dispersion.windows(2).enumerate() {
        let d = w[0] - w[1];
        if d > best_d {
            best_d = d;
            best_i = i;
        }
    }
    best_i + 2
}

pub fn select_cluster_count<R: Rng + ?Sized>(
    pool: &ObservationPool,
    config: &ClusteringConfig,
    rng: &mut R,
) -> Result<(ClusterCountEstimate, Vec<KMeansFit>)> {
    if pool.is_empty() {
        return Err(PeakError::NoCandidateFound);
    }
    let obs = pool.as_slice();

    let baseline = baseline_dispersion(obs);
    let fits = partition_history(obs, config, rng)?;

    let mut dispersion = Vec::with_capacity(fits.len() + 1);
    dispersion.push(baseline);
    dispersion.extend(fits.iter().map(|f| f.inertia));

    let count = if baseline <= 0.0 { 0 } else { elbow(&dispersion) };
    Ok((ClusterCountEstimate { count, dispersion }, fits))
}

/// Merges runs of sorted seeds whose neighbours lie closer than `min_separation`
/// into their mean.
pub fn merge_close_seeds(seeds: &[f64], min_separation: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = seeds.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    if min_separation <= 0.0 || sorted.len() < 2 { return sorted; }

    let mut out = Vec::with_capacity(sorted.len());
    let mut group: Vec<f64> = vec![sorted[0]];
    for &v in &sorted[1..] {
        let last = group[group.len() - 1];
        if v - last < min_separation {
            group.push(v);
        } else {
            out.push(group.iter().sum::<f64>() / group.len() as f64);
            group.clear();
            group.push(v);
        }
    }
    out.push(group.iter().sum::<f64>() / group.len() as f64);
    out
}

/// Selects the count for `pool` and returns the matching centroids as seeds.
pub fn cluster_seeds<R: Rng + ?Sized>(
    pool: &ObservationPool,
    config: &ClusteringConfig,
    rng: &mut R,
) -> Result<ClusterSeeds> {
    let (estimate, fits) = select_cluster_count(pool, config, rng)?;

    let centroids = match estimate.count {
        0 => vec![median(pool.as_slice())],
        k if k <= fits.len() => fits[k - 1].centroids.clone(),
        k => {
            KMeans::new(k)
                .with_restarts(config.restarts)
                .with_max_iterations(config.max_iterations)
                .fit(pool.as_slice(), rng)?
                .centroids
        }
    };

    let seeds = merge_close_seeds(&centroids, config.min_seed_separation);
    log::debug!(
        "pool of {} observations: count {} -> {} seeds {:?}",
        pool.len(),
        estimate.count,
        seeds.len(),
        seeds
    );
    Ok(ClusterSeeds { estimate, seeds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use statrs::distribution::Normal;
    use rand::distributions::Distribution;

    fn config() -> ClusteringConfig {
        ClusteringConfig::default()
    }

    #[test]
    fn test_baseline_about_median() {
        // median 2, deviations -1, 0, 7
        assert!((baseline_dispersion(&[1.0, 2.0, 9.0]) - 50.0).abs() < 1e-12);
        assert_eq!(baseline_dispersion(&[]), 0.0);
    }

    #[test]
    fn test_elbow_offset() {
        // largest reduction between inertia(1) and inertia(2)
        assert_eq!(elbow(&[100.0, 100.0, 10.0, 8.0, 7.0, 6.0]), 3);
        // largest reduction from the baseline
        assert_eq!(elbow(&[100.0, 10.0, 9.0, 8.0, 7.0, 6.0]), 2);
        // flat curve picks the first entry
        assert_eq!(elbow(&[0.0; 6]), 2);
    }

    #[test]
    fn test_inertia_non_increasing() {
        let mut rng = StdRng::seed_from_u64(42);
        for trial in 0..20 {
            let n = 30 + trial * 5;
            let a = Normal::new(6.0, 1.5).unwrap();
            let b = Normal::new(18.0, 2.5).unwrap();
            let obs: Vec<f64> = (0..n)
                .map(|i| if i % 3 == 0 { b.sample(&mut rng) } else { a.sample(&mut rng) })
                .collect();
            let pool = ObservationPool::from_coordinates(obs);
            let (est, _) = select_cluster_count(&pool, &config(), &mut rng).unwrap();
            let tol = 1e-9 * est.dispersion[1].max(1.0);
            for k in 1..est.dispersion.len() - 1 {
                assert!(est.dispersion[k + 1] <= est.dispersion[k] + tol);
            }
        }
    }

    #[test]
    fn test_degenerate_pool() {
        let mut rng = StdRng::seed_from_u64(5);
        let pool = ObservationPool::from_coordinates(vec![12.5; 40]);
        let seeds = cluster_seeds(&pool, &config(), &mut rng).unwrap();
        assert_eq!(seeds.estimate.count, 0);
        assert!(seeds.estimate.dispersion.iter().all(|&d| d == 0.0));
        assert_eq!(seeds.seeds, vec![12.5]);
    }

    #[test]
    fn test_two_locations_give_two_seeds() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut obs = vec![8.0; 300];
        obs.extend(vec![20.0; 300]);
        let pool = ObservationPool::from_coordinates(obs);
        let seeds = cluster_seeds(&pool, &config(), &mut rng).unwrap();
        assert_eq!(seeds.seeds.len(), 2);
        assert!((seeds.seeds[0] - 8.0).abs() < 1e-9);
        assert!((seeds.seeds[1] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_pool() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = cluster_seeds(&ObservationPool::new(), &config(), &mut rng).unwrap_err();
        assert_eq!(err, PeakError::NoCandidateFound);
    }

    #[test]
    fn test_merge_close_seeds() {
        assert_eq!(merge_close_seeds(&[20.0, 8.0, 20.0], 1.0), vec![8.0, 20.0]);
        assert_eq!(merge_close_seeds(&[13.5, 14.0, 14.5], 1.0), vec![14.0]);
        assert_eq!(merge_close_seeds(&[1.0, 1.2], 0.0), vec![1.0, 1.2]);
    }
}

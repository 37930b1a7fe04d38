use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::algorithm::bootstrap::{bootstrap_median, BootstrapSummary};
use crate::algorithm::gauss_mixture::{FitResult, GaussianComponent};
use crate::data::profile::SpectralProfile;
use crate::error::Result;
use crate::pipeline::config::ConsensusConfig;

/// A peak confirmed across repetitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPeak {
    pub bin: (f64, f64),                 // histogram bin edges of the members
    pub members: Vec<GaussianComponent>,
    pub center: BootstrapSummary,        // Hz
    pub bandwidth: BootstrapSummary,     // FWHM, Hz
}

/// Equal-width bin edges over the range of `values`. A zero-width range is
/// widened to `[v - 0.5, v + 0.5]`.
pub fn histogram_edges(values: &[f64], bins: usize) -> Vec<f64> {
    let (mut lo, mut hi) = values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() || bins == 0 { return Vec::new(); }
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;
    (0..=bins)
        .map(|i| if i == bins { hi } else { lo + i as f64 * width })
        .collect()
}

/// Bin of `v` for `edges`; every bin is half-open except the last, which
/// includes its upper edge.
pub fn bin_index(v: f64, edges: &[f64]) -> Option<usize> {
    let bins = edges.len().checked_sub(1)?;
    if bins == 0 { return None; }
    let (lo, hi) = (edges[0], edges[bins]);
    if !(v >= lo && v <= hi) { return None; }
    if v == hi { return Some(bins - 1); }
    let i = edges.partition_point(|&e| e <= v);
    Some((i - 1).min(bins - 1))
}

fn median(values: &[f64]) -> f64 {
    Data::new(values.to_vec()).median()
}

/// Fitted components that lie inside `band` and sit on a strictly positive
/// residual of the full-data profile.
pub fn surviving_components(fits: &[FitResult], full: &SpectralProfile, band: (f64, f64)) -> Vec<GaussianComponent> {
    fits.iter()
        .flat_map(|f| f.components())
        .filter(|c| c.center.is_finite() && c.center >= band.0 && c.center <= band.1)
        .filter(|c| full.flatspec_at(c.center).map_or(false, |v| v > 0.0))
        .collect()
}

/// Bins the surviving fitted centers, keeps well supported narrow bins and
/// bootstraps a center and bandwidth for each. No surviving bin yields an
/// empty list.
pub fn aggregate<R: Rng + ?Sized>(
    fits: &[FitResult],
    full: &SpectralProfile,
    band: (f64, f64),
    config: &ConsensusConfig,
    rng: &mut R,
) -> Result<Vec<ConsensusPeak>> {
    let survivors = surviving_components(fits, full, band);
    if survivors.is_empty() {
        log::info!("no fitted component survived band and residual filters");
        return Ok(Vec::new());
    }

    let centers: Vec<f64> = survivors.iter().map(|c| c.center).collect();
    let edges = histogram_edges(&centers, config.histogram_bins);
    let bins = edges.len().saturating_sub(1);

    let mut groups: Vec<Vec<GaussianComponent>> = vec![Vec::new(); bins];
    for c in &survivors {
        if let Some(b) = bin_index(c.center, &edges) {
            groups[b].push(*c);
        }
    }

    let total = survivors.len() as f64;
    let min_support = config.support_fraction * total;
    let mut peaks = Vec::new();

    for (b, members) in groups.into_iter().enumerate() {
        let range = (edges[b], edges[b + 1]);
        if members.is_empty() || (members.len() as f64) < min_support {
            if !members.is_empty() {
                log::debug!("bin {:?}: {} members below support {:.2}", range, members.len(), min_support);
            }
            continue;
        }

        let stds: Vec<f64> = members.iter().map(|c| c.std).collect();
        let median_std = median(&stds);
        if median_std > config.width_cutoff {
            log::debug!("bin {:?}: median width {:.3} above cutoff {}", range, median_std, config.width_cutoff);
            continue;
        }

        let member_centers: Vec<f64> = members.iter().map(|c| c.center).collect();
        let fwhm: Vec<f64> = stds.iter().map(|s| config.fwhm_factor * s).collect();

        let center = bootstrap_median(
            &member_centers,
            config.bootstrap_iterations,
            config.bootstrap_sample_fraction,
            config.ci,
            rng,
        )?;
        let bandwidth = bootstrap_median(
            &fwhm,
            config.bootstrap_iterations,
            config.bootstrap_sample_fraction,
            config.ci,
            rng,
        )?;

        log::info!(
            "consensus peak at {:.2} Hz [{:.2}, {:.2}], FWHM {:.2} Hz, {} members",
            center.median,
            center.ci_low,
            center.ci_high,
            bandwidth.median,
            members.len()
        );
        peaks.push(ConsensusPeak { bin: range, members, center, bandwidth });
    }

    Ok(peaks)
}

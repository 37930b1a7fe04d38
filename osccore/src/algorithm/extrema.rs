use crate::data::candidates::{Extrema, PeakCandidate, Polarity};
use crate::error::{invalid, Result};

/// Hysteresis extremum scan over `v` sampled at coordinates `x`.
///
/// The scanner alternates between seeking a maximum and seeking a minimum. A
/// running extremum is confirmed only once the signal has retraced from it by
/// more than `delta`, so sample-level wiggles smaller than `delta` never
/// produce a detection.
pub fn detect_extrema(v: &[f64], x: &[f64], delta: f64) -> Result<Extrema> {
    if v.len() != x.len() {
        return Err(invalid(format!(
            "values and coordinates differ in length: {} vs {}",
            v.len(),
            x.len()
        )));
    }
    if !delta.is_finite() || delta <= 0.0 {
        return Err(invalid(format!("delta must be a positive finite scalar, got {}", delta)));
    }

    let mut out = Extrema::default();

    let mut mx = f64::NEG_INFINITY;
    let mut mn = f64::INFINITY;
    let mut mx_pos = f64::NAN;
    let mut mn_pos = f64::NAN;
    let mut seek_max = true;

    for (&val, &pos) in v.iter().zip(x) {
        if val > mx { mx = val; mx_pos = pos; }
        if val < mn { mn = val; mn_pos = pos; }

        if seek_max {
            if val < mx - delta {
                out.maxima.push(PeakCandidate::new(mx_pos, mx, Polarity::Max));
                mn = val;
                mn_pos = pos;
                seek_max = false;
            }
        } else if val > mn + delta {
            out.minima.push(PeakCandidate::new(mn_pos, mn, Polarity::Min));
            mx = val;
            mx_pos = pos;
            seek_max = true;
        }
    }

    Ok(out)
}

/// Drops candidates above `cutoff` and keeps at most `capacity` of the rest,
/// lowest coordinates first. An empty result means no candidate survived.
pub fn restrict_to_band(candidates: &[PeakCandidate], cutoff: f64, capacity: usize) -> Vec<PeakCandidate> {
    let kept: Vec<PeakCandidate> = candidates
        .iter()
        .copied()
        .filter(|c| c.coordinate.is_finite() && c.coordinate <= cutoff)
        .collect();

    if kept.len() > capacity {
        log::debug!(
            "{} candidates below {} Hz exceed capacity {}, truncating",
            kept.len(),
            cutoff,
            capacity
        );
        return kept.into_iter().take(capacity).collect();
    }
    kept
}

/// Runs the scan and restricts both polarities to the search band.
pub fn detect_in_band(
    flatspec: &[f64],
    frequency: &[f64],
    delta: f64,
    cutoff: f64,
    capacity: usize,
) -> Result<Extrema> {
    let raw = detect_extrema(flatspec, frequency, delta)?;
    Ok(Extrema {
        maxima: restrict_to_band(&raw.maxima, cutoff, capacity),
        minima: restrict_to_band(&raw.minima, cutoff, capacity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeakError;

    fn axis(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| 1.0 + i as f64 * step).collect()
    }

    #[test]
    fn test_unimodal_single_maximum() {
        let x = axis(41, 0.5);
        let v: Vec<f64> = x.iter().map(|&f| (-(f - 8.0).powi(2) / 2.0).exp()).collect();

        let ext = detect_extrema(&v, &x, 0.1).unwrap();
        assert_eq!(ext.maxima.len(), 1);
        assert!((ext.maxima[0].coordinate - 8.0).abs() < 1e-12);
        assert!((ext.maxima[0].value - 1.0).abs() < 1e-12);
        assert!(ext.minima.is_empty());
    }

    #[test]
    fn test_small_wiggles_suppressed() {
        let x = axis(8, 1.0);
        let v = vec![0.0, 0.02, 0.0, 0.02, 0.0, 0.02, 0.0, 0.02];
        let ext = detect_extrema(&v, &x, 0.05).unwrap();
        assert!(ext.is_empty());

        let ext = detect_extrema(&v, &x, 0.01).unwrap();
        assert_eq!(ext.maxima.len(), 3);
        assert_eq!(ext.minima.len(), 3);
    }

    #[test]
    fn test_peak_valley_peak() {
        let x = axis(7, 1.0);
        let v = vec![0.0, 1.0, 0.0, -1.0, 0.0, 2.0, 0.0];
        let ext = detect_extrema(&v, &x, 0.5).unwrap();
        let maxima: Vec<f64> = ext.maxima.iter().map(|c| c.coordinate).collect();
        let minima: Vec<f64> = ext.minima.iter().map(|c| c.coordinate).collect();
        assert_eq!(maxima, vec![2.0, 6.0]);
        assert_eq!(minima, vec![4.0]);
        assert!(ext.minima.iter().all(|c| c.polarity == Polarity::Min));
    }

    #[test]
    fn test_non_positive_delta_rejected() {
        let x = axis(3, 1.0);
        let v = vec![0.0, 1.0, 0.0];
        for d in [0.0, -0.5, f64::NAN] {
            let err = detect_extrema(&v, &x, d).unwrap_err();
            assert!(matches!(err, PeakError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = detect_extrema(&[0.0, 1.0], &[1.0], 0.1).unwrap_err();
        assert!(matches!(err, PeakError::InvalidArgument(_)));
    }

    #[test]
    fn test_restrict_to_band() {
        let c = vec![
            PeakCandidate::new(10.0, 1.0, Polarity::Max),
            PeakCandidate::new(31.0, 1.0, Polarity::Max),
            PeakCandidate::new(12.0, 1.0, Polarity::Max),
        ];
        let kept = restrict_to_band(&c, 30.0, 12);
        assert_eq!(kept.len(), 2);
        assert!(restrict_to_band(&c[1..2], 30.0, 12).is_empty());
        assert_eq!(restrict_to_band(&c, 30.0, 1).len(), 1);
    }
}

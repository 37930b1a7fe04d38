use serde::{Deserialize, Serialize};

use crate::data::trials::TrialMatrix;
use crate::error::{invalid, Result};

/// Frequency axis, mean log-power and background-subtracted residual of one
/// set of trials.
///
/// All three vectors share one length and `frequency` is strictly increasing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectralProfile {
    pub frequency: Vec<f64>,
    pub power: Vec<f64>,
    pub flatspec: Vec<f64>,
}

impl SpectralProfile {
    pub fn new(frequency: Vec<f64>, power: Vec<f64>, flatspec: Vec<f64>) -> Result<Self> {
        if frequency.len() != power.len() || frequency.len() != flatspec.len() {
            return Err(invalid(format!(
                "profile vectors differ in length: frequency {}, power {}, flatspec {}",
                frequency.len(),
                power.len(),
                flatspec.len()
            )));
        }
        if frequency.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(invalid("profile frequency axis must be strictly increasing"));
        }
        Ok(SpectralProfile { frequency, power, flatspec })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    /// Index of the frequency bin closest to `f`, or `None` for an empty profile.
    pub fn nearest_index(&self, f: f64) -> Option<usize> {
        let n = self.frequency.len();
        if n == 0 || !f.is_finite() { return None; }

        let i = self.frequency.partition_point(|&x| x < f);
        if i == 0 { return Some(0); }
        if i >= n { return Some(n - 1); }

        let lo = self.frequency[i - 1];
        let hi = self.frequency[i];
        if (f - lo) <= (hi - f) { Some(i - 1) } else { Some(i) }
    }

    /// Residual value at the bin nearest to `f`.
    pub fn flatspec_at(&self, f: f64) -> Option<f64> {
        self.nearest_index(f).map(|i| self.flatspec[i])
    }

    /// First and last frequency of the profile.
    pub fn frequency_range(&self) -> Option<(f64, f64)> {
        match (self.frequency.first(), self.frequency.last()) {
            (Some(&lo), Some(&hi)) => Some((lo, hi)),
            _ => None,
        }
    }
}

/// Turns a set of trials into a spectral profile.
///
/// Raw spectral estimation and background removal live behind this seam; the
/// pipeline only consumes the resulting triple.
pub trait SpectralProfiler: Sync {
    fn profile(&self, trials: &TrialMatrix, sample_rate: f64) -> Result<SpectralProfile>;
}

impl<P: SpectralProfiler + ?Sized> SpectralProfiler for &P {
    fn profile(&self, trials: &TrialMatrix, sample_rate: f64) -> Result<SpectralProfile> {
        (**self).profile(trials, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeakError;

    fn profile() -> SpectralProfile {
        let f = vec![1.0, 1.5, 2.0, 2.5, 3.0];
        let p = vec![0.0; 5];
        let r = vec![-0.1, 0.2, 0.4, 0.1, -0.3];
        SpectralProfile::new(f, p, r).unwrap()
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let err = SpectralProfile::new(vec![1.0, 2.0], vec![0.0], vec![0.0, 0.0]).unwrap_err();
        assert!(matches!(err, PeakError::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_non_increasing_frequency() {
        let err = SpectralProfile::new(vec![1.0, 1.0], vec![0.0; 2], vec![0.0; 2]).unwrap_err();
        assert!(matches!(err, PeakError::InvalidArgument(_)));
    }

    #[test]
    fn test_nearest_index() {
        let p = profile();
        assert_eq!(p.nearest_index(0.2), Some(0));
        assert_eq!(p.nearest_index(1.6), Some(1));
        assert_eq!(p.nearest_index(1.8), Some(2));
        assert_eq!(p.nearest_index(9.0), Some(4));
        assert_eq!(p.nearest_index(f64::NAN), None);
    }

    #[test]
    fn test_flatspec_at() {
        let p = profile();
        assert_eq!(p.flatspec_at(2.1), Some(0.4));
        assert_eq!(p.frequency_range(), Some((1.0, 3.0)));
    }
}

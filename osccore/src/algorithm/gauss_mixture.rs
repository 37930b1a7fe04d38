use itertools::izip;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

use crate::algorithm::levenberg::{LeastSquaresProblem, LevenbergMarquardt};
use crate::data::profile::SpectralProfile;
use crate::error::{invalid, PeakError, Result};
use crate::pipeline::config::FitConfig;

/// Gaussian standard deviation to full width at half maximum.
pub const FWHM_FACTOR: f64 = 2.355;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub center: f64,
    pub std: f64,
    pub amplitude: f64,
}

impl GaussianComponent {
    /// `amplitude` times the normal density at `x`.
    pub fn evaluate(&self, x: f64) -> Result<f64> {
        let n = Normal::new(self.center, self.std)
            .map_err(|e| invalid(format!("component std {}: {}", self.std, e)))?;
        Ok(self.amplitude * n.pdf(x))
    }

    pub fn fwhm(&self) -> f64 {
        FWHM_FACTOR * self.std
    }
}

/// Parameters of a k-component mixture as three parallel sequences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MixtureParams {
    centers: Vec<f64>,
    stds: Vec<f64>,
    amplitudes: Vec<f64>,
}

impl MixtureParams {
    pub fn new(centers: Vec<f64>, stds: Vec<f64>, amplitudes: Vec<f64>) -> Result<Self> {
        if centers.len() != stds.len() || centers.len() != amplitudes.len() {
            return Err(invalid(format!(
                "mixture sequences differ in length: centers {}, stds {}, amplitudes {}",
                centers.len(),
                stds.len(),
                amplitudes.len()
            )));
        }
        Ok(MixtureParams { centers, stds, amplitudes })
    }

    /// Unpacks `[center_1..k, std_1..k, amp_1..k, k]`.
    pub fn from_packed(packed: &[f64]) -> Result<Self> {
        let (&k, body) = packed
            .split_last()
            .ok_or_else(|| invalid("packed mixture vector is empty"))?;
        if !(k.is_finite() && k >= 0.0 && k.fract() == 0.0) {
            return Err(invalid(format!("component count {} is not a non-negative integer", k)));
        }
        let k = k as usize;
        if body.len() != 3 * k {
            return Err(invalid(format!(
                "packed mixture of {} values does not hold {} components",
                packed.len(),
                k
            )));
        }
        Ok(MixtureParams {
            centers: body[..k].to_vec(),
            stds: body[k..2 * k].to_vec(),
            amplitudes: body[2 * k..].to_vec(),
        })
    }

    pub fn to_packed(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(3 * self.len() + 1);
        out.extend_from_slice(&self.centers);
        out.extend_from_slice(&self.stds);
        out.extend_from_slice(&self.amplitudes);
        out.push(self.len() as f64);
        out
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.centers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    pub fn centers(&self) -> &[f64] {
        &self.centers
    }

    pub fn stds(&self) -> &[f64] {
        &self.stds
    }

    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    pub fn components(&self) -> impl Iterator<Item = GaussianComponent> + '_ {
        izip!(&self.centers, &self.stds, &self.amplitudes)
            .map(|(&center, &std, &amplitude)| GaussianComponent { center, std, amplitude })
    }

    /// Sum of the weighted normal densities at every point of `x`.
    pub fn evaluate(&self, x: &[f64]) -> Result<Vec<f64>> {
        let comps: Vec<(Normal, f64)> = self
            .components()
            .map(|c| {
                Normal::new(c.center, c.std)
                    .map(|n| (n, c.amplitude))
                    .map_err(|e| invalid(format!("component std {}: {}", c.std, e)))
            })
            .collect::<Result<_>>()?;

        Ok(x.iter()
            .map(|&xi| comps.iter().map(|(n, a)| a * n.pdf(xi)).sum())
            .collect())
    }

    fn to_vector(&self) -> DVector<f64> {
        let mut v = Vec::with_capacity(3 * self.len());
        v.extend_from_slice(&self.centers);
        v.extend_from_slice(&self.stds);
        v.extend_from_slice(&self.amplitudes);
        DVector::from_vec(v)
    }

    fn from_vector(v: &DVector<f64>, k: usize) -> Self {
        let s = v.as_slice();
        MixtureParams {
            centers: s[..k].to_vec(),
            stds: s[k..2 * k].to_vec(),
            amplitudes: s[2 * k..3 * k].to_vec(),
        }
    }
}

/// Evaluates the mixture model on `x`; thin form of `MixtureParams::evaluate`.
pub fn mixture_model(x: &[f64], params: &MixtureParams) -> Result<Vec<f64>> {
    params.evaluate(x)
}

/// Initial mixture for `centers`: widths ramp `1, 2, .., k`, amplitudes are
/// twice the residual at the profile bin nearest each center.
pub fn seed_mixture(centers: &[f64], profile: &SpectralProfile) -> Result<MixtureParams> {
    if centers.is_empty() {
        return Err(PeakError::NoCandidateFound);
    }
    let stds: Vec<f64> = (1..=centers.len()).map(|i| i as f64).collect();
    let amplitudes = centers
        .iter()
        .map(|&c| {
            profile
                .flatspec_at(c)
                .map(|v| 2.0 * v)
                .ok_or_else(|| invalid("cannot seed a mixture on an empty profile"))
        })
        .collect::<Result<Vec<f64>>>()?;
    MixtureParams::new(centers.to_vec(), stds, amplitudes)
}

/// Converged mixture fit, restricted to components centred inside the band.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub params: MixtureParams,
    pub cost: f64,
    pub iterations: usize,
}

impl FitResult {
    pub fn components(&self) -> impl Iterator<Item = GaussianComponent> + '_ {
        self.params.components()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

const SQRT_2PI: f64 = 2.506_628_274_631_000_7;

// peak height limit, in multiples of the largest absolute residual
const HEIGHT_LIMIT: f64 = 3.0;

/// Box limits for every component of a fit against one profile.
///
/// Centers stay on the frequency axis, widths between half a bin and the
/// axis span, and peak heights within `HEIGHT_LIMIT` times the largest
/// residual magnitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MixtureBounds {
    pub center: (f64, f64),
    pub std: (f64, f64),
    pub max_height: f64,
}

impl MixtureBounds {
    pub fn for_profile(profile: &SpectralProfile) -> Result<Self> {
        let (lo, hi) = profile
            .frequency_range()
            .filter(|(lo, hi)| hi > lo && profile.len() >= 2)
            .ok_or_else(|| invalid("cannot fit a mixture to fewer than two profile bins"))?;
        let span = hi - lo;
        let spacing = span / (profile.len() - 1) as f64;
        let peak = profile.flatspec.iter().fold(0.0f64, |m, v| m.max(v.abs()));

        Ok(MixtureBounds {
            center: (lo, hi),
            std: (0.5 * spacing, span),
            max_height: (HEIGHT_LIMIT * peak).max(f64::MIN_POSITIVE),
        })
    }

    pub fn contains(&self, c: &GaussianComponent) -> bool {
        c.center >= self.center.0
            && c.center <= self.center.1
            && c.std >= self.std.0
            && c.std <= self.std.1
            && c.amplitude.abs() <= self.max_height * c.std * SQRT_2PI * (1.0 + 1e-12)
    }
}

struct MixtureProblem<'a> {
    x: &'a [f64],
    y: &'a [f64],
    k: usize,
    bounds: MixtureBounds,
}

impl MixtureProblem<'_> {
    #[inline]
    fn kernel(x: f64, c: f64, s: f64) -> f64 {
        let z = (x - c) / s;
        (-0.5 * z * z).exp() / (s * SQRT_2PI)
    }
}

impl LeastSquaresProblem for MixtureProblem<'_> {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        let k = self.k;
        DVector::from_iterator(
            self.x.len(),
            self.x.iter().zip(self.y).map(|(&xi, &yi)| {
                let mut m = 0.0;
                for j in 0..k {
                    m += p[2 * k + j] * Self::kernel(xi, p[j], p[k + j]);
                }
                m - yi
            }),
        )
    }

    fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
        let k = self.k;
        let mut jac = DMatrix::zeros(self.x.len(), 3 * k);
        for (i, &xi) in self.x.iter().enumerate() {
            for j in 0..k {
                let (c, s, a) = (p[j], p[k + j], p[2 * k + j]);
                let phi = Self::kernel(xi, c, s);
                let d = xi - c;
                jac[(i, j)] = a * phi * d / (s * s);
                jac[(i, k + j)] = a * phi * (d * d / (s * s * s) - 1.0 / s);
                jac[(i, 2 * k + j)] = phi;
            }
        }
        jac
    }

    fn is_feasible(&self, p: &DVector<f64>) -> bool {
        p.iter().all(|v| v.is_finite()) && (self.k..2 * self.k).all(|j| p[j] > 0.0)
    }

    fn project(&self, p: &mut DVector<f64>) {
        let k = self.k;
        let b = &self.bounds;
        for j in 0..k {
            p[j] = p[j].clamp(b.center.0, b.center.1);
            p[k + j] = p[k + j].clamp(b.std.0, b.std.1);
            let limit = b.max_height * p[k + j] * SQRT_2PI;
            p[2 * k + j] = p[2 * k + j].clamp(-limit, limit);
        }
    }
}

/// Nonlinear least-squares fit of a Gaussian mixture to a profile's residual.
#[derive(Clone, Debug, Default)]
pub struct MixtureFitter {
    pub config: FitConfig,
}

impl MixtureFitter {
    pub fn new(config: FitConfig) -> Self {
        MixtureFitter { config }
    }

    /// Fits `seed` against `profile.flatspec` within `MixtureBounds` and keeps
    /// the components whose center lies inside `band`. Non-convergence is
    /// `FitDivergence`.
    pub fn fit(&self, seed: &MixtureParams, profile: &SpectralProfile, band: (f64, f64)) -> Result<FitResult> {
        if seed.is_empty() {
            return Err(PeakError::NoCandidateFound);
        }
        if profile.len() < 3 * seed.len() {
            log::debug!(
                "fitting {} parameters to {} points is underdetermined",
                3 * seed.len(),
                profile.len()
            );
        }

        let problem = MixtureProblem {
            x: &profile.frequency,
            y: &profile.flatspec,
            k: seed.len(),
            bounds: MixtureBounds::for_profile(profile)?,
        };
        let solver = LevenbergMarquardt {
            max_iterations: self.config.max_iterations,
            ftol: self.config.ftol,
            xtol: self.config.xtol,
            ..Default::default()
        };

        let out = solver.minimize(&problem, seed.to_vector());
        if !out.converged {
            return Err(PeakError::FitDivergence { iterations: out.iterations });
        }

        let fitted = MixtureParams::from_vector(&out.params, seed.len());
        let (lo, hi) = band;
        let mut centers = Vec::new();
        let mut stds = Vec::new();
        let mut amplitudes = Vec::new();
        for c in fitted.components().filter(|c| c.center >= lo && c.center <= hi) {
            centers.push(c.center);
            stds.push(c.std);
            amplitudes.push(c.amplitude);
        }

        Ok(FitResult {
            params: MixtureParams { centers, stds, amplitudes },
            cost: out.cost,
            iterations: out.iterations,
        })
    }
}

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{invalid, Result};

/// Outcome of one k-means partition of scalar observations.
#[derive(Clone, Debug, PartialEq)]
pub struct KMeansFit {
    pub centroids: Vec<f64>,     // ascending
    pub labels: Vec<usize>,      // index into `centroids` per observation
    pub inertia: f64,            // total squared distance to assigned centroid
    pub iterations: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct KMeans {
    pub k: usize,
    pub restarts: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        KMeans { k, restarts: 10, max_iterations: 300, tolerance: 1e-10 }
    }

    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Best of `restarts` runs from k-means++ seeds.
    pub fn fit<R: Rng + ?Sized>(&self, data: &[f64], rng: &mut R) -> Result<KMeansFit> {
        self.check(data)?;
        let mut best: Option<KMeansFit> = None;
        for _ in 0..self.restarts.max(1) {
            let init = kmeans_plus_plus(data, self.k, rng);
            let fit = lloyd(data, init, self.max_iterations, self.tolerance);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }
        best.ok_or_else(|| invalid("k-means produced no partition"))
    }

    /// Lloyd iterations from the given centroids; `init.len()` must equal `k`.
    pub fn fit_from(&self, data: &[f64], init: Vec<f64>) -> Result<KMeansFit> {
        self.check(data)?;
        if init.len() != self.k {
            return Err(invalid(format!(
                "expected {} initial centroids, got {}",
                self.k,
                init.len()
            )));
        }
        Ok(lloyd(data, init, self.max_iterations, self.tolerance))
    }

    fn check(&self, data: &[f64]) -> Result<()> {
        if self.k == 0 {
            return Err(invalid("k-means needs at least one cluster"));
        }
        if data.is_empty() {
            return Err(invalid("k-means needs at least one observation"));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(invalid("k-means observations must be finite"));
        }
        Ok(())
    }
}

/// Index of the nearest centroid and the squared distance to it.
#[inline]
fn nearest(v: f64, centroids: &[f64]) -> (usize, f64) {
    let mut best = 0usize;
    let mut best_d2 = f64::INFINITY;
    for (j, &c) in centroids.iter().enumerate() {
        let d2 = (v - c) * (v - c);
        if d2 < best_d2 {
            best_d2 = d2;
            best = j;
        }
    }
    (best, best_d2)
}

/// Total squared distance of `data` to its nearest centroid.
pub fn inertia(data: &[f64], centroids: &[f64]) -> f64 {
    data.iter().map(|&v| nearest(v, centroids).1).sum()
}

/// k-means++ seeding: each further centroid is drawn with probability
/// proportional to its squared distance from the centroids chosen so far.
/// When every point already sits on a centroid the draw falls back to uniform.
pub fn kmeans_plus_plus<R: Rng + ?Sized>(data: &[f64], k: usize, rng: &mut R) -> Vec<f64> {
    let mut centroids = Vec::with_capacity(k);
    if data.is_empty() || k == 0 { return centroids; }

    centroids.push(data[rng.gen_range(0..data.len())]);
    let mut d2: Vec<f64> = data.iter().map(|&v| (v - centroids[0]).powi(2)).collect();

    while centroids.len() < k {
        let next = match WeightedIndex::new(&d2) {
            Ok(w) => data[w.sample(rng)],
            Err(_) => data[rng.gen_range(0..data.len())],
        };
        centroids.push(next);
        for (d, &v) in d2.iter_mut().zip(data) {
            let nd = (v - next).powi(2);
            if nd < *d { *d = nd; }
        }
    }
    centroids
}

/// Data point farthest from every centroid; seeds the extra cluster of a warm start.
pub fn farthest_point(data: &[f64], centroids: &[f64]) -> Option<f64> {
    data.iter()
        .copied()
        .map(|v| (v, nearest(v, centroids).1))
        .fold(None, |acc: Option<(f64, f64)>, (v, d)| match acc {
            Some((_, bd)) if bd >= d => acc,
            _ => Some((v, d)),
        })
        .map(|(v, _)| v)
}

fn lloyd(data: &[f64], mut centroids: Vec<f64>, max_iterations: usize, tolerance: f64) -> KMeansFit {
    let k = centroids.len();
    let mut labels = vec![0usize; data.len()];
    let mut iterations = 0;

    for _ in 0..max_iterations.max(1) {
        iterations += 1;
        for (l, &v) in labels.iter_mut().zip(data) {
            *l = nearest(v, &centroids).0;
        }

        let mut sums = vec![0.0f64; k];
        let mut counts = vec![0usize; k];
        for (&l, &v) in labels.iter().zip(data) {
            sums[l] += v;
            counts[l] += 1;
        }

        let mut shift = 0.0f64;
        for j in 0..k {
            // empty clusters keep their previous position
            if counts[j] == 0 { continue; }
            let c = sums[j] / counts[j] as f64;
            shift = shift.max((c - centroids[j]).abs());
            centroids[j] = c;
        }
        if shift <= tolerance { break; }
    }

    centroids.sort_by(|a, b| a.total_cmp(b));
    let mut total = 0.0;
    for (l, &v) in labels.iter_mut().zip(data) {
        let (j, d2) = nearest(v, &centroids);
        *l = j;
        total += d2;
    }

    KMeansFit { centroids, labels, inertia: total, iterations }
}

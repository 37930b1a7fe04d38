use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    Max,
    Min,
}

/// A confirmed local extremum at one sensitivity threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakCandidate {
    pub coordinate: f64,
    pub value: f64,
    pub polarity: Polarity,
}

impl PeakCandidate {
    pub fn new(coordinate: f64, value: f64, polarity: Polarity) -> Self {
        PeakCandidate { coordinate, value, polarity }
    }
}

/// Maxima and minima of one scan, each in coordinate order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extrema {
    pub maxima: Vec<PeakCandidate>,
    pub minima: Vec<PeakCandidate>,
}

impl Extrema {
    pub fn is_empty(&self) -> bool {
        self.maxima.is_empty() && self.minima.is_empty()
    }
}

/// Unordered multiset of candidate coordinates pooled over thresholds and folds.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationPool {
    pub observations: Vec<f64>,
}

impl ObservationPool {
    pub fn new() -> Self {
        ObservationPool { observations: Vec::new() }
    }

    pub fn from_coordinates(observations: Vec<f64>) -> Self {
        ObservationPool { observations }
    }

    pub fn extend_from_candidates(&mut self, candidates: &[PeakCandidate]) {
        self.observations.extend(candidates.iter().map(|c| c.coordinate));
    }

    /// Folds another pool into this one.
    pub fn merge(&mut self, other: ObservationPool) {
        self.observations.extend(other.observations);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.observations
    }
}

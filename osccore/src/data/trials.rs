use serde::{Deserialize, Serialize};

use crate::error::{invalid, Result};

/// Dense trials × samples recording of one electrode, row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialMatrix {
    pub data: Vec<f64>,
    pub rows: usize,              // trials
    pub cols: usize,              // samples per trial
}

impl TrialMatrix {
    pub fn new(data: Vec<f64>, rows: usize, cols: usize) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(invalid(format!(
                "trial matrix of {} values cannot be shaped {} x {}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(TrialMatrix { data, rows, cols })
    }

    /// Builds a matrix from one vector per trial; all trials must share a length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
            return Err(invalid(format!(
                "trial {} has {} samples, expected {}",
                i,
                r.len(),
                n_cols
            )));
        }
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for r in rows {
            data.extend(r);
        }
        Ok(TrialMatrix { data, rows: n_rows, cols: n_cols })
    }

    #[inline]
    pub fn n_trials(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |r| self.row(r))
    }

    /// Copies the given trials, in the given order, into a new matrix.
    pub fn select_rows(&self, indices: &[usize]) -> Result<TrialMatrix> {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            if i >= self.rows {
                return Err(invalid(format!(
                    "trial index {} out of range for {} trials",
                    i, self.rows
                )));
            }
            data.extend_from_slice(self.row(i));
        }
        Ok(TrialMatrix { data, rows: indices.len(), cols: self.cols })
    }

    /// Element-wise mean over trials.
    pub fn mean_row(&self) -> Vec<f64> {
        let mut acc = vec![0.0f64; self.cols];
        if self.rows == 0 { return acc; }
        for row in self.iter_rows() {
            for (a, v) in acc.iter_mut().zip(row) {
                *a += *v;
            }
        }
        let n = self.rows as f64;
        for a in &mut acc { *a /= n; }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_checked() {
        assert!(TrialMatrix::new(vec![0.0; 6], 2, 3).is_ok());
        assert!(TrialMatrix::new(vec![0.0; 5], 2, 3).is_err());
        assert!(TrialMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_select_rows() {
        let m = TrialMatrix::from_rows(vec![
            vec![1.0, 2.0],
            vec![3.0, 4.0],
            vec![5.0, 6.0],
        ]).unwrap();
        let s = m.select_rows(&[2, 0]).unwrap();
        assert_eq!(s.rows, 2);
        assert_eq!(s.row(0), &[5.0, 6.0]);
        assert_eq!(s.row(1), &[1.0, 2.0]);
        assert!(m.select_rows(&[3]).is_err());
    }

    #[test]
    fn test_mean_row() {
        let m = TrialMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(m.mean_row(), vec![2.0, 4.0]);
    }
}

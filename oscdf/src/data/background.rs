use nalgebra::{DMatrix, DVector};
use osccore::{PeakError, Result};

/// Polynomial trend `y = c0 + c1 x + .. + cn x^n`, fitted by least squares.
#[derive(Clone, Debug, PartialEq)]
pub struct PolynomialBackground {
    pub coefficients: Vec<f64>,
}

impl PolynomialBackground {
    pub fn fit(x: &[f64], y: &[f64], order: usize) -> Result<Self> {
        if x.len() != y.len() {
            return Err(PeakError::InvalidArgument(format!(
                "x has {} values but y has {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() <= order {
            return Err(PeakError::Profiler(format!(
                "{} points cannot determine an order {} background",
                x.len(),
                order
            )));
        }

        let vandermonde = DMatrix::from_fn(x.len(), order + 1, |i, j| x[i].powi(j as i32));
        let b = DVector::from_column_slice(y);
        let coefficients = vandermonde
            .svd(true, true)
            .solve(&b, 1e-12)
            .map_err(|e| PeakError::Profiler(format!("background fit failed: {}", e)))?;

        Ok(PolynomialBackground { coefficients: coefficients.iter().copied().collect() })
    }

    pub fn order(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }
}

/// Residual of log10 power after removing a polynomial trend in log10
/// frequency. Frequencies must be positive.
pub fn flatten(frequency: &[f64], log_power: &[f64], order: usize) -> Result<(PolynomialBackground, Vec<f64>)> {
    if frequency.iter().any(|&f| !(f > 0.0)) {
        return Err(PeakError::Profiler("log-log background needs positive frequencies".to_string()));
    }
    let log_f: Vec<f64> = frequency.iter().map(|f| f.log10()).collect();
    let bg = PolynomialBackground::fit(&log_f, log_power, order)?;
    let flat = log_f.iter().zip(log_power).map(|(&lf, &p)| p - bg.evaluate(lf)).collect();
    Ok((bg, flat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 - 2.0 * v).collect();
        let bg = PolynomialBackground::fit(&x, &y, 1).unwrap();
        assert_eq!(bg.order(), 1);
        assert!((bg.coefficients[0] - 3.0).abs() < 1e-9);
        assert!((bg.coefficients[1] + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_power_law_flattens() {
        let f: Vec<f64> = (1..50).map(|i| i as f64).collect();
        let p: Vec<f64> = f.iter().map(|v| 1.5 - 2.0 * v.log10()).collect();
        let (_, flat) = flatten(&f, &p, 1).unwrap();
        assert!(flat.iter().all(|r| r.abs() < 1e-9));
    }

    #[test]
    fn test_underdetermined() {
        assert!(PolynomialBackground::fit(&[1.0], &[1.0], 1).is_err());
        assert!(flatten(&[0.0, 1.0, 2.0], &[0.0; 3], 1).is_err());
    }
}

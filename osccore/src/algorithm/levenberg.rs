use nalgebra::{DMatrix, DVector};

/// A nonlinear least-squares problem: minimise `|r(p)|^2`.
pub trait LeastSquaresProblem {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64>;

    /// Parameters outside the model's domain are rejected like a failed step.
    fn is_feasible(&self, _params: &DVector<f64>) -> bool {
        true
    }

    /// Moves `params` back inside the problem's bounds. Unbounded by default.
    fn project(&self, _params: &mut DVector<f64>) {}
}

#[derive(Clone, Debug)]
pub struct Minimization {
    pub params: DVector<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Damped Gauss-Newton (Levenberg-Marquardt) with Marquardt diagonal scaling.
#[derive(Clone, Copy, Debug)]
pub struct LevenbergMarquardt {
    pub max_iterations: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub initial_damping: f64,
    // converged once `stall_iterations` iterations lower the cost by less
    // than this relative amount
    pub stall_tolerance: f64,
    pub stall_iterations: usize,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        LevenbergMarquardt {
            max_iterations: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_damping: 1e-3,
            stall_tolerance: 1e-6,
            stall_iterations: 50,
        }
    }
}

const MAX_DAMPING: f64 = 1e16;
const MIN_DAMPING: f64 = 1e-12;
const DIAG_FLOOR: f64 = 1e-12;

impl LevenbergMarquardt {
    pub fn minimize<P: LeastSquaresProblem>(&self, problem: &P, init: DVector<f64>) -> Minimization {
        let mut x = init;
        problem.project(&mut x);
        let mut r = problem.residuals(&x);
        let mut cost = r.norm_squared();

        if !cost.is_finite() || !problem.is_feasible(&x) {
            return Minimization { params: x, cost, iterations: 0, converged: false };
        }

        let mut lambda = self.initial_damping;
        let mut iterations = 0;
        let mut window_cost = cost;
        let mut window_start = 0;

        while iterations < self.max_iterations {
            iterations += 1;
            if cost == 0.0 {
                return Minimization { params: x, cost, iterations, converged: true };
            }

            let j = problem.jacobian(&x);
            let jtj = j.transpose() * &j;
            let g = j.transpose() * &r;
            if g.amax() == 0.0 || self.gradient_negligible(&g, &jtj, cost) {
                return Minimization { params: x, cost, iterations, converged: true };
            }

            if iterations - window_start >= self.stall_iterations {
                if window_cost - cost <= self.stall_tolerance * window_cost {
                    log::debug!("stopping after {} iterations without progress, cost {:.3e}", iterations, cost);
                    return Minimization { params: x, cost, iterations, converged: true };
                }
                window_cost = cost;
                window_start = iterations;
            }

            let mut a = jtj.clone();
            for i in 0..a.nrows() {
                a[(i, i)] += lambda * jtj[(i, i)].max(DIAG_FLOOR);
            }

            let step = match a.cholesky() {
                Some(ch) => ch.solve(&(-&g)),
                None => {
                    lambda *= 10.0;
                    if lambda > MAX_DAMPING { break; }
                    continue;
                }
            };

            let mut candidate = &x + &step;
            problem.project(&mut candidate);
            let step = &candidate - &x;
            let step_small = step.norm() <= self.xtol * (x.norm() + self.xtol);

            if problem.is_feasible(&candidate) {
                let r_new = problem.residuals(&candidate);
                let cost_new = r_new.norm_squared();

                if cost_new.is_finite() && cost_new < cost {
                    // reduction predicted by the linearised model
                    let predicted = -(2.0 * g.dot(&step) + step.dot(&(&jtj * &step)));
                    let actual_rel = (cost - cost_new) / cost;
                    let predicted_rel = predicted / cost;

                    x = candidate;
                    r = r_new;
                    cost = cost_new;
                    lambda = (lambda / 10.0).max(MIN_DAMPING);

                    if (actual_rel <= self.ftol && predicted_rel <= self.ftol) || step_small {
                        return Minimization { params: x, cost, iterations, converged: true };
                    }
                    continue;
                }
            }

            if step_small {
                return Minimization { params: x, cost, iterations, converged: true };
            }
            lambda *= 10.0;
            if lambda > MAX_DAMPING { break; }
        }

        Minimization { params: x, cost, iterations, converged: false }
    }

    /// Largest cosine between the residual and a Jacobian column.
    fn gradient_negligible(&self, g: &DVector<f64>, jtj: &DMatrix<f64>, cost: f64) -> bool {
        let rnorm = cost.sqrt();
        g.iter()
            .enumerate()
            .map(|(i, gi)| gi.abs() / (jtj[(i, i)].sqrt().max(DIAG_FLOOR) * rnorm))
            .fold(0.0f64, f64::max)
            <= self.gtol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // y = a * exp(b * t)
    struct Exponential {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for Exponential {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t.iter().zip(&self.y).map(|(&t, &y)| p[0] * (p[1] * t).exp() - y),
            )
        }

        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_fn(self.t.len(), 2, |i, j| {
                let e = (p[1] * self.t[i]).exp();
                if j == 0 { e } else { p[0] * self.t[i] * e }
            })
        }
    }

    #[test]
    fn test_recovers_exponential() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = t.iter().map(|&t| 2.0 * (-1.3 * t).exp()).collect();
        let problem = Exponential { t, y };

        let out = LevenbergMarquardt::default().minimize(&problem, DVector::from_vec(vec![1.0, -0.5]));
        assert!(out.converged);
        assert!((out.params[0] - 2.0).abs() < 1e-6);
        assert!((out.params[1] + 1.3).abs() < 1e-6);
    }

    // same model with the decay rate held at or above `min_rate`
    struct BoundedExponential {
        inner: Exponential,
        min_rate: f64,
    }

    impl LeastSquaresProblem for BoundedExponential {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            self.inner.residuals(p)
        }

        fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
            self.inner.jacobian(p)
        }

        fn project(&self, p: &mut DVector<f64>) {
            p[1] = p[1].max(self.min_rate);
        }
    }

    #[test]
    fn test_bounds_hold_and_converge() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = t.iter().map(|&t| 2.0 * (-1.3 * t).exp()).collect();
        let problem = BoundedExponential { inner: Exponential { t, y }, min_rate: -1.0 };

        let out = LevenbergMarquardt::default().minimize(&problem, DVector::from_vec(vec![1.0, -3.0]));
        assert!(out.converged);
        assert!(out.iterations < 2000);
        assert!((out.params[1] + 1.0).abs() < 1e-6);
        assert!(out.params[0] > 1.0 && out.params[0] < 2.0);
    }

    #[test]
    fn test_budget_exhaustion_reported() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = t.iter().map(|&t| 2.0 * (-1.3 * t).exp()).collect();
        let problem = Exponential { t, y };

        let lm = LevenbergMarquardt { max_iterations: 1, ..Default::default() };
        let out = lm.minimize(&problem, DVector::from_vec(vec![10.0, 3.0]));
        assert!(!out.converged);
        assert_eq!(out.iterations, 1);
    }
}

//! Solvers for the linear model kinds.
//!
//! Smooth objectives (squared, logistic and smoothed hinge loss with an L2
//! penalty) are minimized by gradient or fast (Nesterov) gradient descent
//! with a backtracking line search. The L1-penalized squared loss is
//! minimized by cyclic or random coordinate descent with exact
//! soft-threshold updates.
use ndarray::{Array1, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{Hyperparameters, LoggingLevel};
use crate::logging::LogSink;
use crate::models::fit_loop::FitLoop;

/// Data-fit term of a smooth objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothLoss {
    Squared,
    Logistic,
    /// Smoothed hinge with half-width `h`
    SmoothedHinge { h: f64 },
}

impl SmoothLoss {
    /// Loss of one sample with label `y` and margin `m = xᵀβ`.
    fn value(&self, y: f64, m: f64) -> f64 {
        match *self {
            SmoothLoss::Squared => (y - m).powi(2),
            SmoothLoss::Logistic => softplus(-y * m),
            SmoothLoss::SmoothedHinge { h } => {
                let t = y * m;
                if t > 1.0 + h {
                    0.0
                } else if t < 1.0 - h {
                    1.0 - t
                } else {
                    (1.0 + h - t).powi(2) / (4.0 * h)
                }
            }
        }
    }

    /// Derivative of the loss with respect to the margin.
    fn slope(&self, y: f64, m: f64) -> f64 {
        match *self {
            SmoothLoss::Squared => -2.0 * (y - m),
            SmoothLoss::Logistic => -y * sigmoid(-y * m),
            SmoothLoss::SmoothedHinge { h } => {
                let t = y * m;
                if t > 1.0 + h {
                    0.0
                } else if t < 1.0 - h {
                    -y
                } else {
                    -y * (1.0 + h - t) / (2.0 * h)
                }
            }
        }
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn coefficient_string(beta: &Array1<f64>) -> String {
    beta.iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// `(1/n) Σ loss(y_i, x_iᵀβ) + λ‖β‖²`
pub struct SmoothObjective<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a Array1<f64>,
    lambda: f64,
    loss: SmoothLoss,
}

impl<'a> SmoothObjective<'a> {
    pub fn new(x: ArrayView2<'a, f64>, y: &'a Array1<f64>, lambda: f64, loss: SmoothLoss) -> Self {
        Self { x, y, lambda, loss }
    }

    fn n(&self) -> f64 {
        self.x.nrows().max(1) as f64
    }

    pub fn value(&self, beta: &Array1<f64>) -> f64 {
        let margins = self.x.dot(beta);
        let data: f64 = self
            .y
            .iter()
            .zip(margins.iter())
            .map(|(&y, &m)| self.loss.value(y, m))
            .sum();
        data / self.n() + self.lambda * beta.dot(beta)
    }

    pub fn gradient(&self, beta: &Array1<f64>) -> Array1<f64> {
        let margins = self.x.dot(beta);
        let slopes: Array1<f64> = self
            .y
            .iter()
            .zip(margins.iter())
            .map(|(&y, &m)| self.loss.slope(y, m))
            .collect();
        self.x.t().dot(&slopes) / self.n() + beta * (2.0 * self.lambda)
    }
}

/// Largest step `eta * t_eta^k` giving sufficient decrease along `-grad`.
fn backtracking(
    objective: &SmoothObjective,
    point: &Array1<f64>,
    grad: &Array1<f64>,
    grad_sq: f64,
    hp: &Hyperparameters,
) -> f64 {
    let f0 = objective.value(point);
    let mut eta = hp.eta;
    for _ in 0..hp.bt_max_iter {
        let candidate = point - &(grad * eta);
        if objective.value(&candidate) <= f0 - hp.alpha * eta * grad_sq {
            break;
        }
        eta *= hp.t_eta;
    }
    eta
}

/// Gradient descent from `β = 0`, accelerated when `fast` is set.
///
/// Stops when the gradient norm drops below `eps` (marking the fold as
/// converged) or after `max_iter` iterations.
pub fn gradient_descent(
    objective: &SmoothObjective,
    hp: &Hyperparameters,
    fast: bool,
    fit_loop: &mut FitLoop,
    sink: &LogSink,
) -> Array1<f64> {
    let d = objective.x.ncols();
    let mut beta = Array1::<f64>::zeros(d);
    let mut theta = beta.clone();

    for t in 0..hp.max_iter {
        let point = if fast { &theta } else { &beta };
        let grad = objective.gradient(point);
        let grad_sq = grad.dot(&grad);
        let grad_norm = grad_sq.sqrt();
        if grad_norm < hp.eps {
            fit_loop.converge();
            break;
        }

        let eta = backtracking(objective, point, &grad, grad_sq, hp);
        let next = point - &(&grad * eta);
        if fast {
            let momentum = t as f64 / (t as f64 + 3.0);
            theta = &next + &((&next - &beta) * momentum);
        }
        beta = next;

        sink.emit(LoggingLevel::Reduced, || {
            vec![
                fit_loop.fold().to_string(),
                t.to_string(),
                objective.value(&beta).to_string(),
                grad_norm.to_string(),
                eta.to_string(),
            ]
        });
        sink.emit(LoggingLevel::Full, || {
            vec![
                fit_loop.fold().to_string(),
                t.to_string(),
                coefficient_string(&beta),
            ]
        });
    }

    beta
}

fn soft_threshold(a: f64, lambda: f64) -> f64 {
    a.signum() * (a.abs() - lambda).max(0.0)
}

/// Coordinate descent on `(1/n)‖y − Xβ‖² + λ‖β‖₁` from `β = 0`.
///
/// Each sweep visits every coordinate once, in index order when `random` is
/// false and in a freshly shuffled order otherwise. Stops when no coordinate moved by more than
/// `eps` during a sweep or after `max_iter` sweeps.
pub fn coordinate_descent<R: Rng>(
    x: ArrayView2<f64>,
    y: &Array1<f64>,
    hp: &Hyperparameters,
    random: bool,
    rng: &mut R,
    fit_loop: &mut FitLoop,
    sink: &LogSink,
) -> Array1<f64> {
    let d = x.ncols();
    let mut beta = Array1::<f64>::zeros(d);
    if d == 0 {
        fit_loop.converge();
        return beta;
    }

    let scale = 2.0 / x.nrows().max(1) as f64;
    let col_sq: Vec<f64> = (0..d).map(|j| x.column(j).dot(&x.column(j))).collect();
    let mut residual = y.clone();
    let mut order: Vec<usize> = (0..d).collect();

    for t in 0..hp.max_iter {
        if random {
            order.shuffle(rng);
        }
        let mut max_change: f64 = 0.0;
        for &j in &order {
            let col = x.column(j);
            let rho = col.dot(&residual) + col_sq[j] * beta[j];
            let updated = if col_sq[j] > 0.0 {
                soft_threshold(scale * rho, hp.lambda) / (scale * col_sq[j])
            } else {
                0.0
            };
            let delta = updated - beta[j];
            if delta != 0.0 {
                residual.scaled_add(-delta, &col);
                beta[j] = updated;
            }
            max_change = max_change.max(delta.abs());
        }

        sink.emit(LoggingLevel::Reduced, || {
            let objective = residual.dot(&residual) * scale / 2.0
                + hp.lambda * beta.iter().map(|b| b.abs()).sum::<f64>();
            vec![
                fit_loop.fold().to_string(),
                t.to_string(),
                objective.to_string(),
                max_change.to_string(),
            ]
        });
        sink.emit(LoggingLevel::Full, || {
            vec![
                fit_loop.fold().to_string(),
                t.to_string(),
                coefficient_string(&beta),
            ]
        });

        if max_change < hp.eps {
            fit_loop.converge();
            break;
        }
    }

    beta
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn separable() -> (ndarray::Array2<f64>, Array1<f64>) {
        (
            array![[2.0, 0.1], [1.5, -0.2], [1.0, 0.3], [-1.0, 0.2], [-1.5, -0.1], [-2.0, 0.0]],
            array![1.0, 1.0, 1.0, -1.0, -1.0, -1.0],
        )
    }

    fn hp(max_iter: usize) -> Hyperparameters {
        Hyperparameters {
            lambda: 0.01,
            max_iter,
            eps: 1e-6,
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let (x, y) = separable();
        let beta = array![0.3, -0.7];
        for loss in [
            SmoothLoss::Squared,
            SmoothLoss::Logistic,
            SmoothLoss::SmoothedHinge { h: 0.5 },
        ] {
            let obj = SmoothObjective::new(x.view(), &y, 0.1, loss);
            let grad = obj.gradient(&beta);
            for j in 0..2 {
                let mut up = beta.clone();
                let mut down = beta.clone();
                up[j] += 1e-6;
                down[j] -= 1e-6;
                let numeric = (obj.value(&up) - obj.value(&down)) / 2e-6;
                assert!((numeric - grad[j]).abs() < 1e-4, "{:?} coord {}", loss, j);
            }
        }
    }

    #[test]
    fn test_fast_gradient_separates() {
        let (x, y) = separable();
        for loss in [
            SmoothLoss::Squared,
            SmoothLoss::Logistic,
            SmoothLoss::SmoothedHinge { h: 0.5 },
        ] {
            let obj = SmoothObjective::new(x.view(), &y, 0.01, loss);
            let mut fl = FitLoop::new(1, 6);
            fl.advance();
            let beta = gradient_descent(&obj, &hp(500), true, &mut fl, &LogSink::unbound());
            let margins = x.dot(&beta);
            for (m, label) in margins.iter().zip(y.iter()) {
                assert!(m * label > 0.0, "{:?} misclassified", loss);
            }
        }
    }

    #[test]
    fn test_gradient_descent_decreases_objective() {
        let (x, y) = separable();
        let obj = SmoothObjective::new(x.view(), &y, 0.1, SmoothLoss::Logistic);
        let mut fl = FitLoop::new(1, 6);
        fl.advance();
        let beta = gradient_descent(&obj, &hp(50), false, &mut fl, &LogSink::unbound());
        assert!(obj.value(&beta) < obj.value(&Array1::zeros(2)));
    }

    #[test]
    fn test_coordinate_descent_zeroes_noise_feature() {
        let (x, y) = separable();
        let mut rng = StdRng::seed_from_u64(7);
        let params = Hyperparameters {
            lambda: 0.2,
            ..hp(200)
        };
        for random in [false, true] {
            let mut fl = FitLoop::new(1, 6);
            fl.advance();
            let sink = LogSink::unbound();
            let beta = coordinate_descent(x.view(), &y, &params, random, &mut rng, &mut fl, &sink);
            assert!(beta[0] > 0.0);
            assert_eq!(beta[1], 0.0);
            assert!(fl.converged());
        }
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(1000.0) <= 1.0);
    }
}

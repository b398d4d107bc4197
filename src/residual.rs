//! Gaussian Process regression of the residual Amdahl's Law cannot explain.
//!
//! Feature vector `x = [s, gamma, load]`, target `y = observed - T_theory`.
//! Kernel: `Constant * Matern(nu=2.5, anisotropic length-scale) + WhiteKernel`,
//! matching the reference implementation this module was distilled from. No
//! turnkey Gaussian Process crate sits in this codebase's dependency stack, so
//! the kernel and the linear solve are implemented directly over `ndarray`,
//! which this codebase already reaches for in its neural-workload crates.

use ndarray::Array2;

/// One training point: parallelism, input scale, cluster load, and the
/// residual Amdahl's Law left on the table for that run. Deliberately
/// narrower than the full execution-history row persisted by the store —
/// the learner only ever needs these four numbers.
#[derive(Debug, Clone, Copy)]
pub struct HistoryPoint {
    pub parallelism: f64,
    pub gamma: f64,
    pub load: f64,
    pub residual: f64,
}

/// Recommended-default hyperparameters for the kernel. These are not fit by
/// an optimizer (no n_restarts_optimizer loop) — per the design notes, the
/// bounds below are recommended defaults, not a correctness requirement.
#[derive(Debug, Clone, Copy)]
pub struct GpHyperParams {
    /// `ConstantKernel` value, bounded in `[1e-3, 1e4]` by convention.
    pub constant: f64,
    /// Per-feature Matern length scales `[s, gamma, load]`, initial `[10, 1, 10]`.
    pub length_scales: [f64; 3],
    /// `WhiteKernel` noise level, bounded in `[1e-2, 1e2]` by convention.
    pub noise: f64,
    /// Ridge added to the diagonal purely for numerical stability.
    pub alpha: f64,
}

impl Default for GpHyperParams {
    fn default() -> Self {
        Self {
            constant: 1.0,
            length_scales: [10.0, 1.0, 10.0],
            noise: 1.0,
            alpha: 1e-10,
        }
    }
}

/// Capability every residual learner exposes to the estimator: train on
/// history, predict a residual per candidate `s`, and report fit state.
/// Left generic (not boxed) in [`crate::estimator::Estimator`] since there is
/// exactly one production implementation; the trait exists for testability.
pub trait ResidualLearner {
    fn train(&mut self, history: &[HistoryPoint]);
    fn predict(&self, s_candidates: &[u32], gamma: f64, load: f64) -> Vec<f64>;
    fn is_trained(&self) -> bool;
}

struct Fit {
    x_train: Vec<[f64; 3]>,
    alpha_vec: Vec<f64>,
    y_mean: f64,
}

/// Gaussian Process residual learner with the kernel described above.
pub struct GaussianProcessResidual {
    params: GpHyperParams,
    fit: Option<Fit>,
}

impl GaussianProcessResidual {
    pub fn new() -> Self {
        Self::with_params(GpHyperParams::default())
    }

    pub fn with_params(params: GpHyperParams) -> Self {
        Self { params, fit: None }
    }

    fn kernel(&self, a: &[f64; 3], b: &[f64; 3]) -> f64 {
        self.params.constant * matern_5_2(a, b, &self.params.length_scales)
    }
}

impl Default for GaussianProcessResidual {
    fn default() -> Self {
        Self::new()
    }
}

impl ResidualLearner for GaussianProcessResidual {
    fn train(&mut self, history: &[HistoryPoint]) {
        if history.is_empty() {
            self.fit = None;
            return;
        }

        let n = history.len();
        let y_mean = history.iter().map(|h| h.residual).sum::<f64>() / n as f64;
        let x_train: Vec<[f64; 3]> = history
            .iter()
            .map(|h| [h.parallelism, h.gamma, h.load])
            .collect();
        let y_centered: Vec<f64> = history.iter().map(|h| h.residual - y_mean).collect();

        let mut k = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                let mut kij = self.kernel(&x_train[i], &x_train[j]);
                if i == j {
                    kij += self.params.noise + self.params.alpha;
                }
                k[[i, j]] = kij;
            }
        }

        match cholesky(&k) {
            Some(l) => {
                let alpha_vec = cholesky_solve(&l, &y_centered);
                self.fit = Some(Fit {
                    x_train,
                    alpha_vec,
                    y_mean,
                });
            }
            // Singular kernel matrix (e.g. duplicate points collapsing the
            // covariance structure): degrade to untrained, residuals zero.
            None => self.fit = None,
        }
    }

    fn predict(&self, s_candidates: &[u32], gamma: f64, load: f64) -> Vec<f64> {
        let Some(fit) = &self.fit else {
            return vec![0.0; s_candidates.len()];
        };

        s_candidates
            .iter()
            .map(|&s| {
                let x_star = [s as f64, gamma, load];
                let k_star_dot: f64 = fit
                    .x_train
                    .iter()
                    .zip(fit.alpha_vec.iter())
                    .map(|(x_i, &a_i)| self.kernel(x_i, &x_star) * a_i)
                    .sum();
                k_star_dot + fit.y_mean
            })
            .collect()
    }

    fn is_trained(&self) -> bool {
        self.fit.is_some()
    }
}

fn matern_5_2(a: &[f64; 3], b: &[f64; 3], length_scales: &[f64; 3]) -> f64 {
    let sqrt5 = 5f64.sqrt();
    let r2: f64 = (0..3)
        .map(|i| {
            let d = (a[i] - b[i]) / length_scales[i];
            d * d
        })
        .sum();
    let r = r2.sqrt();
    (1.0 + sqrt5 * r + (5.0 / 3.0) * r2) * (-sqrt5 * r).exp()
}

/// Cholesky decomposition of a symmetric positive-definite matrix. Returns
/// `None` if the matrix is not positive definite (a non-positive pivot turns
/// up), which the caller treats as "training failed, fall back to untrained".
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let val = a[[i, i]] - sum;
                if val <= 0.0 {
                    return None;
                }
                l[[i, j]] = val.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    Some(l)
}

/// Solves `L L^T x = b` given the Cholesky factor `L`, via forward then
/// backward substitution.
fn cholesky_solve(l: &Array2<f64>, b: &[f64]) -> Vec<f64> {
    let n = l.nrows();

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrained_model_predicts_zeros() {
        let model = GaussianProcessResidual::new();
        let preds = model.predict(&[1, 2, 4], 1.0, 0.0);
        assert_eq!(preds, vec![0.0, 0.0, 0.0]);
        assert!(!model.is_trained());
    }

    #[test]
    fn test_empty_history_leaves_model_untrained() {
        let mut model = GaussianProcessResidual::new();
        model.train(&[]);
        assert!(!model.is_trained());
    }

    #[test]
    fn test_train_then_predict_near_observed_points() {
        let mut model = GaussianProcessResidual::new();
        let history = vec![
            HistoryPoint { parallelism: 1.0, gamma: 1.0, load: 0.0, residual: 2.0 },
            HistoryPoint { parallelism: 2.0, gamma: 1.0, load: 0.0, residual: 2.2 },
            HistoryPoint { parallelism: 4.0, gamma: 1.0, load: 0.0, residual: 1.8 },
            HistoryPoint { parallelism: 8.0, gamma: 1.0, load: 0.0, residual: 2.1 },
        ];
        model.train(&history);
        assert!(model.is_trained());

        let preds = model.predict(&[1, 2, 4, 8], 1.0, 0.0);
        assert_eq!(preds.len(), 4);
        // Predictions should land close to the flat-ish cluster of
        // observed residuals rather than diverging wildly.
        for p in preds {
            assert!(p > 0.5 && p < 3.5, "prediction {p} out of expected range");
        }
    }

    #[test]
    fn test_prediction_is_finite() {
        let mut model = GaussianProcessResidual::new();
        let history = vec![
            HistoryPoint { parallelism: 3.0, gamma: 1.3, load: 10.0, residual: -4.5 },
            HistoryPoint { parallelism: 6.0, gamma: 1.3, load: 20.0, residual: 3.2 },
        ];
        model.train(&history);
        let preds = model.predict(&[1, 3, 6, 12], 1.3, 15.0);
        for p in preds {
            assert!(p.is_finite());
        }
    }
}

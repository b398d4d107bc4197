//! Predict/feedback orchestration: cold-start and calibration policy,
//! search over candidate parallelism levels, and the optimistic-concurrency
//! retry loop. Line-for-line grounded on `ArboEstimator` in the reference
//! implementation this was distilled from.

use std::marker::PhantomData;

use crate::amdahl;
use crate::config::EstimatorConfig;
use crate::residual::{GaussianProcessResidual, HistoryPoint, ResidualLearner};
use crate::store::{HistoryRow, RunData, TaskModel, TaskStore};
use crate::{ApeError, Result};

/// Result of a `predict` call: the chosen degree of parallelism, the input
/// scale factor used, and the predicted time decomposition at that choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub s: u32,
    pub gamma: f64,
    pub predicted_amdahl: f64,
    pub predicted_residual: f64,
}

/// Orchestrates predict/feedback against a [`TaskStore`], using `R` as the
/// residual learner. `R` is re-instantiated (via `Default`) and trained from
/// scratch on every `predict` call — there is no persistent in-process
/// model, matching the "stateless between calls" concurrency design.
pub struct Estimator<S: TaskStore, R: ResidualLearner + Default = GaussianProcessResidual> {
    store: S,
    default_startup: f64,
    history_window: i64,
    max_retries: u32,
    _residual: PhantomData<R>,
}

impl<S: TaskStore> Estimator<S, GaussianProcessResidual> {
    pub fn new(store: S) -> Self {
        Self::with_config(
            store,
            &EstimatorConfig {
                default_startup: crate::DEFAULT_STARTUP_SECONDS,
                history_window: crate::DEFAULT_HISTORY_WINDOW,
                max_retries: crate::DEFAULT_MAX_RETRIES,
            },
        )
    }
}

impl<S: TaskStore, R: ResidualLearner + Default> Estimator<S, R> {
    /// Builds an estimator from the application's loaded configuration,
    /// rather than the crate's built-in constants — see SPEC_FULL.md §9
    /// on injecting pseudo-global state via `AppConfig`.
    pub fn with_config(store: S, config: &EstimatorConfig) -> Self {
        Self {
            store,
            default_startup: config.default_startup,
            history_window: config.history_window,
            max_retries: config.max_retries,
            _residual: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Main optimization loop: returns the chosen `s`, along with `gamma`
    /// and the predicted time decomposition.
    #[tracing::instrument(skip(self), fields(task_name = %task_name))]
    pub async fn predict(
        &self,
        task_name: &str,
        input_quantity: f64,
        cluster_load: f64,
        max_time_slo: Option<f64>,
    ) -> Result<Prediction> {
        let model = self.store.get_task_model(task_name).await?;

        let Some(model) = model else {
            tracing::warn!("task not found, triggering cold start initialization");
            match self
                .store
                .initialize_task(
                    task_name,
                    0.0,
                    input_quantity,
                    1.0,
                    self.default_startup,
                    crate::DEFAULT_ALPHA_P,
                    crate::DEFAULT_ALPHA_K,
                )
                .await
            {
                Ok(()) | Err(ApeError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
            return Ok(Prediction {
                s: 1,
                gamma: 1.0,
                predicted_amdahl: 0.0,
                predicted_residual: 0.0,
            });
        };

        let gamma = if model.base_input_quantity > 0.0 {
            input_quantity / model.base_input_quantity
        } else {
            1.0
        };

        // Calibration run: one datapoint at nontrivial parallelism to seed p.
        if model.sample_count == 1 {
            tracing::info!("calibration run for '{task_name}'; forcing s=5");
            let history = self.store.get_history(task_name, 10).await?;
            let mut residual_model = R::default();
            residual_model.train(&to_history_points(&history));

            let predicted_amdahl = amdahl::theoretical_time(
                5,
                gamma,
                model.p_obs,
                model.k_exponent,
                model.t_base_1,
                model.c_startup,
            );
            let predicted_residual = residual_model.predict(&[5], gamma, cluster_load)[0];

            return Ok(Prediction {
                s: 5,
                gamma,
                predicted_amdahl: sanitize_float(predicted_amdahl),
                predicted_residual: sanitize_float(predicted_residual),
            });
        }

        let history = self.store.get_history(task_name, self.history_window).await?;
        let mut residual_model = R::default();
        residual_model.train(&to_history_points(&history));

        let max_s = find_search_space(model.p_obs);
        let candidate_count = ((max_s as f64 * 1.5).ceil()) as u32;
        let candidates: Vec<u32> = (1..=candidate_count).collect();

        tracing::info!("searching for optimal s in range [1, {}]", max_s as f64 * 1.5);

        let residuals = residual_model.predict(&candidates, gamma, cluster_load);

        let mut best_s = 1u32;
        let mut best_score = f64::INFINITY;
        let mut predicted_amdahl = 0.0;
        let mut predicted_residual = 0.0;

        for (i, &s) in candidates.iter().enumerate() {
            let t_amdahl = amdahl::theoretical_time(
                s,
                gamma,
                model.p_obs,
                model.k_exponent,
                model.t_base_1,
                model.c_startup,
            );
            let t_total = t_amdahl + residuals[i];

            if let Some(slo) = max_time_slo {
                if t_total > slo {
                    continue;
                }
            }

            let cost = cost_metric(t_total, s);
            if cost < best_score {
                best_score = cost;
                best_s = s;
                predicted_amdahl = sanitize_float(t_amdahl);
                predicted_residual = sanitize_float(residuals[i]);
            }
        }

        Ok(Prediction {
            s: best_s,
            gamma,
            predicted_amdahl,
            predicted_residual,
        })
    }

    /// Learning loop: updates `p`/`k` and appends the observed run to
    /// history. Retries on optimistic-concurrency conflicts up to
    /// `max_retries` times; logs and drops the datapoint if every attempt
    /// is stale.
    #[tracing::instrument(skip(self), fields(task_name = %task_name))]
    #[allow(clippy::too_many_arguments)]
    pub async fn feedback(
        &self,
        task_name: &str,
        s: u32,
        gamma: f64,
        cluster_load: f64,
        t_actual: f64,
        predicted_amdahl: f64,
        predicted_residual: f64,
    ) -> Result<()> {
        for attempt in 0..self.max_retries {
            let model = self.store.get_task_model(task_name).await?;

            let model = match model {
                None | Some(TaskModel { sample_count: 0, .. }) => {
                    tracing::info!("initializing baseline metrics for '{task_name}' via feedback");
                    let cost = cost_metric(t_actual, s);
                    let run_data = RunData {
                        task_name: task_name.to_string(),
                        s: s as i32,
                        gamma,
                        cluster_load,
                        total_duration: t_actual,
                        residual: 0.0,
                        cost_metric: cost,
                        p_snapshot: 1.0,
                        time_amdahl: predicted_amdahl,
                        pred_residual: predicted_residual,
                    };

                    self.store.update_baseline(task_name, t_actual).await?;
                    match self.store.update_model(task_name, 1.0, 1.0, &run_data, 0).await {
                        Ok(()) => return Ok(()),
                        Err(ApeError::Stale(_)) => continue,
                        Err(e) => return Err(e),
                    }
                }
                Some(model) => model,
            };

            let current_version = model.sample_count;
            let p_current = amdahl::infer_p(s, t_actual, model.c_startup, model.t_base_1, gamma, model.k_exponent);
            let new_p = amdahl::ema_update(model.p_obs, p_current, model.alpha_p);

            let k_current = amdahl::infer_k(s, t_actual, model.c_startup, model.t_base_1, gamma, new_p);
            let new_k = amdahl::ema_update(model.k_exponent, k_current, model.alpha_k);

            let t_theory = amdahl::theoretical_time(s, gamma, new_p, new_k, model.t_base_1, model.c_startup);
            let residual = t_actual - t_theory;
            let cost = cost_metric(t_actual, s);

            let run_data = RunData {
                task_name: task_name.to_string(),
                s: s as i32,
                gamma,
                cluster_load,
                total_duration: t_actual,
                residual,
                cost_metric: cost,
                p_snapshot: new_p,
                time_amdahl: predicted_amdahl,
                pred_residual: predicted_residual,
            };

            match self
                .store
                .update_model(task_name, new_p, new_k, &run_data, current_version)
                .await
            {
                Ok(()) => return Ok(()),
                Err(ApeError::Stale(_)) => {
                    tracing::warn!("optimistic lock conflict for '{task_name}', retrying ({}/{})", attempt + 1, self.max_retries);
                    continue;
                }
                Err(ApeError::NotFound(_)) => {
                    tracing::error!("task '{task_name}' disappeared during feedback");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!("failed to update model for '{task_name}' after {} retries due to concurrency", self.max_retries);
        Ok(())
    }
}

fn to_history_points(rows: &[HistoryRow]) -> Vec<HistoryPoint> {
    rows.iter()
        .map(|r| HistoryPoint {
            parallelism: r.parallelism as f64,
            gamma: r.input_scale_factor,
            load: r.cluster_load,
            residual: r.residual,
        })
        .collect()
}

/// `C(s) = t * sqrt(s)` — penalizes resource use sublinearly so mild
/// extra parallelism is accepted when it shortens wall time, but
/// diminishing returns are discouraged. Kept as its own function so a
/// future caller-supplied objective is a small change.
fn cost_metric(t: f64, s: u32) -> f64 {
    t * (s as f64).sqrt()
}

/// Upper bound for the `s` search space. Diverges as `p -> 1`; the clamp to
/// 50 is a heuristic carried over from the reference implementation, not a
/// derived bound.
fn find_search_space(p: f64) -> u32 {
    if p >= 0.99 {
        return 50;
    }
    let limit = (p / (1.0 - p)).ceil() as u32;
    limit.max(15)
}

fn sanitize_float(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    if x.abs() < 1e-10 {
        return 0.0;
    }
    if x.abs() > 1e10 {
        return if x > 0.0 { 1e10 } else { -1e10 };
    }
    x
}

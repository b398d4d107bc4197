//! Thin orchestrator-facing surface over [`crate::estimator::Estimator`].
//!
//! Mirrors `ArboOptimizer` from the reference implementation: `get_task_configs`
//! turns a single `predict` decision into one config record per chunk for a
//! caller doing dynamic task mapping, and `report_success` is the feedback
//! callback a caller invokes once the parallel stage finishes. Grounded on
//! `arbo_lib/airflow/optimizer.py`.

use serde::{Deserialize, Serialize};

use crate::estimator::{Estimator, Prediction};
use crate::residual::ResidualLearner;
use crate::store::TaskStore;
use crate::Result;

/// One chunk's worth of work, handed to a caller doing dynamic task
/// mapping (each chunk runs as an independent unit of the same task).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkConfig {
    pub chunk_id: u32,
    pub total_chunks: u32,
    pub gamma: f64,
    pub task_name: String,
}

/// A `predict` decision bundled with the chunk configs derived from it.
/// Callers hold onto `predicted_amdahl`/`predicted_residual` and pass them
/// back into [`report_success`] so the feedback loop can compute a
/// residual against the snapshot that was actually used to decide `s`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfigs {
    pub configs: Vec<ChunkConfig>,
    pub s: u32,
    pub gamma: f64,
    pub predicted_amdahl: f64,
    pub predicted_residual: f64,
}

/// Requests a parallelism decision and expands it into one [`ChunkConfig`]
/// per unit of work, the shape a dynamic-task-mapping caller expects.
#[tracing::instrument(skip(estimator), fields(task_name = %task_name))]
pub async fn get_task_configs<S, R>(
    estimator: &Estimator<S, R>,
    task_name: &str,
    input_quantity: f64,
    cluster_load: f64,
    max_time_slo: Option<f64>,
) -> Result<TaskConfigs>
where
    S: TaskStore,
    R: ResidualLearner + Default,
{
    let Prediction {
        s,
        gamma,
        predicted_amdahl,
        predicted_residual,
    } = estimator
        .predict(task_name, input_quantity, cluster_load, max_time_slo)
        .await?;

    tracing::info!(
        "request for '{task_name}': input_quantity={input_quantity}, cluster_load={cluster_load} -> s={s}"
    );

    let configs = (0..s)
        .map(|chunk_id| ChunkConfig {
            chunk_id,
            total_chunks: s,
            gamma,
            task_name: task_name.to_string(),
        })
        .collect();

    Ok(TaskConfigs {
        configs,
        s,
        gamma,
        predicted_amdahl,
        predicted_residual,
    })
}

/// Feedback callback invoked once a task's parallel stage completes.
///
/// `total_duration` is the measured wall time. If the caller's own duration
/// probe failed (e.g. an external job-runner API timed out) it passes
/// `fallback_duration` instead and leaves `total_duration` as `None`; at
/// least one of the two must be `Some`.
#[tracing::instrument(skip(estimator), fields(task_name = %task_name))]
#[allow(clippy::too_many_arguments)]
pub async fn report_success<S, R>(
    estimator: &Estimator<S, R>,
    task_name: &str,
    s: u32,
    gamma: f64,
    cluster_load: f64,
    total_duration: Option<f64>,
    fallback_duration: Option<f64>,
    predicted_amdahl: f64,
    predicted_residual: f64,
) -> Result<()>
where
    S: TaskStore,
    R: ResidualLearner + Default,
{
    let t_actual = match total_duration.or(fallback_duration) {
        Some(t) => t,
        None => {
            tracing::error!("no duration available for '{task_name}' (probe failed, no fallback supplied); dropping feedback");
            return Ok(());
        }
    };

    if total_duration.is_none() {
        tracing::warn!("duration probe failed for '{task_name}', using fallback_duration={t_actual}");
    }

    tracing::info!("feedback received for '{task_name}': s={s}, time={t_actual:.2}s, gamma={gamma:.2}");

    estimator
        .feedback(task_name, s, gamma, cluster_load, t_actual, predicted_amdahl, predicted_residual)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residual::GaussianProcessResidual;
    use crate::store::{HistoryRow, RunData, TaskModel};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        models: Mutex<HashMap<String, TaskModel>>,
        history: Mutex<HashMap<String, Vec<HistoryRow>>>,
    }

    #[async_trait]
    impl TaskStore for MemoryStore {
        async fn initialize_task(
            &self,
            task_name: &str,
            t_base: f64,
            base_input_quantity: f64,
            p: f64,
            c_startup: f64,
            alpha_p: f64,
            alpha_k: f64,
        ) -> Result<()> {
            let mut models = self.models.lock().unwrap();
            if models.contains_key(task_name) {
                return Err(crate::ApeError::AlreadyExists(task_name.to_string()));
            }
            models.insert(
                task_name.to_string(),
                TaskModel {
                    task_name: task_name.to_string(),
                    t_base_1: t_base,
                    base_input_quantity,
                    p_obs: p,
                    k_exponent: 1.0,
                    c_startup,
                    alpha_p,
                    alpha_k,
                    sample_count: 0,
                    last_updated: None,
                },
            );
            Ok(())
        }

        async fn get_task_model(&self, task_name: &str) -> Result<Option<TaskModel>> {
            Ok(self.models.lock().unwrap().get(task_name).cloned())
        }

        async fn update_baseline(&self, task_name: &str, new_t_base: f64) -> Result<()> {
            if let Some(model) = self.models.lock().unwrap().get_mut(task_name) {
                model.t_base_1 = new_t_base;
            }
            Ok(())
        }

        async fn get_history(&self, task_name: &str, limit: i64) -> Result<Vec<HistoryRow>> {
            let history = self.history.lock().unwrap();
            let mut rows = history.get(task_name).cloned().unwrap_or_default();
            rows.truncate(limit.max(0) as usize);
            Ok(rows)
        }

        async fn update_model(
            &self,
            task_name: &str,
            new_p: f64,
            new_k: f64,
            run_data: &RunData,
            expected_version: i32,
        ) -> Result<()> {
            let mut models = self.models.lock().unwrap();
            let Some(model) = models.get_mut(task_name) else {
                return Err(crate::ApeError::NotFound(task_name.to_string()));
            };
            if model.sample_count != expected_version {
                return Err(crate::ApeError::Stale(task_name.to_string()));
            }
            model.p_obs = new_p;
            model.k_exponent = new_k;
            model.sample_count += 1;
            self.history
                .lock()
                .unwrap()
                .entry(task_name.to_string())
                .or_default()
                .push(HistoryRow {
                    id: model.sample_count,
                    task_name: run_data.task_name.clone(),
                    parallelism: run_data.s,
                    input_scale_factor: run_data.gamma,
                    cluster_load: run_data.cluster_load,
                    total_duration: run_data.total_duration,
                    residual: run_data.residual,
                    cost_metric: run_data.cost_metric,
                    p_snapshot: run_data.p_snapshot,
                    time_amdahl: run_data.time_amdahl,
                    pred_residual: run_data.pred_residual,
                    recorded_at: chrono::Utc::now(),
                });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cold_start_yields_single_chunk() {
        let estimator: Estimator<MemoryStore, GaussianProcessResidual> = Estimator::new(MemoryStore::default());
        let result = get_task_configs(&estimator, "ingest", 500.0, 0.1, None).await.unwrap();
        assert_eq!(result.s, 1);
        assert_eq!(result.configs.len(), 1);
        assert_eq!(result.configs[0].chunk_id, 0);
        assert_eq!(result.configs[0].total_chunks, 1);
    }

    #[tokio::test]
    async fn test_report_success_uses_fallback_when_probe_missing() {
        let estimator: Estimator<MemoryStore, GaussianProcessResidual> = Estimator::new(MemoryStore::default());
        let configs = get_task_configs(&estimator, "ingest", 500.0, 0.1, None).await.unwrap();

        report_success(
            &estimator,
            "ingest",
            configs.s,
            configs.gamma,
            0.1,
            None,
            Some(42.0),
            configs.predicted_amdahl,
            configs.predicted_residual,
        )
        .await
        .unwrap();

        let model = estimator.store().get_task_model("ingest").await.unwrap().unwrap();
        assert_eq!(model.t_base_1, 42.0);
        assert_eq!(model.sample_count, 1);
    }

    #[tokio::test]
    async fn test_report_success_drops_feedback_with_no_duration() {
        let estimator: Estimator<MemoryStore, GaussianProcessResidual> = Estimator::new(MemoryStore::default());
        get_task_configs(&estimator, "ingest", 500.0, 0.1, None).await.unwrap();

        // Neither a measured duration nor a fallback: feedback is dropped,
        // not an error.
        let res = report_success(&estimator, "ingest", 1, 1.0, 0.1, None, None, 0.0, 0.0).await;
        assert!(res.is_ok());

        let model = estimator.store().get_task_model("ingest").await.unwrap().unwrap();
        assert_eq!(model.sample_count, 0);
    }
}

//! Durable per-task model parameters and execution history.
//!
//! [`TaskStore`] is the seam the [`crate::estimator::Estimator`] is generic
//! over, grounded on the `#[async_trait]` pattern this codebase uses for its
//! connector/coordinator abstractions. [`PgTaskStore`] is the production
//! implementation over PostgreSQL via `sqlx`, matching the schema and the
//! optimistic-concurrency `UPDATE ... WHERE sample_count = expected_version`
//! shape of the reference `ArboState` store this was distilled from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{ApeError, Result};

/// One row of `task_models`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskModel {
    pub task_name: String,
    pub t_base_1: f64,
    pub base_input_quantity: f64,
    pub p_obs: f64,
    pub k_exponent: f64,
    pub c_startup: f64,
    pub alpha_p: f64,
    pub alpha_k: f64,
    pub sample_count: i32,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One row of `execution_history`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: i32,
    pub task_name: String,
    pub parallelism: i32,
    pub input_scale_factor: f64,
    pub cluster_load: f64,
    pub total_duration: f64,
    pub residual: f64,
    pub cost_metric: f64,
    pub p_snapshot: f64,
    pub time_amdahl: f64,
    pub pred_residual: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Everything [`TaskStore::update_model`] needs to append one history row,
/// packaged together so the caller builds it once and the store does not
/// have to take eight positional arguments (mirrors `_pack_run_data` in the
/// reference implementation).
#[derive(Debug, Clone)]
pub struct RunData {
    pub task_name: String,
    pub s: i32,
    pub gamma: f64,
    pub cluster_load: f64,
    pub total_duration: f64,
    pub residual: f64,
    pub cost_metric: f64,
    pub p_snapshot: f64,
    pub time_amdahl: f64,
    pub pred_residual: f64,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn initialize_task(
        &self,
        task_name: &str,
        t_base: f64,
        base_input_quantity: f64,
        p: f64,
        c_startup: f64,
        alpha_p: f64,
        alpha_k: f64,
    ) -> Result<()>;

    async fn get_task_model(&self, task_name: &str) -> Result<Option<TaskModel>>;

    async fn update_baseline(&self, task_name: &str, new_t_base: f64) -> Result<()>;

    async fn get_history(&self, task_name: &str, limit: i64) -> Result<Vec<HistoryRow>>;

    async fn update_model(
        &self,
        task_name: &str,
        new_p: f64,
        new_k: f64,
        run_data: &RunData,
        expected_version: i32,
    ) -> Result<()>;
}

/// Production [`TaskStore`] backed by a PostgreSQL connection pool.
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(connection_string: &str) -> Result<Self> {
        let pool = PgPool::connect(connection_string).await?;
        Ok(Self::new(pool))
    }

    /// Creates `task_models` and `execution_history` if they do not exist
    /// yet. Intended for local/dev bootstrapping and integration tests;
    /// production deployments are expected to manage the schema with a
    /// migration tool.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_models (
                task_name           text primary key,
                t_base_1            double precision,
                base_input_quantity double precision,
                p_obs               double precision,
                k_exponent          double precision,
                c_startup           double precision,
                alpha_p             double precision,
                alpha_k             double precision,
                sample_count        integer not null default 0,
                last_updated        timestamptz
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_history (
                id                 serial primary key,
                task_name          text references task_models(task_name),
                parallelism        integer,
                input_scale_factor double precision,
                cluster_load       double precision,
                total_duration     double precision,
                residual           double precision,
                cost_metric        double precision,
                p_snapshot         double precision,
                time_amdahl        double precision,
                pred_residual      double precision,
                recorded_at        timestamptz default now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
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
        let result = sqlx::query(
            r#"
            INSERT INTO task_models
                (task_name, t_base_1, base_input_quantity, p_obs, c_startup, alpha_p, alpha_k, k_exponent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1.0)
            "#,
        )
        .bind(task_name)
        .bind(t_base)
        .bind(base_input_quantity)
        .bind(p)
        .bind(c_startup)
        .bind(alpha_p)
        .bind(alpha_k)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(ApeError::AlreadyExists(task_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_task_model(&self, task_name: &str) -> Result<Option<TaskModel>> {
        let row = sqlx::query_as::<_, TaskModel>("SELECT * FROM task_models WHERE task_name = $1")
            .bind(task_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update_baseline(&self, task_name: &str, new_t_base: f64) -> Result<()> {
        sqlx::query("UPDATE task_models SET t_base_1 = $1 WHERE task_name = $2")
            .bind(new_t_base)
            .bind(task_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_history(&self, task_name: &str, limit: i64) -> Result<Vec<HistoryRow>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM execution_history WHERE task_name = $1 ORDER BY recorded_at DESC LIMIT $2",
        )
        .bind(task_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
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
        let mut tx = self.pool.begin().await?;

        let update_result = sqlx::query(
            r#"
            UPDATE task_models
                SET p_obs = $1,
                    k_exponent = $2,
                    last_updated = now(),
                    sample_count = sample_count + 1
                WHERE task_name = $3 AND sample_count = $4
            "#,
        )
        .bind(new_p)
        .bind(new_k)
        .bind(task_name)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if update_result.rows_affected() == 0 {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM task_models WHERE task_name = $1")
                .bind(task_name)
                .fetch_optional(&mut *tx)
                .await?;

            return if exists.is_some() {
                Err(ApeError::Stale(task_name.to_string()))
            } else {
                Err(ApeError::NotFound(task_name.to_string()))
            };
        }

        sqlx::query(
            r#"
            INSERT INTO execution_history
                (task_name, parallelism, input_scale_factor, cluster_load, total_duration,
                 residual, cost_metric, p_snapshot, time_amdahl, pred_residual)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&run_data.task_name)
        .bind(run_data.s)
        .bind(run_data.gamma)
        .bind(run_data.cluster_load)
        .bind(run_data.total_duration)
        .bind(run_data.residual)
        .bind(run_data.cost_metric)
        .bind(run_data.p_snapshot)
        .bind(run_data.time_amdahl)
        .bind(run_data.pred_residual)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

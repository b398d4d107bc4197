//! Adaptive Parallelism Estimator (APE)
//!
//! Decides, for each run of a named batch task, how many parallel workers
//! to spawn, and learns from each completed run to improve future
//! decisions. Composes a parametric model (Amdahl's Law with an
//! input-scaling exponent, [`amdahl`]) with a non-parametric residual
//! learner ([`residual`]) over historical runs persisted in the
//! [`store`]. [`estimator`] orchestrates predict/feedback; [`api`] is the
//! thin surface an external orchestrator calls.

pub mod amdahl;
pub mod api;
pub mod config;
pub mod estimator;
pub mod residual;
pub mod store;

/// Default startup overhead (seconds) applied to a task with no override.
pub const DEFAULT_STARTUP_SECONDS: f64 = 6.0;

/// Default EMA smoothing factor for `p_obs`.
pub const DEFAULT_ALPHA_P: f64 = 0.7;

/// Default EMA smoothing factor for `k_exponent`.
pub const DEFAULT_ALPHA_K: f64 = 0.8;

/// Number of most-recent history rows the residual learner trains on.
pub const DEFAULT_HISTORY_WINDOW: i64 = 50;

/// Number of attempts the feedback loop makes before giving up on an
/// optimistic-concurrency conflict.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ApeError {
    #[error("task '{0}' already exists")]
    AlreadyExists(String),

    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("concurrency conflict updating task '{0}'")]
    Stale(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ApeError>;

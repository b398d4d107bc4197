//! Adaptive Parallelism Estimator CLI.
//!
//! A thin front-end over [`ape::api`] for manual predict/feedback calls
//! against a running Postgres instance, useful for debugging a task's
//! learned parameters without wiring up the calling orchestrator.

use ape::api::{get_task_configs, report_success};
use ape::config::AppConfig;
use ape::estimator::Estimator;
use ape::residual::GaussianProcessResidual;
use ape::store::PgTaskStore;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ape")]
#[command(about = "Adaptive Parallelism Estimator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional TOML config file; falls back to built-in defaults and
    /// APE_* environment variables.
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask for a parallelism decision for a task run.
    Predict {
        /// Task identifier.
        task_name: String,
        /// Size of the input for this run.
        #[arg(long)]
        input_quantity: f64,
        /// Current cluster load metric.
        #[arg(long, default_value_t = 0.0)]
        cluster_load: f64,
        /// Maximum acceptable wall time in seconds.
        #[arg(long)]
        max_time_slo: Option<f64>,
    },

    /// Report the outcome of a completed run back into the model.
    Report {
        /// Task identifier.
        task_name: String,
        /// Degree of parallelism that was actually run.
        #[arg(long)]
        s: u32,
        /// Input scaling factor used for that run.
        #[arg(long)]
        gamma: f64,
        /// Cluster load metric at the time of the run.
        #[arg(long, default_value_t = 0.0)]
        cluster_load: f64,
        /// Measured wall time in seconds.
        #[arg(long)]
        total_duration: f64,
        /// Predicted Amdahl time from the `predict` call that chose `s`.
        #[arg(long, default_value_t = 0.0)]
        predicted_amdahl: f64,
        /// Predicted residual from the `predict` call that chose `s`.
        #[arg(long, default_value_t = 0.0)]
        predicted_residual: f64,
    },

    /// Create the `task_models` / `execution_history` tables if missing.
    InitSchema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let store = PgTaskStore::connect(&config.db.connection_string()).await?;

    match cli.command {
        Commands::InitSchema => {
            store.ensure_schema().await?;
            println!("schema ready");
        }

        Commands::Predict {
            task_name,
            input_quantity,
            cluster_load,
            max_time_slo,
        } => {
            let estimator: Estimator<PgTaskStore, GaussianProcessResidual> =
                Estimator::with_config(store, &config.estimator);
            let result = get_task_configs(&estimator, &task_name, input_quantity, cluster_load, max_time_slo).await?;
            println!("{}", serde_json::to_string_pretty(&result.configs)?);
            eprintln!(
                "s={} gamma={:.4} predicted_amdahl={:.4} predicted_residual={:.4}",
                result.s, result.gamma, result.predicted_amdahl, result.predicted_residual
            );
        }

        Commands::Report {
            task_name,
            s,
            gamma,
            cluster_load,
            total_duration,
            predicted_amdahl,
            predicted_residual,
        } => {
            let estimator: Estimator<PgTaskStore, GaussianProcessResidual> =
                Estimator::with_config(store, &config.estimator);
            report_success(
                &estimator,
                &task_name,
                s,
                gamma,
                cluster_load,
                Some(total_duration),
                None,
                predicted_amdahl,
                predicted_residual,
            )
            .await?;
            println!("feedback recorded for '{task_name}'");
        }
    }

    Ok(())
}

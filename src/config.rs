//! Application configuration.
//!
//! Loading hierarchy, matching this codebase's existing configuration
//! layering (`knhk-config`'s defaults -> file -> environment) and the
//! reference implementation's `Config` class: built-in defaults, then an
//! optional TOML file, then environment variables (`APE_*`), with env
//! always winning. A `.env` file is loaded opportunistically — a missing
//! file is not an error.

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration value: {0}")]
    Validation(String),
}

/// Database connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DbConfig {
    /// Builds a `postgres://` connection string from the parsed fields.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// Estimator-wide tunables with defaults matching the reference model.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimatorConfig {
    pub default_startup: f64,
    pub history_window: i64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub db: DbConfig,
    pub estimator: EstimatorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db: DbConfig {
                host: "localhost".to_string(),
                port: 5432,
                name: "ape_state".to_string(),
                user: "ape_user".to_string(),
                password: "ape_pass".to_string(),
            },
            estimator: EstimatorConfig {
                default_startup: crate::DEFAULT_STARTUP_SECONDS,
                history_window: crate::DEFAULT_HISTORY_WINDOW,
                max_retries: crate::DEFAULT_MAX_RETRIES,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// `APE_*` environment variable overrides on top. Never fails because
    /// the file is missing; only fails on a malformed file or on an
    /// override value that does not parse into the expected type.
    pub fn load(file_path: Option<&str>) -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();

        let defaults = AppConfig::default();

        let mut builder = config::Config::builder()
            .set_default("db.host", defaults.db.host.clone())?
            .set_default("db.port", defaults.db.port as i64)?
            .set_default("db.name", defaults.db.name.clone())?
            .set_default("db.user", defaults.db.user.clone())?
            .set_default("db.password", defaults.db.password.clone())?
            .set_default("estimator.default_startup", defaults.estimator.default_startup)?
            .set_default("estimator.history_window", defaults.estimator.history_window)?
            .set_default("estimator.max_retries", defaults.estimator.max_retries as i64)?;

        if let Some(path) = file_path {
            if std::path::Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("APE")
                .separator("_")
                .try_parsing(true),
        );

        let parsed: AppConfig = builder.build()?.try_deserialize()?;
        validate(&parsed)?;
        Ok(parsed)
    }
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.estimator.default_startup < 0.0 {
        return Err(ConfigError::Validation(
            "estimator.default_startup must be >= 0".to_string(),
        ));
    }

    if config.estimator.history_window <= 0 {
        return Err(ConfigError::Validation(
            "estimator.history_window must be > 0".to_string(),
        ));
    }

    if config.estimator.max_retries == 0 {
        return Err(ConfigError::Validation(
            "estimator.max_retries must be > 0".to_string(),
        ));
    }

    Ok(())
}

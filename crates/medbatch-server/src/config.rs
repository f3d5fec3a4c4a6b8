//! Configuration management

use medbatch_common::MedbatchError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/medbatch";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default staging directory for rendered artifacts awaiting upload.
pub const DEFAULT_STAGING_DIR: &str = "./staging";

/// Default name of the pipeline task queue.
pub const DEFAULT_PIPELINE_QUEUE: &str = "batch-pipeline";

/// Default number of concurrent pipeline workers.
pub const DEFAULT_PIPELINE_WORKERS: usize = 4;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Pipeline configuration (staging area and worker pool)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub staging_dir: PathBuf,
    pub queue: String,
    pub worker_concurrency: usize,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("MEDBATCH_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("MEDBATCH_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: std::env::var("MEDBATCH_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: std::env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: std::env::var("DATABASE_IDLE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            pipeline: PipelineConfig {
                staging_dir: std::env::var("STAGING_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_STAGING_DIR)),
                queue: std::env::var("PIPELINE_QUEUE")
                    .unwrap_or_else(|_| DEFAULT_PIPELINE_QUEUE.to_string()),
                worker_concurrency: std::env::var("PIPELINE_WORKERS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PIPELINE_WORKERS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), MedbatchError> {
        if self.server.host.trim().is_empty() {
            return Err(MedbatchError::config("server host must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(MedbatchError::config(
                "DATABASE_MAX_CONNECTIONS must be at least 1",
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(MedbatchError::config(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS",
            ));
        }
        if self.pipeline.worker_concurrency == 0 {
            return Err(MedbatchError::config("PIPELINE_WORKERS must be at least 1"));
        }
        if self.pipeline.queue.trim().is_empty() {
            return Err(MedbatchError::config("PIPELINE_QUEUE must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            pipeline: PipelineConfig {
                staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
                queue: DEFAULT_PIPELINE_QUEUE.to_string(),
                worker_concurrency: DEFAULT_PIPELINE_WORKERS,
            },
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = base_config();
        config.pipeline.worker_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_connections_must_not_exceed_max() {
        let mut config = base_config();
        config.database.min_connections = 50;
        assert!(config.validate().is_err());
    }
}

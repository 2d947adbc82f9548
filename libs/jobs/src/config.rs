//! Configuration for the job execution core
//!
//! Settings are layered from an optional `config` file and
//! `FERRUM_JOBS__*`-prefixed environment variables over serde defaults.

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub jobs: JobsConfig,
    pub export: ExportConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Primary connection string
    pub url: String,
    /// Optional read replica; read-only queue calls are routed here
    /// according to `replica_traffic_ratio`
    pub replica_url: Option<String>,
    pub max_connections: u32,
    /// Fraction of read-only calls routed to the replica, 0.0-1.0
    pub replica_traffic_ratio: f64,
    /// How long a ratio read from configuration stays cached
    pub replica_ratio_cache_seconds: u64,
    pub retry: RetryConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/fhir_jobs".to_string(),
            replica_url: None,
            max_connections: 10,
            replica_traffic_ratio: 0.0,
            replica_ratio_cache_seconds: 600,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_milliseconds: u64,
    /// Disables the built-in connection/handshake-failure predicate
    pub disable_connection_predicate: bool,
    /// Error codes added to the transient catalog for this deployment
    pub transient_error_codes_add: Vec<String>,
    /// Error codes removed from the built-in transient catalog
    pub transient_error_codes_remove: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_milliseconds: 250,
            disable_connection_predicate: false,
            transient_error_codes_add: Vec::new(),
            transient_error_codes_remove: Vec::new(),
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_milliseconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub polling_frequency_seconds: u64,
    pub max_running_job_count: usize,
    pub job_heartbeat_timeout_threshold_seconds: u64,
    pub job_heartbeat_interval_seconds: u64,
    /// Terminal jobs older than this are archived
    pub archive_retention_hours: u64,
    pub archive_interval_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            polling_frequency_seconds: 10,
            max_running_job_count: 5,
            job_heartbeat_timeout_threshold_seconds: 600,
            job_heartbeat_interval_seconds: 10,
            archive_retention_hours: 720,
            archive_interval_seconds: 3600,
        }
    }
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling_frequency_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.job_heartbeat_interval_seconds)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.job_heartbeat_timeout_threshold_seconds)
    }

    pub fn archive_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.archive_retention_hours as i64)
    }

    pub fn archive_interval(&self) -> Duration {
        Duration::from_secs(self.archive_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// How often the orchestrator re-reads its child group while waiting
    pub orchestrator_poll_seconds: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            orchestrator_poll_seconds: 10,
        }
    }
}

impl ExportConfig {
    pub fn orchestrator_poll_interval(&self) -> Duration {
        Duration::from_secs(self.orchestrator_poll_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: "127.0.0.1:9464".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional `config` file and
    /// `FERRUM_JOBS__*` environment variables.
    pub fn load() -> Result<Self> {
        let loader = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("FERRUM_JOBS").separator("__"))
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        loader
            .try_deserialize()
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.database.replica_traffic_ratio) {
            return Err(Error::Configuration(
                "database.replica_traffic_ratio must be within [0.0, 1.0]".to_string(),
            ));
        }
        if self.jobs.max_running_job_count == 0 {
            return Err(Error::Configuration(
                "jobs.max_running_job_count must be positive".to_string(),
            ));
        }
        if self.jobs.polling_frequency_seconds == 0 {
            return Err(Error::Configuration(
                "jobs.polling_frequency_seconds must be positive".to_string(),
            ));
        }
        if self.jobs.job_heartbeat_interval_seconds >= self.jobs.job_heartbeat_timeout_threshold_seconds {
            return Err(Error::Configuration(
                "jobs.job_heartbeat_interval_seconds must be below the timeout threshold"
                    .to_string(),
            ));
        }
        if self.export.orchestrator_poll_seconds == 0 {
            return Err(Error::Configuration(
                "export.orchestrator_poll_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

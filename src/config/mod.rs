//! Configuration loading for the fulfillment monitor.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `FULFILLMENT_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "FULFILLMENT_";

/// Application configuration derived from `FULFILLMENT_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Worker pool and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerConfig {
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Attempts before a job is dead-lettered, including the first one
    #[serde(default = "default_job_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_job_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_job_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_job_jitter_factor")]
    pub jitter_factor: f64,
    /// Retries on a full queue before `enqueue` gives up
    #[serde(default = "default_enqueue_retries")]
    pub enqueue_retries: u32,
}

/// Timer cadences for scheduled rule evaluation and the background sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScheduleConfig {
    #[serde(default = "default_hourly_interval_seconds")]
    pub hourly_interval_seconds: u64,
    #[serde(default = "default_daily_interval_seconds")]
    pub daily_interval_seconds: u64,
    #[serde(default = "default_escalation_interval_seconds")]
    pub escalation_interval_seconds: u64,
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
    /// Minimum age of an unprocessed event before the sweep re-enqueues it
    #[serde(default = "default_reconcile_grace_seconds")]
    pub reconcile_grace_seconds: u64,
}

/// Alert routing and outbound transport endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NotificationConfig {
    /// Used when a rule action lists no recipients
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalation_recipients: Vec<String>,
    #[serde(default = "default_escalation_threshold_hours")]
    pub escalation_threshold_hours: u64,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_api_token: Option<String>,
    #[serde(default = "default_transport_timeout_ms")]
    pub transport_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            worker: WorkerConfig::default(),
            schedule: ScheduleConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_job_max_attempts(),
            backoff_base_ms: default_job_backoff_base_ms(),
            backoff_max_ms: default_job_backoff_max_ms(),
            jitter_factor: default_job_jitter_factor(),
            enqueue_retries: default_enqueue_retries(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hourly_interval_seconds: default_hourly_interval_seconds(),
            daily_interval_seconds: default_daily_interval_seconds(),
            escalation_interval_seconds: default_escalation_interval_seconds(),
            reconcile_interval_seconds: default_reconcile_interval_seconds(),
            reconcile_grace_seconds: default_reconcile_grace_seconds(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_recipients: Vec::new(),
            escalation_recipients: Vec::new(),
            escalation_threshold_hours: default_escalation_threshold_hours(),
            email_from: default_email_from(),
            email_api_url: None,
            email_api_token: None,
            crm_api_url: None,
            crm_api_token: None,
            transport_timeout_ms: default_transport_timeout_ms(),
        }
    }
}

impl WorkerConfig {
    /// Validate worker pool bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidWorkerConcurrency {
                value: self.concurrency,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::InvalidBackoffRange {
                base: self.backoff_base_ms,
                max: self.backoff_max_ms,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitterFactor {
                value: self.jitter_factor,
            });
        }
        Ok(())
    }
}

impl ScheduleConfig {
    /// Every timer needs a positive interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("hourly", self.hourly_interval_seconds),
            ("daily", self.daily_interval_seconds),
            ("escalation", self.escalation_interval_seconds),
            ("reconcile", self.reconcile_interval_seconds),
        ];
        for (timer, seconds) in intervals {
            if seconds == 0 {
                return Err(ConfigError::InvalidScheduleInterval {
                    timer: timer.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn hourly_interval(&self) -> Duration {
        Duration::from_secs(self.hourly_interval_seconds)
    }

    pub fn daily_interval(&self) -> Duration {
        Duration::from_secs(self.daily_interval_seconds)
    }

    pub fn escalation_interval(&self) -> Duration {
        Duration::from_secs(self.escalation_interval_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn reconcile_grace(&self) -> Duration {
        Duration::from_secs(self.reconcile_grace_seconds)
    }
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.escalation_threshold_hours == 0 {
            return Err(ConfigError::InvalidEscalationThreshold);
        }
        for (field, value) in [
            ("EMAIL_API_URL", &self.email_api_url),
            ("CRM_API_URL", &self.crm_api_url),
        ] {
            if let Some(raw) = value
                && url::Url::parse(raw).is_err()
            {
                return Err(ConfigError::InvalidTransportUrl {
                    field: field.to_string(),
                    value: raw.clone(),
                });
            }
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Local and test profiles may run with log-only transports and no tokens.
    pub fn is_local_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.notifications.email_api_token.is_some() {
            config.notifications.email_api_token = Some("[REDACTED]".to_string());
        }
        if config.notifications.crm_api_token.is_some() {
            config.notifications.crm_api_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_local_profile() && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        self.worker.validate()?;
        self.schedule.validate()?;
        self.notifications.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/fulfillment".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_job_max_attempts() -> u32 {
    5
}

fn default_job_backoff_base_ms() -> u64 {
    500
}

fn default_job_backoff_max_ms() -> u64 {
    60_000 // 1 minute
}

fn default_job_jitter_factor() -> f64 {
    0.1
}

fn default_enqueue_retries() -> u32 {
    3
}

fn default_hourly_interval_seconds() -> u64 {
    3600
}

fn default_daily_interval_seconds() -> u64 {
    86400
}

fn default_escalation_interval_seconds() -> u64 {
    1800 // 30 minutes
}

fn default_reconcile_interval_seconds() -> u64 {
    300
}

fn default_reconcile_grace_seconds() -> u64 {
    120
}

fn default_escalation_threshold_hours() -> u64 {
    4
}

fn default_email_from() -> String {
    "alerts@fulfillment.local".to_string()
}

fn default_transport_timeout_ms() -> u64 {
    10_000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error(
        "no operator tokens configured; set FULFILLMENT_OPERATOR_TOKEN or FULFILLMENT_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("worker concurrency must be between 1 and 64, got {value}")]
    InvalidWorkerConcurrency { value: usize },
    #[error("queue capacity must be at least 1")]
    InvalidQueueCapacity,
    #[error("job max attempts must be at least 1")]
    InvalidMaxAttempts,
    #[error("job backoff base ({base}ms) cannot be greater than max ({max}ms)")]
    InvalidBackoffRange { base: u64, max: u64 },
    #[error("job jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidJitterFactor { value: f64 },
    #[error("{timer} interval must be positive")]
    InvalidScheduleInterval { timer: String },
    #[error("escalation threshold must be at least one hour")]
    InvalidEscalationThreshold,
    #[error("{field} is not a valid URL: {value}")]
    InvalidTransportUrl { field: String, value: String },
}

/// Loads configuration using layered `.env` files and `FULFILLMENT_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.{profile}`, `.env.{profile}.local`
    /// and finally the process environment, later layers winning.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Support both a single token and a comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = take_string(&mut layered, "OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let worker = WorkerConfig {
            concurrency: take_parsed(&mut layered, "WORKER_CONCURRENCY")
                .unwrap_or_else(default_worker_concurrency),
            queue_capacity: take_parsed(&mut layered, "QUEUE_CAPACITY")
                .unwrap_or_else(default_queue_capacity),
            max_attempts: take_parsed(&mut layered, "JOB_MAX_ATTEMPTS")
                .unwrap_or_else(default_job_max_attempts),
            backoff_base_ms: take_parsed(&mut layered, "JOB_BACKOFF_BASE_MS")
                .unwrap_or_else(default_job_backoff_base_ms),
            backoff_max_ms: take_parsed(&mut layered, "JOB_BACKOFF_MAX_MS")
                .unwrap_or_else(default_job_backoff_max_ms),
            jitter_factor: take_parsed(&mut layered, "JOB_JITTER_FACTOR")
                .unwrap_or_else(default_job_jitter_factor),
            enqueue_retries: take_parsed(&mut layered, "ENQUEUE_RETRIES")
                .unwrap_or_else(default_enqueue_retries),
        };

        let schedule = ScheduleConfig {
            hourly_interval_seconds: take_parsed(&mut layered, "SCHEDULE_HOURLY_SECONDS")
                .unwrap_or_else(default_hourly_interval_seconds),
            daily_interval_seconds: take_parsed(&mut layered, "SCHEDULE_DAILY_SECONDS")
                .unwrap_or_else(default_daily_interval_seconds),
            escalation_interval_seconds: take_parsed(&mut layered, "SCHEDULE_ESCALATION_SECONDS")
                .unwrap_or_else(default_escalation_interval_seconds),
            reconcile_interval_seconds: take_parsed(&mut layered, "SCHEDULE_RECONCILE_SECONDS")
                .unwrap_or_else(default_reconcile_interval_seconds),
            reconcile_grace_seconds: take_parsed(&mut layered, "RECONCILE_GRACE_SECONDS")
                .unwrap_or_else(default_reconcile_grace_seconds),
        };

        let notifications = NotificationConfig {
            default_recipients: layered
                .remove("ALERT_RECIPIENTS")
                .map(|list| split_list(&list))
                .unwrap_or_default(),
            escalation_recipients: layered
                .remove("ESCALATION_RECIPIENTS")
                .map(|list| split_list(&list))
                .unwrap_or_default(),
            escalation_threshold_hours: take_parsed(&mut layered, "ESCALATION_THRESHOLD_HOURS")
                .unwrap_or_else(default_escalation_threshold_hours),
            email_from: take_string(&mut layered, "EMAIL_FROM").unwrap_or_else(default_email_from),
            email_api_url: take_string(&mut layered, "EMAIL_API_URL"),
            email_api_token: take_string(&mut layered, "EMAIL_API_TOKEN"),
            crm_api_url: take_string(&mut layered, "CRM_API_URL"),
            crm_api_token: take_string(&mut layered, "CRM_API_TOKEN"),
            transport_timeout_ms: take_parsed(&mut layered, "TRANSPORT_TIMEOUT_MS")
                .unwrap_or_else(default_transport_timeout_ms),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            worker,
            schedule,
            notifications,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn take_parsed<T: std::str::FromStr>(layered: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    layered.remove(key).and_then(|value| value.trim().parse().ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

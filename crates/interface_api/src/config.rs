//! API configuration
//!
//! Read from `API_*` environment variables. Nested sections use a double
//! underscore, e.g. `API_WORKER__MAX_ATTEMPTS=5` or
//! `API_ACCOUNTING__BASE_URL=https://accounting.example.com`.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use domain_documents::adapters::{AccountingHttpConfig, MailRelayConfig};
use domain_documents::RetryPolicy;

/// API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// JWT secret for authentication
    pub jwt_secret: String,
    /// JWT expiration in seconds
    pub jwt_expiration_secs: u64,
    /// Database URL
    pub database_url: String,
    /// Log level
    pub log_level: String,
    pub worker: WorkerSettings,
    pub accounting: AccountingSettings,
    pub mail: MailSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expiration_secs: 3600,
            database_url: "postgres://localhost/settlement".to_string(),
            log_level: "info".to_string(),
            worker: WorkerSettings::default(),
            accounting: AccountingSettings::default(),
            mail: MailSettings::default(),
        }
    }
}

/// Document worker tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Runs the drain loop inside the API process
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Wake-up interval when nobody pokes the drainer
    pub sweep_interval_secs: u64,
    /// Age after which a `processing` claim counts as abandoned
    pub stale_after_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: domain_documents::MAX_ATTEMPTS,
            backoff_base_secs: 30,
            backoff_cap_secs: 3600,
            sweep_interval_secs: 60,
            stale_after_secs: 15 * 60,
        }
    }
}

impl WorkerSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// External accounting system
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountingSettings {
    pub base_url: String,
    pub access_token: String,
    pub timeout_secs: u64,
}

impl Default for AccountingSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            access_token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl AccountingSettings {
    pub fn http_config(&self) -> AccountingHttpConfig {
        AccountingHttpConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            access_token: self.access_token.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Mail relay; delivery is disabled while `relay_url` is unset
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub relay_url: Option<String>,
    pub from: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            relay_url: None,
            from: "billing@localhost".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl MailSettings {
    /// Relay configuration, `None` when mail is disabled
    pub fn relay_config(&self) -> Option<MailRelayConfig> {
        let relay_url = self.relay_url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        Some(MailRelayConfig {
            relay_url: relay_url.to_string(),
            from: self.from.clone(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

impl ApiConfig {
    /// Loads configuration from environment
    ///
    /// A plain `DATABASE_URL` is honoured when `API_DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(environment(), std::env::var("DATABASE_URL").ok())
    }

    fn load(source: Environment, database_url: Option<String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(url) = database_url {
            builder = builder.set_default("database_url", url)?;
        }
        builder.add_source(source).build()?.try_deserialize()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn environment() -> Environment {
    Environment::with_prefix("API")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

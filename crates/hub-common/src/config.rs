//! Recognized configuration options.

use serde::{Deserialize, Serialize};

use crate::entities::TopicLeaseDefaults;

/// Top level hub settings, loaded by `hub-server` from `config.toml` with
/// environment-variable overrides (see `hub-server::config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hub: HubConfig,
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub communication: CommunicationConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            server: ServerConfig::default(),
            worker: WorkerConfig::default(),
            communication: CommunicationConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where the HTTP surface listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_host: String,
    pub listen_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_owned(),
            listen_port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Externally visible hub URL (required).
    pub self_base_url: String,
    /// Accept publish for unknown topics.
    pub public_hub: bool,
    /// Enforce that a fetched topic still references this hub.
    pub strict_topic_hub_link: bool,
    /// Reject (vs warn) on secrets supplied over an insecure transport.
    pub strict_secrets: bool,
    /// Synchronously wake engines after queueing a request.
    pub process_immediately: bool,
    pub topic_lease_defaults: TopicLeaseDefaultsConfig,
    /// Claimant identity; defaults to an ephemeral UUID if unset.
    pub node_id: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            self_base_url: "http://localhost:3000/".to_owned(),
            public_hub: false,
            strict_topic_hub_link: true,
            strict_secrets: true,
            process_immediately: true,
            topic_lease_defaults: TopicLeaseDefaultsConfig::default(),
            node_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicLeaseDefaultsConfig {
    pub preferred: i64,
    pub min: i64,
    pub max: i64,
}

impl Default for TopicLeaseDefaultsConfig {
    fn default() -> Self {
        let d = TopicLeaseDefaults::default();
        Self {
            preferred: d.preferred,
            min: d.min,
            max: d.max,
        }
    }
}

impl From<TopicLeaseDefaultsConfig> for TopicLeaseDefaults {
    fn from(value: TopicLeaseDefaultsConfig) -> Self {
        Self {
            preferred: value.preferred,
            min: value.min,
            max: value.max,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub recurr_sleep_ms: u64,
    pub polling_enabled: bool,
    /// Upper bound of the startup stagger window, as a fraction of
    /// `recurr_sleep_ms`.
    pub startup_stagger_fraction: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            recurr_sleep_ms: 10_000,
            polling_enabled: true,
            startup_stagger_fraction: 0.618,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    pub retry_backoff_seconds: Vec<i64>,
    pub claim_timeout_seconds: i64,
    /// Per-request outbound HTTP timeout; must stay well below
    /// `claim_timeout_seconds`.
    pub request_timeout_seconds: u64,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            retry_backoff_seconds: vec![60, 300, 900, 3600, 14400, 86400],
            claim_timeout_seconds: 300,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or a libpq postgres connection string.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://websub-hub.sqlite3".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

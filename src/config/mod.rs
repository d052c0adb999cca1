//! Configuration
//!
//! TOML file with per-section defaults, `${VAR}` / `${VAR:-default}`
//! substitution inside the file, and an `EMBERMQ_`-prefixed environment
//! override layer (e.g. `EMBERMQ_SESSION__MAX_KEEP_ALIVE=300`). CLI flags
//! override file values in the entry point.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::broker::{BrokerConfig, TlsSettings};
use crate::codec::MAX_REMAINING_LENGTH;
use crate::session::EXPIRY_NEVER;

#[cfg(test)]
mod tests;

/// Substitute environment variables in the raw file content.
/// Supports `${VAR}` and `${VAR:-default}`.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("valid pattern");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading the config file
    Io(std::io::Error),
    /// Parse or merge error from the config layer
    Config(config::ConfigError),
    /// Semantically invalid configuration
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Config(e) => write!(f, "config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub session: SessionConfig,
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Plain TCP listen addresses
    pub listeners: Vec<SocketAddr>,
    /// TLS listen addresses (require the tls table)
    pub tls_listeners: Vec<SocketAddr>,
    /// TLS material
    pub tls: Option<ServerTlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: vec!["0.0.0.0:1883".parse().expect("valid default address")],
            tls_listeners: Vec::new(),
            tls: None,
        }
    }
}

/// TLS material paths
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerTlsConfig {
    /// Certificate chain (PEM)
    pub cert: String,
    /// Private key (PEM)
    pub key: String,
    /// Trust store for client certificates (PEM, optional)
    pub trust_store: Option<String>,
    /// Require a verified client certificate
    pub require_client_cert: bool,
}

/// Resource limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum accepted packet size in bytes
    pub max_packet_size: usize,
    /// Maximum in-flight QoS 1 messages per session
    pub max_inflight: u16,
    /// Maximum queued QoS 1 messages per session
    pub max_queued_qos1: usize,
    /// Maximum subscriptions per session
    pub max_subscriptions: usize,
    /// Per-connection write buffer cap in bytes
    pub max_write_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_packet_size: 1024 * 1024,
            max_inflight: 32,
            max_queued_qos1: 1024,
            max_subscriptions: 1024,
            max_write_buffer: 4 * 1024 * 1024,
        }
    }
}

/// Session and keep-alive parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cap on the client keep-alive in seconds (1..=600)
    pub max_keep_alive: u16,
    /// Cap on the session expiry interval in seconds
    pub expiry_cap: u32,
    /// Sweep interval for expired sessions in seconds
    pub expiry_check_interval: u64,
    /// Seconds a connection may take to send CONNECT
    pub connect_timeout: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_keep_alive: 600,
            expiry_cap: EXPIRY_NEVER,
            expiry_check_interval: 30,
            connect_timeout: 30,
        }
    }
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:9464".parse().expect("valid default address"),
        }
    }
}

impl Config {
    /// Load from a TOML file with env substitution and `EMBERMQ_*` overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse from TOML content
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(raw);

        let config: Config = config::Config::builder()
            .add_source(File::from_str(&substituted, FileFormat::Toml))
            .add_source(Environment::with_prefix("EMBERMQ").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond deserialization
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listeners.is_empty() && self.server.tls_listeners.is_empty() {
            return Err(ConfigError::Validation(
                "at least one listener is required".to_string(),
            ));
        }
        if !self.server.tls_listeners.is_empty() && self.server.tls.is_none() {
            return Err(ConfigError::Validation(
                "tls_listeners require a [server.tls] table".to_string(),
            ));
        }
        if self.session.max_keep_alive == 0 || self.session.max_keep_alive > 600 {
            return Err(ConfigError::Validation(
                "session.max_keep_alive must be between 1 and 600".to_string(),
            ));
        }
        if self.limits.max_packet_size == 0 || self.limits.max_packet_size > MAX_REMAINING_LENGTH {
            return Err(ConfigError::Validation(format!(
                "limits.max_packet_size must be between 1 and {}",
                MAX_REMAINING_LENGTH
            )));
        }
        if self.limits.max_inflight == 0 {
            return Err(ConfigError::Validation(
                "limits.max_inflight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve into the broker's runtime configuration
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            listeners: self.server.listeners.clone(),
            tls_listeners: self.server.tls_listeners.clone(),
            tls: self.server.tls.as_ref().map(|tls| TlsSettings {
                cert_path: tls.cert.clone(),
                key_path: tls.key.clone(),
                trust_store_path: tls.trust_store.clone(),
                require_client_cert: tls.require_client_cert,
            }),
            max_connections: self.limits.max_connections,
            max_packet_size: self.limits.max_packet_size,
            max_keep_alive: self.session.max_keep_alive,
            receive_maximum: 65535,
            session_expiry_cap: self.session.expiry_cap,
            session_expiry_check_interval: Duration::from_secs(self.session.expiry_check_interval),
            max_inflight: self.limits.max_inflight,
            max_queued_messages: self.limits.max_queued_qos1,
            max_subscriptions: self.limits.max_subscriptions,
            max_write_buffer: self.limits.max_write_buffer,
            connect_timeout: Duration::from_secs(self.session.connect_timeout),
        }
    }
}

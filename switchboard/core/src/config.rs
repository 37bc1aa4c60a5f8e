//! TOML Configuration File Support
//!
//! Settings for servers and clients, loaded from
//! `~/.config/switchboard/switchboard.toml` and the environment.
//!
//! # Configuration Priority
//!
//! Values are applied in the following order (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! Loaded settings are plain values (paths, milliseconds). [`ServerSettings::build`]
//! and [`ClientSettings::build`] turn them into runtime configs, reading key
//! and certificate files synchronously before any socket is opened.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! address = "unix:/run/user/1000/switchboard.sock"
//! timeout_ms = 30000          # 0 = none, negative = one-shot
//! payload_limit = 1048576     # 0 = unlimited
//! notify_capacity = 32
//! notify_level = "conn"
//! log_peer = true
//! key_file = "/etc/switchboard/shared.key"
//!
//! [client]
//! address = "127.0.0.1:7878"
//! timeout_ms = 10000
//! connect_timeout_ms = 5000
//! tls_ca = "/etc/switchboard/ca.pem"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::auth::{AuthError, AuthKey};
use crate::notify::DEFAULT_CAPACITY;
use crate::status::Severity;
use crate::tls::{self, ClientTls, TlsError};
use crate::transport::Endpoint;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Authentication key could not be loaded
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// TLS material could not be loaded
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Timeouts
// =============================================================================

/// Per-connection read timeout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely
    #[default]
    None,
    /// Close the connection when no complete frame arrives in time
    Idle(Duration),
    /// Serve exactly one request, reading with this deadline
    OneShot(Duration),
}

impl Timeout {
    /// Interpret signed milliseconds: 0 none, positive idle, negative one-shot
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        let magnitude = Duration::from_millis(ms.unsigned_abs());
        match ms {
            0 => Self::None,
            ms if ms > 0 => Self::Idle(magnitude),
            _ => Self::OneShot(magnitude),
        }
    }

    /// Signed millisecond form
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        let ms = |d: &Duration| i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        match self {
            Self::None => 0,
            Self::Idle(d) => ms(d),
            Self::OneShot(d) => -ms(d),
        }
    }

    /// Deadline for reading one frame
    #[must_use]
    pub fn read_deadline(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Idle(d) | Self::OneShot(d) => Some(*d),
        }
    }

    /// Whether the connection closes after one request
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::OneShot(_))
    }
}

// =============================================================================
// Runtime Configs
// =============================================================================

/// Everything a server needs to start
#[derive(Clone)]
pub struct ServerConfig {
    /// Listening address
    pub endpoint: Endpoint,
    /// Per-connection read timeout
    pub timeout: Timeout,
    /// Maximum request payload in bytes (0 = unlimited)
    pub payload_limit: u32,
    /// Notification channel capacity
    pub notify_capacity: usize,
    /// Minimum severity delivered on the notification channel
    pub notify_level: Severity,
    /// Include the peer address in connect notifications
    pub log_peer: bool,
    /// Shared frame authentication key
    pub key: Option<AuthKey>,
    /// TLS acceptor (TCP only)
    pub tls: Option<TlsAcceptor>,
}

impl ServerConfig {
    /// Defaults for an endpoint
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: Timeout::None,
            payload_limit: 0,
            notify_capacity: DEFAULT_CAPACITY,
            notify_level: Severity::Info,
            log_peer: false,
            key: None,
            tls: None,
        }
    }

    /// Set the per-connection timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the payload limit
    #[must_use]
    pub fn with_payload_limit(mut self, limit: u32) -> Self {
        self.payload_limit = limit;
        self
    }

    /// Set the notification threshold
    #[must_use]
    pub fn with_notify_level(mut self, level: Severity) -> Self {
        self.notify_level = level;
        self
    }

    /// Set the notification channel capacity
    #[must_use]
    pub fn with_notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity;
        self
    }

    /// Report peer addresses on connect
    #[must_use]
    pub fn with_log_peer(mut self, log_peer: bool) -> Self {
        self.log_peer = log_peer;
        self
    }

    /// Tag frames with a shared key
    #[must_use]
    pub fn with_key(mut self, key: AuthKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Serve TLS
    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero notification
    /// capacity or TLS on a Unix endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notify_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "notify_capacity must be greater than 0".to_string(),
            ));
        }
        if self.tls.is_some() && !self.endpoint.is_tcp() {
            return Err(ConfigError::ValidationError(format!(
                "TLS requires a TCP endpoint, got {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("payload_limit", &self.payload_limit)
            .field("notify_capacity", &self.notify_capacity)
            .field("notify_level", &self.notify_level)
            .field("log_peer", &self.log_peer)
            .field("key", &self.key)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Everything a client needs to connect
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server address
    pub endpoint: Endpoint,
    /// Read timeout for replies
    pub timeout: Timeout,
    /// Deadline for establishing the connection
    pub connect_timeout: Duration,
    /// Maximum reply payload in bytes (0 = unlimited)
    pub payload_limit: u32,
    /// Shared frame authentication key
    pub key: Option<AuthKey>,
    /// TLS settings (TCP only)
    pub tls: Option<ClientTls>,
}

impl ClientConfig {
    /// Defaults for an endpoint
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: Timeout::Idle(Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS)),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            payload_limit: 0,
            key: None,
            tls: None,
        }
    }

    /// Set the reply timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tag frames with a shared key
    #[must_use]
    pub fn with_key(mut self, key: AuthKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Connect over TLS
    #[must_use]
    pub fn with_tls(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }
}

const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listening address (`host:port`, `unix:PATH` or a path)
    pub address: Option<String>,
    /// Read timeout in milliseconds (0 = none, negative = one-shot)
    pub timeout_ms: Option<i64>,
    /// Maximum payload in bytes (0 = unlimited)
    pub payload_limit: Option<u32>,
    /// Notification channel capacity
    pub notify_capacity: Option<usize>,
    /// Minimum notification severity
    pub notify_level: Option<Severity>,
    /// Report peer addresses on connect
    pub log_peer: Option<bool>,
    /// Shared key file
    pub key_file: Option<PathBuf>,
    /// TLS certificate chain (PEM)
    pub tls_cert: Option<PathBuf>,
    /// TLS private key (PEM)
    pub tls_key: Option<PathBuf>,
}

/// Client section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Server address
    pub address: Option<String>,
    /// Reply timeout in milliseconds
    pub timeout_ms: Option<i64>,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Maximum reply payload in bytes
    pub payload_limit: Option<u32>,
    /// Shared key file
    pub key_file: Option<PathBuf>,
    /// CA certificates to trust (PEM); enables TLS
    pub tls_ca: Option<PathBuf>,
    /// Name expected on the server certificate
    pub tls_server_name: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardToml {
    /// Server section
    pub server: ServerToml,
    /// Client section
    pub client: ClientToml,
}

// =============================================================================
// Loaded Settings
// =============================================================================

/// Server settings as loaded from file and environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    /// Listening address
    pub address: String,
    /// Read timeout in signed milliseconds
    pub timeout_ms: i64,
    /// Maximum payload in bytes
    pub payload_limit: u32,
    /// Notification channel capacity
    pub notify_capacity: usize,
    /// Minimum notification severity
    pub notify_level: Severity,
    /// Report peer addresses on connect
    pub log_peer: bool,
    /// Shared key file
    pub key_file: Option<PathBuf>,
    /// TLS certificate chain
    pub tls_cert: Option<PathBuf>,
    /// TLS private key
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: Endpoint::default().to_string(),
            timeout_ms: 0,
            payload_limit: 0,
            notify_capacity: DEFAULT_CAPACITY,
            notify_level: Severity::Info,
            log_peer: false,
            key_file: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerSettings {
    /// Resolve into a runtime config, loading key and TLS files
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable address, unreadable key or
    /// certificate files, or an invalid combination of settings.
    pub fn build(&self) -> Result<ServerConfig, ConfigError> {
        let endpoint = parse_endpoint(&self.address)?;

        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(tls::server_acceptor(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(ConfigError::ValidationError(
                    "tls_cert and tls_key must be set together".to_string(),
                ))
            }
        };

        let config = ServerConfig {
            endpoint,
            timeout: Timeout::from_millis(self.timeout_ms),
            payload_limit: self.payload_limit,
            notify_capacity: self.notify_capacity,
            notify_level: self.notify_level,
            log_peer: self.log_peer,
            key: load_key(self.key_file.as_deref())?,
            tls,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Client settings as loaded from file and environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSettings {
    /// Server address
    pub address: String,
    /// Reply timeout in signed milliseconds
    pub timeout_ms: i64,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Maximum reply payload in bytes
    pub payload_limit: u32,
    /// Shared key file
    pub key_file: Option<PathBuf>,
    /// CA certificates to trust
    pub tls_ca: Option<PathBuf>,
    /// Name expected on the server certificate (defaults to the host)
    pub tls_server_name: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            address: Endpoint::default().to_string(),
            timeout_ms: i64::try_from(DEFAULT_CLIENT_TIMEOUT_SECS * 1000).unwrap_or(i64::MAX),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            payload_limit: 0,
            key_file: None,
            tls_ca: None,
            tls_server_name: None,
        }
    }
}

impl ClientSettings {
    /// Resolve into a runtime config, loading key and TLS files
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable address, unreadable files, or TLS
    /// requested for a Unix endpoint.
    pub fn build(&self) -> Result<ClientConfig, ConfigError> {
        let endpoint = parse_endpoint(&self.address)?;

        let tls = match (&self.tls_ca, &endpoint) {
            (None, _) => None,
            (Some(ca), Endpoint::Tcp(addr)) => {
                let name = self
                    .tls_server_name
                    .as_deref()
                    .unwrap_or_else(|| tls::host_of(addr));
                Some(ClientTls::new(ca, name)?)
            }
            (Some(_), Endpoint::Unix(_)) => {
                return Err(ConfigError::ValidationError(format!(
                    "TLS requires a TCP endpoint, got {endpoint}"
                )))
            }
        };

        Ok(ClientConfig {
            endpoint,
            timeout: Timeout::from_millis(self.timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            payload_limit: self.payload_limit,
            key: load_key(self.key_file.as_deref())?,
            tls,
        })
    }
}

fn parse_endpoint(address: &str) -> Result<Endpoint, ConfigError> {
    address.parse().map_err(ConfigError::ValidationError)
}

fn load_key(path: Option<&Path>) -> Result<Option<AuthKey>, ConfigError> {
    path.map(AuthKey::read_from_file)
        .transpose()
        .map_err(ConfigError::from)
}

/// Centralized configuration for servers and clients
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchboardConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Client settings
    pub client: ClientSettings,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            client: ClientSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SwitchboardConfig {
    /// Primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchboard/switchboard.toml` or
/// `~/.config/switchboard/switchboard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchboard").join("switchboard.toml"))
}

/// Load configuration from the default file and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<SwitchboardConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SwitchboardConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration using `env` to look up environment variables
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or an
/// environment variable holds an unparsable value.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<SwitchboardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SwitchboardConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SwitchboardToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut SwitchboardConfig, toml: &SwitchboardToml) {
    let server = &mut config.server;
    if let Some(address) = &toml.server.address {
        server.address.clone_from(address);
    }
    if let Some(ms) = toml.server.timeout_ms {
        server.timeout_ms = ms;
    }
    if let Some(limit) = toml.server.payload_limit {
        server.payload_limit = limit;
    }
    if let Some(capacity) = toml.server.notify_capacity {
        server.notify_capacity = capacity;
    }
    if let Some(level) = toml.server.notify_level {
        server.notify_level = level;
    }
    if let Some(log_peer) = toml.server.log_peer {
        server.log_peer = log_peer;
    }
    if toml.server.key_file.is_some() {
        server.key_file.clone_from(&toml.server.key_file);
    }
    if toml.server.tls_cert.is_some() {
        server.tls_cert.clone_from(&toml.server.tls_cert);
    }
    if toml.server.tls_key.is_some() {
        server.tls_key.clone_from(&toml.server.tls_key);
    }

    let client = &mut config.client;
    if let Some(address) = &toml.client.address {
        client.address.clone_from(address);
    }
    if let Some(ms) = toml.client.timeout_ms {
        client.timeout_ms = ms;
    }
    if let Some(ms) = toml.client.connect_timeout_ms {
        client.connect_timeout_ms = ms;
    }
    if let Some(limit) = toml.client.payload_limit {
        client.payload_limit = limit;
    }
    if toml.client.key_file.is_some() {
        client.key_file.clone_from(&toml.client.key_file);
    }
    if toml.client.tls_ca.is_some() {
        client.tls_ca.clone_from(&toml.client.tls_ca);
    }
    if toml.client.tls_server_name.is_some() {
        client.tls_server_name.clone_from(&toml.client.tls_server_name);
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{name}={value}: {e}")))
}

/// Apply environment variable overrides; address, timeout, payload limit and
/// key file apply to both sections
fn apply_env_config<F>(config: &mut SwitchboardConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(address) = env("SWITCHBOARD_ADDRESS") {
        config.server.address.clone_from(&address);
        config.client.address = address;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("SWITCHBOARD_TIMEOUT_MS") {
        let ms = parse_env::<i64>("SWITCHBOARD_TIMEOUT_MS", &value)?;
        config.server.timeout_ms = ms;
        config.client.timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("SWITCHBOARD_PAYLOAD_LIMIT") {
        let limit = parse_env::<u32>("SWITCHBOARD_PAYLOAD_LIMIT", &value)?;
        config.server.payload_limit = limit;
        config.client.payload_limit = limit;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("SWITCHBOARD_NOTIFY_CAPACITY") {
        config.server.notify_capacity = parse_env("SWITCHBOARD_NOTIFY_CAPACITY", &value)?;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("SWITCHBOARD_NOTIFY_LEVEL") {
        config.server.notify_level = parse_env("SWITCHBOARD_NOTIFY_LEVEL", &value)?;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("SWITCHBOARD_LOG_PEER") {
        config.server.log_peer = value != "0" && !value.eq_ignore_ascii_case("false");
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("SWITCHBOARD_KEY_FILE") {
        let path = PathBuf::from(path);
        config.server.key_file = Some(path.clone());
        config.client.key_file = Some(path);
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Address override (both sections)
    pub address: Option<String>,
    /// Timeout override in signed milliseconds (both sections)
    pub timeout_ms: Option<i64>,
    /// Payload limit override (both sections)
    pub payload_limit: Option<u32>,
    /// Notification threshold override
    pub notify_level: Option<Severity>,
    /// Peer logging override
    pub log_peer: Option<bool>,
    /// Key file override (both sections)
    pub key_file: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set address override
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set timeout override
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: i64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set payload limit override
    #[must_use]
    pub fn with_payload_limit(mut self, limit: u32) -> Self {
        self.payload_limit = Some(limit);
        self
    }

    /// Set notification threshold override
    #[must_use]
    pub fn with_notify_level(mut self, level: Severity) -> Self {
        self.notify_level = Some(level);
        self
    }

    /// Set peer logging override
    #[must_use]
    pub fn with_log_peer(mut self, log_peer: bool) -> Self {
        self.log_peer = Some(log_peer);
        self
    }

    /// Set key file override
    #[must_use]
    pub fn with_key_file(mut self, path: PathBuf) -> Self {
        self.key_file = Some(path);
        self
    }

    fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.timeout_ms.is_none()
            && self.payload_limit.is_none()
            && self.notify_level.is_none()
            && self.log_peer.is_none()
            && self.key_file.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut SwitchboardConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(address) = &self.address {
            config.server.address.clone_from(address);
            config.client.address.clone_from(address);
        }
        if let Some(ms) = self.timeout_ms {
            config.server.timeout_ms = ms;
            config.client.timeout_ms = ms;
        }
        if let Some(limit) = self.payload_limit {
            config.server.payload_limit = limit;
            config.client.payload_limit = limit;
        }
        if let Some(level) = self.notify_level {
            config.server.notify_level = level;
        }
        if let Some(log_peer) = self.log_peer {
            config.server.log_peer = log_peer;
        }
        if self.key_file.is_some() {
            config.server.key_file.clone_from(&self.key_file);
            config.client.key_file.clone_from(&self.key_file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.server.address, "127.0.0.1:7878");
        assert_eq!(config.server.notify_capacity, 32);
        assert_eq!(config.server.notify_level, Severity::Info);
        assert_eq!(config.client.timeout_ms, 30_000);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("switchboard/switchboard.toml"));
        }
    }

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(Timeout::from_millis(0), Timeout::None);
        assert_eq!(
            Timeout::from_millis(1500),
            Timeout::Idle(Duration::from_millis(1500))
        );
        let one_shot = Timeout::from_millis(-250);
        assert_eq!(one_shot, Timeout::OneShot(Duration::from_millis(250)));
        assert!(one_shot.is_one_shot());
        assert_eq!(one_shot.read_deadline(), Some(Duration::from_millis(250)));
        assert_eq!(one_shot.as_millis(), -250);
        assert_eq!(Timeout::None.read_deadline(), None);
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[server]
address = "unix:/tmp/sb.sock"
timeout_ms = -500
payload_limit = 10
notify_capacity = 8
notify_level = "error"
log_peer = true

[client]
address = "10.0.0.1:9000"
connect_timeout_ms = 250
"#,
        );

        let config =
            load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.server.address, "unix:/tmp/sb.sock");
        assert_eq!(config.server.timeout_ms, -500);
        assert_eq!(config.server.payload_limit, 10);
        assert_eq!(config.server.notify_capacity, 8);
        assert_eq!(config.server.notify_level, Severity::Error);
        assert!(config.server.log_peer);
        assert_eq!(config.client.address, "10.0.0.1:9000");
        assert_eq!(config.client.connect_timeout_ms, 250);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_parse_empty_toml() {
        let file = toml_file("");
        let config =
            load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.server, ServerSettings::default());
        assert_eq!(config.client, ClientSettings::default());
    }

    #[test]
    fn test_missing_file_graceful() {
        let config = load_config_with_env(
            Some(PathBuf::from("/nonexistent/switchboard.toml")),
            no_env,
        )
        .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file("[server\naddress = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file("[server]\naddress = \"127.0.0.1:1000\"\ntimeout_ms = 5000\n");
        let env = env_from(&[
            ("SWITCHBOARD_ADDRESS", "unix:/tmp/env.sock"),
            ("SWITCHBOARD_TIMEOUT_MS", "-100"),
            ("SWITCHBOARD_NOTIFY_LEVEL", "fatal"),
            ("SWITCHBOARD_LOG_PEER", "true"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.server.address, "unix:/tmp/env.sock");
        assert_eq!(config.client.address, "unix:/tmp/env.sock");
        assert_eq!(config.server.timeout_ms, -100);
        assert_eq!(config.server.notify_level, Severity::Fatal);
        assert!(config.server.log_peer);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_bad_env_value_is_error() {
        let env = env_from(&[("SWITCHBOARD_PAYLOAD_LIMIT", "lots")]);
        let result = load_config_with_env(None, env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_from(&[("SWITCHBOARD_PAYLOAD_LIMIT", "100")]);
        let mut config = load_config_with_env(None, env).unwrap();

        ConfigOverrides::new()
            .with_payload_limit(10)
            .with_notify_level(Severity::Conn)
            .apply(&mut config);

        assert_eq!(config.server.payload_limit, 10);
        assert_eq!(config.client.payload_limit, 10);
        assert_eq!(config.server.notify_level, Severity::Conn);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = SwitchboardConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config, SwitchboardConfig::default());
    }

    #[test]
    fn test_build_server_config() {
        let settings = ServerSettings {
            address: "unix:/tmp/sb.sock".to_string(),
            timeout_ms: -1000,
            ..ServerSettings::default()
        };
        let config = settings.build().unwrap();
        assert_eq!(config.endpoint, Endpoint::Unix(PathBuf::from("/tmp/sb.sock")));
        assert_eq!(config.timeout, Timeout::OneShot(Duration::from_secs(1)));
        assert!(config.key.is_none());
    }

    #[test]
    fn test_build_loads_key_file() {
        let key_file = toml_file("  shared-secret \n");
        let settings = ServerSettings {
            key_file: Some(key_file.path().to_path_buf()),
            ..ServerSettings::default()
        };
        let config = settings.build().unwrap();
        let expected = AuthKey::new("shared-secret").unwrap();
        assert_eq!(config.key.unwrap().tag(b"x"), expected.tag(b"x"));
    }

    #[test]
    fn test_build_rejects_invalid() {
        let zero_capacity = ServerSettings {
            notify_capacity: 0,
            ..ServerSettings::default()
        };
        assert!(matches!(
            zero_capacity.build(),
            Err(ConfigError::ValidationError(_))
        ));

        let half_tls = ServerSettings {
            tls_cert: Some(PathBuf::from("cert.pem")),
            ..ServerSettings::default()
        };
        assert!(matches!(half_tls.build(), Err(ConfigError::ValidationError(_))));

        let unix_tls = ClientSettings {
            address: "unix:/tmp/sb.sock".to_string(),
            tls_ca: Some(PathBuf::from("ca.pem")),
            ..ClientSettings::default()
        };
        assert!(matches!(unix_tls.build(), Err(ConfigError::ValidationError(_))));

        let bad_address = ClientSettings {
            address: "nowhere".to_string(),
            ..ClientSettings::default()
        };
        assert!(matches!(
            bad_address.build(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}

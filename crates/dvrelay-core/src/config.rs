//! Process configuration for the relay client and relay server.
//!
//! Both structs deserialize from JSON (camelCase aliases accepted) with every
//! field defaulted, so a config file only needs the values it overrides. The
//! binaries layer command-line flags on top and call `validate()` once at
//! startup; components receive the validated value in their constructors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::{Channel, MAX_CHANNELS};

// MARK: - BackoffPolicy

/// Exponential backoff parameters for one supervised connection.
///
/// Jitter is intentionally absent: delays follow `min * factor^k`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(alias = "minMs")]
    pub min_ms: u64,
    #[serde(alias = "maxMs")]
    pub max_ms: u64,
    pub factor: f64,
}

impl BackoffPolicy {
    /// Policy for the DVR leg: 100ms doubling up to 30s.
    pub const DVR: Self = Self { min_ms: 100, max_ms: 30_000, factor: 2.0 };

    /// Policy for the relay leg: 100ms doubling up to 5 minutes.
    pub const RELAY: Self = Self { min_ms: 100, max_ms: 300_000, factor: 2.0 };

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn validate(&self, leg: &str) -> Result<(), ConfigError> {
        if self.min_ms == 0 {
            return Err(ConfigError::invalid(format!("{leg} backoff min must be > 0")));
        }
        if self.max_ms < self.min_ms {
            return Err(ConfigError::invalid(format!("{leg} backoff max is below min")));
        }
        if !(self.factor >= 1.0 && self.factor.is_finite()) {
            return Err(ConfigError::invalid(format!("{leg} backoff factor must be >= 1")));
        }
        Ok(())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::DVR
    }
}

// MARK: - ClientConfig

/// PEM files used by the client for the TLS leg to the relay server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTlsPaths {
    #[serde(alias = "clientCert")]
    pub client_cert: PathBuf,
    #[serde(alias = "clientKey")]
    pub client_key: PathBuf,
    /// The relay server's certificate; the client pins it.
    #[serde(alias = "serverCert")]
    pub server_cert: PathBuf,
}

/// Relay client configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// DVR address, `host:port`.
    pub source: String,
    /// Relay server address, `host:port`.
    pub dest: String,
    /// Name presented for SNI. Defaults to the host part of `dest`.
    #[serde(alias = "serverName")]
    pub server_name: Option<String>,
    pub user: String,
    pub pass: String,
    /// Passphrase shared with the relay server.
    pub key: String,
    pub channels: Vec<Channel>,
    pub tls: ClientTlsPaths,
    #[serde(alias = "ioTimeoutMs")]
    pub io_timeout_ms: u64,
    #[serde(alias = "dvrBackoff")]
    pub dvr_backoff: BackoffPolicy,
    #[serde(alias = "relayBackoff")]
    pub relay_backoff: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            dest: String::new(),
            server_name: None,
            user: String::new(),
            pass: String::new(),
            key: String::new(),
            channels: Vec::new(),
            tls: ClientTlsPaths::default(),
            io_timeout_ms: crate::DEFAULT_IO_TIMEOUT.as_millis() as u64,
            dvr_backoff: BackoffPolicy::DVR,
            relay_backoff: BackoffPolicy::RELAY,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("server_name", &self.server_name)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("key", &"<redacted>")
            .field("channels", &self.channels)
            .field("tls", &self.tls)
            .field("io_timeout_ms", &self.io_timeout_ms)
            .field("dvr_backoff", &self.dvr_backoff)
            .field("relay_backoff", &self.relay_backoff)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// SNI name for the relay server.
    pub fn server_name(&self) -> String {
        if let Some(name) = &self.server_name {
            return name.clone();
        }
        host_part(&self.dest).to_owned()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.is_empty() {
            return Err(ConfigError::invalid("DVR source address is required"));
        }
        if self.dest.is_empty() {
            return Err(ConfigError::invalid("relay destination address is required"));
        }
        if self.user.is_empty() || self.pass.is_empty() {
            return Err(ConfigError::invalid("DVR user and password are required"));
        }
        if self.key.is_empty() {
            return Err(ConfigError::invalid("relay passphrase is required"));
        }
        if self.channels.is_empty() {
            return Err(ConfigError::invalid("at least one channel is required"));
        }
        if self.channels.len() > MAX_CHANNELS as usize {
            return Err(ConfigError::invalid(format!(
                "at most {} channels can be streamed",
                MAX_CHANNELS
            )));
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if self.channels[..i].contains(channel) {
                return Err(ConfigError::invalid(format!("channel {} listed twice", channel)));
            }
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::invalid("I/O timeout must be > 0"));
        }
        self.dvr_backoff.validate("DVR")?;
        self.relay_backoff.validate("relay")?;
        Ok(())
    }
}

// MARK: - ServerConfig

/// PEM files presented by the relay server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Relay server configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    pub bind: String,
    /// Passphrase clients must present.
    pub key: String,
    pub tls: ServerTlsPaths,
    /// Directory the disk consumer writes recordings into.
    #[serde(alias = "storageDir")]
    pub storage_dir: PathBuf,
    /// Capacity of the consumer intake queue, in records.
    #[serde(alias = "queueCapacity")]
    pub queue_capacity: usize,
    /// How long a session waits for consumer queue space before dropping a frame.
    #[serde(alias = "offerTimeoutMs")]
    pub offer_timeout_ms: u64,
    /// A session that receives nothing for this long is closed.
    #[serde(alias = "idleTimeoutMs")]
    pub idle_timeout_ms: u64,
    #[serde(alias = "tlsHandshakeTimeoutMs")]
    pub tls_handshake_timeout_ms: u64,
    /// Failed handshake lines tolerated per connection. `0` means unlimited.
    #[serde(alias = "maxHandshakeAttempts")]
    pub max_handshake_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:4000".to_owned(),
            key: String::new(),
            tls: ServerTlsPaths::default(),
            storage_dir: PathBuf::from("."),
            queue_capacity: 1024,
            offer_timeout_ms: crate::DEFAULT_IO_TIMEOUT.as_millis() as u64,
            idle_timeout_ms: 30_000,
            tls_handshake_timeout_ms: 10_000,
            max_handshake_attempts: 5,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("key", &"<redacted>")
            .field("tls", &self.tls)
            .field("storage_dir", &self.storage_dir)
            .field("queue_capacity", &self.queue_capacity)
            .field("offer_timeout_ms", &self.offer_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("tls_handshake_timeout_ms", &self.tls_handshake_timeout_ms)
            .field("max_handshake_attempts", &self.max_handshake_attempts)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout_ms)
    }

    /// `None` when handshake retries are unlimited.
    pub fn handshake_attempt_limit(&self) -> Option<u32> {
        (self.max_handshake_attempts > 0).then_some(self.max_handshake_attempts)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.is_empty() {
            return Err(ConfigError::invalid("bind address is required"));
        }
        if self.key.is_empty() {
            return Err(ConfigError::invalid("server passphrase is required"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue capacity must be > 0"));
        }
        if self.idle_timeout_ms == 0 || self.tls_handshake_timeout_ms == 0 {
            return Err(ConfigError::invalid("timeouts must be > 0"));
        }
        Ok(())
    }
}

/// `"host:port"` → `"host"`, handling bracketed IPv6 literals.
fn host_part(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, _)) => host,
        None => addr,
    }
}

//! Configuration for the RelayMesh agent.
//!
//! Two layers live here: [`ConnectConfig`], the immutable per-connect
//! request built by callers, and [`AgentConfig`], the TOML sidecar
//! configuration loaded from `~/.config/relaymesh/config.toml` by the
//! `relaymesh-agent` binary.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::wire::{ApiKeyScope, HandshakeRequest, DEFAULT_RECEIVE_LIMIT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("agent_name must not be empty")]
    MissingAgentName,

    #[error("either channel_id or (channel_name, channel_password) must be supplied")]
    MissingChannel,

    #[error("receive_limit must be between 1 and 500, got {0}")]
    InvalidReceiveLimit(u32),

    #[error("broker url must start with http:// or https://, got {0}")]
    InvalidBrokerUrl(String),

    #[error("control bind address is not valid: {0}")]
    InvalidControlAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Per-connect configuration
// ---------------------------------------------------------------------------

/// Immutable request describing one channel join.
///
/// Either `channel_id` or the `(channel_name, channel_password)` pair
/// must be supplied. An agent connecting with only a channel id does
/// not hold the channel secret and relies on the in-band password
/// handshake to obtain the credentials from an existing member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    pub channel_name: Option<String>,
    pub channel_password: Option<String>,
    pub channel_id: Option<String>,
    pub agent_name: String,
    /// Resume token from a previous session.
    pub session_id: Option<String>,
    pub api_key_scope: ApiKeyScope,
    pub enable_webrtc_relay: bool,
    /// Look up a persisted session id when none was supplied.
    pub check_last_session: bool,
    /// Receive batch size; the broker may cap it.
    pub receive_limit: u32,
}

impl ConnectConfig {
    /// Creates a configuration for the named agent with defaults.
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            channel_name: None,
            channel_password: None,
            channel_id: None,
            agent_name: agent_name.into(),
            session_id: None,
            api_key_scope: ApiKeyScope::Public,
            enable_webrtc_relay: false,
            check_last_session: false,
            receive_limit: DEFAULT_RECEIVE_LIMIT,
        }
    }

    /// Joins by channel name and password.
    pub fn with_channel(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.channel_name = Some(name.into());
        self.channel_password = Some(password.into());
        self
    }

    /// Joins by opaque channel id (credentials obtained via the
    /// password handshake).
    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Resumes a known session.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the API key scope presented at handshake.
    pub fn with_api_key_scope(mut self, scope: ApiKeyScope) -> Self {
        self.api_key_scope = scope;
        self
    }

    /// Enables the WebRTC relay / low-latency datagram path.
    pub fn with_webrtc_relay(mut self, enable: bool) -> Self {
        self.enable_webrtc_relay = enable;
        self
    }

    /// Loads a persisted session id at connect when none is set.
    pub fn with_check_last_session(mut self, check: bool) -> Self {
        self.check_last_session = check;
        self
    }

    /// Overrides the receive batch size.
    pub fn with_receive_limit(mut self, limit: u32) -> Self {
        self.receive_limit = limit;
        self
    }

    /// Validates the configuration. Called at connect entry, never
    /// after.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.agent_name.trim().is_empty() {
            return Err(ConfigError::MissingAgentName);
        }
        let has_pair = self.channel_name.is_some() && self.channel_password.is_some();
        if self.channel_id.is_none() && !has_pair {
            return Err(ConfigError::MissingChannel);
        }
        if self.receive_limit == 0 || self.receive_limit > 500 {
            return Err(ConfigError::InvalidReceiveLimit(self.receive_limit));
        }
        Ok(())
    }

    /// The key under which a session id for this channel is persisted:
    /// the channel id when known, otherwise the channel name.
    pub fn session_store_key(&self) -> Option<&str> {
        self.channel_id
            .as_deref()
            .or(self.channel_name.as_deref())
    }

    /// Builds the broker handshake request, with `session_id` already
    /// resolved against the session store.
    pub(crate) fn to_handshake_request(&self, session_id: Option<String>) -> HandshakeRequest {
        HandshakeRequest {
            channel_name: self.channel_name.clone(),
            channel_password: self.channel_password.clone(),
            channel_id: self.channel_id.clone(),
            agent_name: self.agent_name.clone(),
            session_id,
            enable_webrtc_relay: self.enable_webrtc_relay,
            api_key_scope: self.api_key_scope,
        }
    }
}

// ---------------------------------------------------------------------------
// Sidecar configuration file
// ---------------------------------------------------------------------------

/// Main configuration structure for the sidecar binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Broker endpoints and request deadlines.
    pub broker: BrokerConfig,

    /// Local control surface settings.
    pub control: ControlConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the broker control path.
    pub url: String,

    /// Deadline for side-effecting requests, in seconds.
    pub request_timeout_secs: u64,

    /// Deadline for long-poll receive requests, in seconds.
    pub receive_timeout_secs: u64,

    /// Address of the broker datagram endpoint, when the low-latency
    /// path is wanted.
    pub datagram_addr: Option<String>,

    /// Developer API key sent with every request.
    pub api_key: Option<String>,
}

/// Local control surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Bind address for the line-delimited JSON endpoint. Loopback
    /// only; there is no authentication beyond the socket.
    pub bind_addr: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for rotated log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "https://broker.relaymesh.dev".to_string(),
            request_timeout_secs: 10,
            receive_timeout_secs: 40,
            datagram_addr: None,
            api_key: None,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7340".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaymesh")
        .join("config.toml")
}

impl AgentConfig {
    /// Loads configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {:?}", path))?;
        let config: AgentConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Loads from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves the configuration to the given path, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {:?}", parent))?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Applies environment variable overrides:
    /// `RELAYMESH_BROKER_URL`, `RELAYMESH_CONTROL_ADDR`,
    /// `RELAYMESH_LOG_LEVEL`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("RELAYMESH_BROKER_URL") {
            self.broker.url = url;
        }
        if let Ok(addr) = std::env::var("RELAYMESH_CONTROL_ADDR") {
            self.control.bind_addr = addr;
        }
        if let Ok(level) = std::env::var("RELAYMESH_LOG_LEVEL") {
            self.logging.log_level = level;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.broker.url.starts_with("http://") && !self.broker.url.starts_with("https://") {
            return Err(ConfigError::InvalidBrokerUrl(self.broker.url.clone()));
        }
        self.control
            .bind_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidControlAddr(self.control.bind_addr.clone()))?;
        if !VALID_LOG_LEVELS.contains(&self.logging.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }
        Ok(())
    }
}

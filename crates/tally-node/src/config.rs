//! TOML-based configuration for the node.
//!
//! The node reads `tally.toml` (or the path in `TALLY_CONFIG`) at startup.
//! Fields annotated with `#[serde(default = "...")]` fall back to their
//! defaults when absent, so the node works on first run before a config
//! file exists and when upgrading from an older file missing newer fields.
//!
//! ```toml
//! [node]
//! party_id = "party-a"
//! cadre_peer_addrs = ["10.0.0.1:4040"]
//!
//! [network]
//! bind_address = "0.0.0.0"
//! listen_port = 25250
//!
//! [session]
//! step_timeout_ms = 5000
//! session_timeout_ms = 30000
//! max_concurrent_sessions = 64
//! idempotency_ttl_secs = 600
//!
//! [[tokens]]
//! token = "stock-token"
//! role = "stock"
//! expires_at_ms = 1924992000000
//! single_use = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub session: SessionSettings,
    /// Tokens the headless binary's static policy accepts.
    #[serde(default)]
    pub tokens: Vec<TokenConfigEntry>,
}

/// Identity and cadre settings for this node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSettings {
    /// Party identifier disclosed to approved counterparties.
    #[serde(default = "default_party_id")]
    pub party_id: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Peer addresses this node nominates to host the shared resource.
    /// Disclosed only after validation succeeds.
    #[serde(default)]
    pub cadre_peer_addrs: Vec<String>,
}

/// Listener bind settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// IP address to bind the handshake listener to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port for inbound handshake connections.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

/// Deadlines and limits for handshake sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    /// Deadline for a single step: one read, one write, or one policy hook.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// Deadline for a whole session.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Inbound sessions beyond this are rejected, never queued.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Lifetime of idempotency-cache entries.
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,
}

/// One token accepted by the headless binary's static policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenConfigEntry {
    pub token: String,
    /// Builder role for handshakes under this token: `"stock"` (the
    /// listener provisions) or `"foil"` (the dialer provisions).
    pub role: String,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
    /// Whether the token is spent on first successful validation.
    #[serde(default)]
    pub single_use: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_party_id() -> String {
    "tally-node".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    25250
}
fn default_step_timeout_ms() -> u64 {
    5_000
}
fn default_session_timeout_ms() -> u64 {
    30_000
}
fn default_max_concurrent_sessions() -> usize {
    64
}
fn default_idempotency_ttl_secs() -> u64 {
    600
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            party_id: default_party_id(),
            log_level: default_log_level(),
            cadre_peer_addrs: Vec::new(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            listen_port: default_listen_port(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
        }
    }
}

// ── Runtime session config ────────────────────────────────────────────────────

/// Deadlines and limits in runtime form, handed to the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub step_timeout: Duration,
    pub session_timeout: Duration,
    pub max_concurrent_sessions: usize,
    pub idempotency_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(s: &SessionSettings) -> Self {
        Self {
            step_timeout: Duration::from_millis(s.step_timeout_ms),
            session_timeout: Duration::from_millis(s.session_timeout_ms),
            max_concurrent_sessions: s.max_concurrent_sessions,
            idempotency_ttl: Duration::from_secs(s.idempotency_ttl_secs),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `NodeConfig` from `path`, returning `NodeConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<NodeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: NodeConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &NodeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Configuration types for the avatar session runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a session orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Gateway connection settings.
    pub gateway: GatewayConfig,
    /// Limits applied to unauthenticated callers.
    pub guest: GuestConfig,
    /// UX safety timeouts.
    pub timeouts: TimeoutConfig,
    /// Sentence synthesis settings.
    pub tts: TtsConfig,
    /// Billing round trip settings.
    pub billing: BillingConfig,
    /// Local message list settings.
    pub history: HistoryConfig,
    /// Local persisted storage settings.
    pub storage: StorageConfig,
    /// Diagnostic logging settings.
    pub logging: LoggingConfig,
    /// Runtime event broadcast settings.
    pub events: EventConfig,
}

/// Gateway connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway endpoint URL.
    pub url: String,
    /// Agent identifier sent when resolving sessions.
    pub agent_id: String,
    /// Client name reported during the handshake.
    pub client_name: String,
    /// How long a single connect attempt may take.
    pub connect_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_owned(),
            agent_id: "main".to_owned(),
            client_name: "avatar-session".to_owned(),
            connect_timeout_ms: 15_000,
        }
    }
}

impl GatewayConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Guest (unauthenticated) policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Messages a guest may send before the paywall opens.
    pub message_limit: u32,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self { message_limit: 5 }
    }
}

/// Safety timeouts guarding UI state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on the "sending" flag after a send is initiated.
    pub sending_timeout_ms: u64,
    /// Inactivity window after which a waiting AI state is force-reset.
    pub watchdog_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            sending_timeout_ms: 10_000,
            watchdog_timeout_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    /// Sending safety timeout as a [`Duration`].
    #[must_use]
    pub fn sending_timeout(&self) -> Duration {
        Duration::from_millis(self.sending_timeout_ms)
    }

    /// Watchdog window as a [`Duration`].
    #[must_use]
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

/// Sentence synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Whether streamed responses are synthesized at all.
    pub enabled: bool,
    /// Sentences with fewer characters than this are never synthesized.
    pub min_sentence_chars: usize,
    /// Synthesize the unterminated tail of a response when it completes.
    pub flush_trailing_fragment: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_sentence_chars: 2,
            flush_trailing_fragment: true,
        }
    }
}

/// Billing round trip configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Whether authenticated sends are gated by a billing check.
    pub enabled: bool,
    /// Check-and-deduct endpoint (used by the HTTP billing client).
    pub endpoint: Option<String>,
    /// Request timeout for the billing round trip.
    pub request_timeout_ms: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            request_timeout_ms: 5_000,
        }
    }
}

/// Local message list configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum messages kept in the local list.
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_messages: 500 }
    }
}

/// Local persisted storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the data directory (None = platform default).
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the directory used for persisted local state.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("avatar-session")
    }
}

/// Diagnostic logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
    /// Also write logs to a daily-rotated file.
    pub file_logging: bool,
    /// Directory for log files (None = `<data dir>/logs`).
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "avatar_session=info".to_owned(),
            file_logging: false,
            log_dir: None,
        }
    }
}

/// Runtime event broadcast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Capacity of the runtime event broadcast channel.
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SessionError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SessionError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/avatar-session/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config)
                .join("avatar-session")
                .join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("avatar-session")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/avatar-session-config/config.toml")
        }
    }
}

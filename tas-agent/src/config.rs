//! Configuration for the TAS agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tas_core::MemoryRegionDescriptor;
use tas_core::session::SessionConfig;
use tas_core::transport::TransportConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Connection to the editor.
    pub network: NetworkConfig,
    /// The game process being driven.
    pub target: TargetConfig,
    /// Parameters consumed once per editor session.
    pub session: SessionSettings,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Editor address, `host:port`.
    pub editor_address: String,
    pub connect_timeout_ms: u64,
    /// Receive timeout; outgoing messages are flushed at this cadence.
    pub receive_timeout_ms: u64,
    /// Pause before reconnecting after a disconnect.
    pub reconnect_delay_ms: u64,
    /// Malformed frames in a row before the link is declared out of sync.
    pub max_consecutive_malformed: u32,
}

/// Which debug backend drives the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Simulated,
    Windows,
}

/// Target process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub process_id: u64,
    pub backend: BackendKind,
    /// Extra attempts for a short memory read.
    pub read_retries: u32,
    /// Address of the controller input block (Windows backend).
    pub input_address: u64,
    pub game_name: String,
    pub user_nickname: String,
}

/// Session parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub project_name: String,
    pub player_count: u8,
    pub circle_lock: bool,
    /// Sleep between idle control-loop iterations.
    pub poll_interval_ms: u64,
    pub regions: Vec<MemoryRegionDescriptor>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            editor_address: "127.0.0.1:6000".into(),
            connect_timeout_ms: 5000,
            receive_timeout_ms: 20,
            reconnect_delay_ms: 1000,
            max_consecutive_malformed: 8,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            process_id: 0,
            backend: BackendKind::Simulated,
            read_retries: tas_core::debug::DEFAULT_READ_RETRIES,
            input_address: 0,
            game_name: String::new(),
            user_nickname: String::new(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            player_count: 1,
            circle_lock: false,
            poll_interval_ms: 1,
            regions: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms.max(1)),
            receive_timeout: Duration::from_millis(self.network.receive_timeout_ms.max(1)),
            max_consecutive_malformed: self.network.max_consecutive_malformed.max(1),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            project_name: self.session.project_name.clone(),
            player_count: self.session.player_count,
            circle_lock: self.session.circle_lock,
            regions: self.session.regions.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.network.reconnect_delay_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Editor configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tas_core::MemoryRegionDescriptor;

/// Top-level configuration for the editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Project settings.
    pub project: ProjectConfig,
    /// Physical joystick mapping.
    pub input: InputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the agent connects to.
    pub listen_address: String,
}

/// Project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project directory; region files go under `applicationMemory/`.
    pub directory: PathBuf,
    pub name: String,
    /// Regions the agent captures, so their files can be laid out.
    pub regions: Vec<MemoryRegionDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// `target:source` pairs, e.g. `A:b1,LSX:a0+,DUP:h0.1`.
    pub mapping: String,
}

/// Logging.
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
            listen_address: "0.0.0.0:6000".into(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("tas-project"),
            name: "untitled".into(),
            regions: Vec::new(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            mapping: "A:b1,B:b2,X:b3,Y:b4,L:b5,R:b6,ZL:b7,ZR:b8,PLUS:b10,MINUS:b9,\
                      DUP:h0.1,DRIGHT:h0.2,DDOWN:h0.4,DLEFT:h0.8,LSX:a0+,LSY:a1-,RSX:a2+,RSY:a3-"
                .into(),
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

impl EditorConfig {
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
}

// ── Tests ────────────────────────────────────────────────────────

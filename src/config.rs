use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from resultsmith.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ParserConfig {
    pub validation: ValidationConfig,
    pub monitor: MonitorConfig,
    pub extra_data: ExtraDataConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Elapsed-time measurements shorter than this are discarded.
    pub minimal_test_time_secs: f64,
}

/// Backing store for the sample channel shared with sensor workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Memory,
    /// Legacy: a `.monitor` temp file in the test install directory.
    File,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub channel: ChannelKind,
    /// How long drain waits for a cancelled worker before reading its channel anyway.
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExtraDataConfig {
    /// Auxiliary frame-time series shorter than this are not reported.
    pub min_frame_samples: usize,
}

// --- Default implementations ---

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            minimal_test_time_secs: 3.0,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::Memory,
            drain_timeout_ms: 2000,
        }
    }
}

impl Default for ExtraDataConfig {
    fn default() -> Self {
        Self {
            min_frame_samples: 61,
        }
    }
}

/// Errors produced while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl ParserConfig {
    /// Load configuration from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::from_toml(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

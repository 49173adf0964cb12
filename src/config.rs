use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from stepbreak.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct StepbreakConfig {
    pub interrupt: InterruptConfig,
    pub run: RunConfig,
}

/// How the coordinator reacts to Ctrl-C and SIGTERM.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    /// Exit on a second Ctrl-C that arrives while paused but not yet prompting.
    pub exit_on_second_interrupt: bool,
    /// Label substrings of tasks cancelled on the first Ctrl-C.
    pub interruptible_patterns: Vec<String>,
    /// Status passed to the process exit on every forced-exit path.
    pub exit_code: i32,
    /// How often the resume prompt wakes to check for a second Ctrl-C.
    pub input_poll_interval_ms: u64,
}

/// Settings for the demo step loop in the `stepbreak` binary.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub steps: u32,
    pub step_duration_ms: u64,
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
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
                write!(f, "invalid config {}: {}", path.display(), source)
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

impl StepbreakConfig {
    /// Load config from `path`. A missing file yields the defaults.
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
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

// --- Default implementations ---

/// Labels the host gives its step-execution tasks.
pub const DEFAULT_INTERRUPTIBLE_PATTERNS: [&str; 3] = ["step", "multi_act", "get_next_action"];

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            exit_on_second_interrupt: true,
            interruptible_patterns: DEFAULT_INTERRUPTIBLE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            exit_code: 0,
            input_poll_interval_ms: 100,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps: 5,
            step_duration_ms: 2000,
        }
    }
}

//! scanmux configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, info, warn};

use crate::multiplexer::MultiplexerConfig;

/// Project-local config file name
pub const LOCAL_CONFIG: &str = ".scanmux.yml";

/// Directory under the user's config and data dirs holding scanmux files
pub const APP_DIR: &str = "scanmux";

/// Config file name inside [`APP_DIR`]
pub const USER_CONFIG: &str = "scanmux.yml";

/// Per-user config file, if the platform has a config directory
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(USER_CONFIG))
}

/// Implicit config locations, most specific first
fn config_candidates() -> Vec<PathBuf> {
    std::iter::once(PathBuf::from(LOCAL_CONFIG))
        .chain(user_config_path())
        .collect()
}

/// Main scanmux configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Multiplexer settings
    pub multiplexer: MultiplexerConfig,

    /// Feed scanner settings used by replay
    pub feed: FeedConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.multiplexer.output_buffer == 0 {
            return Err(eyre!("multiplexer.output-buffer must be greater than zero"));
        }
        if self.feed.buffer == 0 {
            return Err(eyre!("feed.buffer must be greater than zero"));
        }
        if let Some(level) = &self.log_level {
            parse_log_level(level)?;
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    ///
    /// An explicit path must load. Otherwise the first readable file among
    /// `./.scanmux.yml` and the user config wins; broken files are skipped
    /// with a warning, and defaults apply when none loads.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }
        Self::load_first(&config_candidates())
    }

    fn load_first(candidates: &[PathBuf]) -> Result<Self> {
        for path in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return Ok(config),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable config"),
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!(path = %path.as_ref().display(), "Loaded config");
        Ok(config)
    }
}

/// Feed scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Notes a feed can queue before pushing waits
    pub buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { buffer: 100 }
    }
}

/// Parse a log level name, case-insensitive
pub fn parse_log_level(s: &str) -> Result<Level> {
    debug!(%s, "parse_log_level: called");
    match s.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(eyre!("Unknown log level: {}. Use: trace, debug, info, warn, or error", s)),
    }
}

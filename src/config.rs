//! Configuration file parser for the fetch stage.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub resolve: ResolveConfig,
    pub stage: StageConfig,
}

/// Reader and fan-out settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on reads in flight in concurrent mode.
    pub max_concurrent_fetches: usize,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Largest accepted feed body, in bytes.
    pub max_feed_size: usize,

    /// User-Agent header sent with HTTP requests.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 10,
            timeout_secs: 30,
            max_feed_size: 10 * 1024 * 1024, // 10MB
            user_agent: concat!("feedpipe/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How bare paths and hosts are resolved.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Directory relative source paths are joined onto. Defaults to the
    /// working directory.
    pub base_dir: Option<PathBuf>,

    /// Reject HTTP(S) sources pointing at localhost or private networks.
    pub deny_private_hosts: bool,
}

/// Pipeline stage options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Conf key holding the source list.
    pub extract: String,

    /// Accept a single source conf where a list is expected.
    pub listize: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            extract: "url".to_string(),
            listize: true,
        }
    }
}

const KNOWN_KEYS: &[(&str, &[&str])] = &[
    (
        "fetch",
        &[
            "max_concurrent_fetches",
            "timeout_secs",
            "max_feed_size",
            "user_agent",
        ],
    ),
    ("resolve", &["base_dir", "deny_private_hosts"]),
    ("stage", &["extract", "listize"]),
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            max_concurrent_fetches = config.fetch.max_concurrent_fetches,
            "Loaded configuration"
        );
        Ok(config)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for (key, value) in raw {
        let Some((_, known)) = KNOWN_KEYS.iter().find(|(section, _)| *section == key.as_str()) else {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        };
        if let Some(table) = value.as_table() {
            for nested in table.keys() {
                if !known.contains(&nested.as_str()) {
                    tracing::warn!(section = %key, key = %nested, "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

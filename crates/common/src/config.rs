//! Runtime configuration
//!
//! Loaded from an optional TOML file, then overridden by `--key=value`
//! command-line flags. Flag values are parsed as JSON when possible and
//! fall back to a plain string, so `--diffTolerance=8` is a number and
//! `--diffColor=#00ff00` is a string.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Default browser timeout (milliseconds)
pub const DEFAULT_BROWSER_TIMEOUT: u64 = 30_000;

/// Default number of same-URL hash dialogs captured on one page
pub const DEFAULT_SNAP_HASH_BATCH_SIZE: usize = 10;

/// Default number of hash dialog batches captured in parallel
pub const DEFAULT_SNAP_HASH_CONCURRENCY: usize = 2;

/// Default diff highlight colour
pub const DEFAULT_DIFF_COLOR: &str = "#ff0000";

/// Default per-channel tolerance of the pixel comparison
pub const DEFAULT_DIFF_TOLERANCE: u8 = 5;

/// Default number of dialog comparisons in flight
pub const DEFAULT_DIFF_CONCURRENCY: usize = 10;

/// dialog-differ configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DifferConfig {
    /// Log filter directive (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,

    /// Timeout applied to every browser interaction (milliseconds)
    pub browser_timeout: u64,

    /// Options passed verbatim to the browser launcher
    pub browser_options: serde_json::Value,

    /// Same-URL hash dialogs sharing one page before a new browser is started
    pub snap_hash_batch_size: usize,

    /// Hash dialog batches captured in parallel
    pub snap_hash_concurrency: usize,

    /// Diff highlight colour as `#rrggbb`
    pub diff_color: String,

    /// Per-channel difference tolerated before a pixel counts as changed
    pub diff_tolerance: u8,

    /// Dialog comparisons in flight
    pub diff_concurrency: usize,

    /// SQLite database path
    pub database_path: PathBuf,
}

impl Default for DifferConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            browser_timeout: DEFAULT_BROWSER_TIMEOUT,
            browser_options: serde_json::json!({ "headless": true }),
            snap_hash_batch_size: DEFAULT_SNAP_HASH_BATCH_SIZE,
            snap_hash_concurrency: DEFAULT_SNAP_HASH_CONCURRENCY,
            diff_color: DEFAULT_DIFF_COLOR.to_string(),
            diff_tolerance: DEFAULT_DIFF_TOLERANCE,
            diff_concurrency: DEFAULT_DIFF_CONCURRENCY,
            database_path: crate::default_db_path(),
        }
    }
}

impl DifferConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply every `--key=value` argument; other arguments are ignored
    pub fn apply_overrides<S: AsRef<str>>(&mut self, args: &[S]) -> Result<()> {
        for arg in args {
            if let Some((key, value)) = parse_override(arg.as_ref()) {
                self.apply_override(key, value)?;
            }
        }
        Ok(())
    }

    /// Set one key from its raw command-line value
    pub fn apply_override(&mut self, key: &str, raw: &str) -> Result<()> {
        let value = coerce_value(raw);

        let mut doc = serde_json::to_value(&*self)?;
        let fields = doc
            .as_object_mut()
            .ok_or_else(|| Error::Internal("configuration is not an object".to_string()))?;
        if !fields.contains_key(key) {
            return Err(Error::InvalidConfig(format!("unknown configuration key: {}", key)));
        }
        fields.insert(key.to_string(), value);

        let updated: Self = serde_json::from_value(doc)
            .map_err(|e| Error::InvalidConfig(format!("invalid value for {}: {}", key, e)))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Check value ranges serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.snap_hash_batch_size == 0 {
            return Err(Error::InvalidConfig("snapHashBatchSize must be at least 1".to_string()));
        }
        if self.snap_hash_concurrency == 0 {
            return Err(Error::InvalidConfig("snapHashConcurrency must be at least 1".to_string()));
        }
        if self.diff_concurrency == 0 {
            return Err(Error::InvalidConfig("diffConcurrency must be at least 1".to_string()));
        }
        parse_hex_color(&self.diff_color)?;
        Ok(())
    }

    /// Highlight colour as RGB bytes
    pub fn highlight_color(&self) -> Result<[u8; 3]> {
        parse_hex_color(&self.diff_color)
    }
}

/// Split `--key=value` into its parts
pub fn parse_override(arg: &str) -> Option<(&str, &str)> {
    let rest = arg.strip_prefix("--")?;
    let (key, value) = rest.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

/// Parse as JSON, else keep the raw string
pub fn coerce_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Parse `#rrggbb` or `rrggbb`
pub fn parse_hex_color(hex: &str) -> Result<[u8; 3]> {
    let digits = hex.trim_start_matches('#');
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidConfig(format!(
            "colour must be 6 hex digits (e.g. '#ff0000'), got '{}'",
            hex
        )));
    }

    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16).map_err(|e| Error::InvalidConfig(e.to_string()))
    };
    Ok([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

//! Configuration loading and generation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable debug logging
    pub debug: bool,

    /// Base URL of the package registry
    pub registry_url: String,

    /// Registry request timeout in seconds
    pub http_timeout_secs: u64,

    /// Where source repositories are cloned
    pub repos_dir: PathBuf,

    /// Scratch area for extracted archives and deobfuscated output
    pub work_dir: PathBuf,

    /// Deobfuscator command, invoked as `<cmd> <input> -o <output>`
    pub deobfuscator: String,

    pub deobfuscator_timeout_secs: u64,

    /// YAML rule table replacing the built-in one
    pub rules_file: Option<PathBuf>,

    /// Release gap in days that counts as a package reactivation
    pub reactivation_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            registry_url: "https://registry.npmjs.org".to_string(),
            http_timeout_secs: 3,
            repos_dir: default_cache_dir().join("repos"),
            work_dir: default_cache_dir().join("work"),
            deobfuscator: "obfuscator-io-deobfuscator".to_string(),
            deobfuscator_timeout_secs: 120,
            rules_file: None,
            reactivation_days: 730,
        }
    }
}

impl Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn deobfuscator_timeout(&self) -> Duration {
        Duration::from_secs(self.deobfuscator_timeout_secs)
    }

    pub fn reactivation_gap(&self) -> time::Duration {
        time::Duration::days(self.reactivation_days)
    }
}

/// Default cache root: ~/.cache/release-sight
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("release-sight")
}

/// Configuration service.
pub struct ConfigService;

impl ConfigService {
    /// Get the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("release-sight")
            .join("config.toml")
    }

    /// Load configuration from file.
    ///
    /// If `path` is `None`, uses the default path.
    /// If the file doesn't exist, returns default configuration.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Generate default configuration file at the default path.
    pub fn generate_default() -> Result<PathBuf> {
        let path = Self::default_path();
        Self::generate_at(&path)?;
        Ok(path)
    }

    /// Generate default configuration file at the specified path.
    pub fn generate_at(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = Self::default_config_content();
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Generate default configuration content with comments.
    fn default_config_content() -> String {
        r#"# release-sight configuration file

# Enable debug logging (default: false)
debug = false

# Package registry and request timeout
registry_url = "https://registry.npmjs.org"
http_timeout_secs = 3

# Clones and scratch space (default: ~/.cache/release-sight/{repos,work})
# repos_dir = "~/.cache/release-sight/repos"
# work_dir = "~/.cache/release-sight/work"

# External deobfuscator, skipped when not installed
deobfuscator = "obfuscator-io-deobfuscator"
deobfuscator_timeout_secs = 120

# YAML rule table replacing the built-in one (see `release-sight rules`)
# rules_file = "rules.yaml"

# Release gap in days that counts as a package reactivation
reactivation_days = 730
"#
        .to_string()
    }
}

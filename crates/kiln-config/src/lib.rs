//! # kiln-config
//!
//! Layered configuration for the staging core.
//!
//! Resolution order: built-in defaults → `<project_root>/.kiln/config.toml`
//! → environment variable overrides.

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub const CONFIG_VERSION: u32 = 1;

/// Default CAS root, used when neither the project config file nor
/// `KILN_CAS_ROOT` supplies one.
pub const DEFAULT_CAS_ROOT: &str = "~/.kiln/store";

/// Top-level configuration: just the two sections the core needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub config_version: u32,
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load config for the current directory as project root.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for_project(Path::new("."))
    }

    /// Load config for a specific project root.
    /// Resolution order: defaults → `<project_root>/.kiln/config.toml` → env vars.
    pub fn load_for_project(project_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let project_config_path = project_root.join(".kiln/config.toml");
        if project_config_path.exists() {
            debug!(path = ?project_config_path, "loading project config");
            let contents = std::fs::read_to_string(&project_config_path)?;
            config = toml::from_str(&contents)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("KILN_CAS_ROOT") {
            self.storage.cas_root = PathBuf::from(root);
        }
        if let Ok(mode) = std::env::var("KILN_DEFAULT_MODE") {
            if let Ok(parsed) = u32::from_str_radix(mode.trim_start_matches("0o"), 8) {
                self.session.default_mode = parsed;
            }
        }
        if std::env::var("KILN_KEEP_STAGING").is_ok() {
            self.session.cleanup_staging_on_abandon = false;
        }
    }

    /// Generate a TOML template for a new project config file.
    pub fn init_toml() -> String {
        let default = Config::default();
        format!(
            r#"config_version = 1

[storage]
cas_root = "{cas_root}"

[session]
default_mode = {default_mode:#o}
cleanup_staging_on_abandon = {cleanup}
"#,
            cas_root = default.storage.cas_root.display(),
            default_mode = default.session.default_mode,
            cleanup = default.session.cleanup_staging_on_abandon,
        )
    }

    pub fn cas_root(&self) -> PathBuf {
        expand_tilde(&self.storage.cas_root)
    }
}

/// CAS storage section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the Blob Store. Env override: `KILN_CAS_ROOT`.
    pub cas_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { cas_root: PathBuf::from(DEFAULT_CAS_ROOT) }
    }
}

/// Job session section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Mode applied to staged files when a job doesn't declare one.
    pub default_mode: u32,
    /// Whether `JobSessionManager::abandon` removes staging files it owns.
    /// Env override (set to keep them): `KILN_KEEP_STAGING`.
    pub cleanup_staging_on_abandon: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { default_mode: 0o644, cleanup_staging_on_abandon: true }
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

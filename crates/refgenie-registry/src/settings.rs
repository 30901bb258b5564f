//! Client settings: timeouts and auto-pull behavior.
//!
//! Settings are per client, not shared through the genome configuration.
//! They load from an optional TOML file:
//!
//! ```toml
//! [registry]
//! lock_timeout_ms = 60000
//! server_timeout_ms = 10000
//! auto_pull = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Environment variable naming the genome configuration file.
pub const CONFIG_ENV_VAR: &str = "REFGENIE";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_SERVER_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Longest wait for the exclusive (or shared) config lock.
    pub lock_timeout: Duration,
    /// Connect timeout for each remote server, and the bound on each catalog
    /// or manifest request. File downloads are not cut off once connected.
    pub server_timeout: Duration,
    /// Whether `seek` pulls missing assets.
    pub auto_pull: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            server_timeout: Duration::from_millis(DEFAULT_SERVER_TIMEOUT_MS),
            auto_pull: false,
        }
    }
}

/// On-disk shape of the settings file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    registry: RegistrySection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistrySection {
    lock_timeout_ms: Option<u64>,
    server_timeout_ms: Option<u64>,
    auto_pull: Option<bool>,
}

impl RegistrySettings {
    /// Parse settings from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: SettingsFile = toml::from_str(text)?;
        let defaults = RegistrySettings::default();
        let section = file.registry;
        Ok(RegistrySettings {
            lock_timeout: section
                .lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            server_timeout: section
                .server_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.server_timeout),
            auto_pull: section.auto_pull.unwrap_or(defaults.auto_pull),
        })
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::storage(path, format!("reading settings: {e}")))?;
        Self::from_toml_str(&text)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = timeout;
        self
    }

    pub fn with_auto_pull(mut self, auto_pull: bool) -> Self {
        self.auto_pull = auto_pull;
        self
    }
}

/// Genome configuration path from `$REFGENIE`, if set and non-empty.
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

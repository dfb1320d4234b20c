//! Config file parsing for `~/.config/progress-relay/config.toml`.
//!
//! ```toml
//! poll_ms = 50
//! log_callback_failures = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding `poll_ms`.
pub const POLL_MS_ENV: &str = "PROGRESS_RELAY_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Delay between poll ticks on the consumer context.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    /// Install the tracing error sink so discarded callback panics are logged.
    #[serde(default)]
    pub log_callback_failures: bool,
}

fn default_poll_ms() -> u64 {
    50
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            log_callback_failures: false,
        }
    }
}

impl RelayConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: RelayConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(self.poll_ms));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    /// Apply `PROGRESS_RELAY_POLL_MS` if set.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    fn apply_env(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(raw) = get(POLL_MS_ENV) {
            self.poll_ms = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: POLL_MS_ENV.to_string(),
                value: raw.clone(),
            })?;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Load config from the default path, falling back to defaults when the file
/// is missing or invalid.
pub fn load_config() -> RelayConfig {
    let path = match config_path() {
        Some(p) => p,
        None => return RelayConfig::default(),
    };
    if !path.exists() {
        return RelayConfig::default();
    }

    match RelayConfig::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring config at {}: {}", path.display(), e);
            RelayConfig::default()
        }
    }
}

/// Return the default config file path.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("progress-relay");
        p.push("config.toml");
        p
    })
}

//! Runtime configuration.
//!
//! Loaded from `~/.spec-metrics/config.toml` when present. Every field is
//! optional; a missing file yields the defaults.
//!
//! ```toml
//! metadata_dir = ".spec-workflow"
//! idle_timeout_ms = 45000
//! debounce_ms = 100
//! checkpoint_interval_secs = 30
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};
use crate::storage::{MetricsPaths, DEFAULT_METADATA_DIR};

/// Inactivity after which an open human session closes.
pub const IDLE_TIMEOUT_MS: u64 = 45_000;

/// Pulses closer together than this do not re-arm the idle timer.
pub const DEBOUNCE_MS: u64 = 100;

/// How often the serve loop flushes the session checkpoint.
pub const CHECKPOINT_INTERVAL_SECS: u64 = 30;

/// Upper bound for `idle_timeout_ms` and `checkpoint_interval_secs`.
pub const MAX_CONFIG_DURATION_SECS: u64 = 24 * 60 * 60;

const APP_DIR_NAME: &str = ".spec-metrics";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub metadata_dir: String,
    pub idle_timeout_ms: u64,
    pub debounce_ms: u64,
    pub checkpoint_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            metadata_dir: DEFAULT_METADATA_DIR.to_string(),
            idle_timeout_ms: IDLE_TIMEOUT_MS,
            debounce_ms: DEBOUNCE_MS,
            checkpoint_interval_secs: CHECKPOINT_INTERVAL_SECS,
        }
    }
}

impl MetricsConfig {
    pub fn paths(&self) -> MetricsPaths {
        MetricsPaths::new(self.metadata_dir.clone())
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.idle_timeout_ms as i64)
    }

    pub fn debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.debounce_ms as i64)
    }

    pub fn checkpoint_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.checkpoint_interval_secs)
    }

    fn check(&self, path: &Path) -> Result<()> {
        let malformed = |details: &str| MetricsError::ConfigMalformed {
            path: path.to_path_buf(),
            details: details.to_string(),
        };
        if self.metadata_dir.trim().is_empty() {
            return Err(malformed("metadata_dir must not be empty"));
        }
        if self.idle_timeout_ms == 0 || self.idle_timeout_ms > MAX_CONFIG_DURATION_SECS * 1_000 {
            return Err(malformed("idle_timeout_ms must be between 1 and one day"));
        }
        if self.debounce_ms >= self.idle_timeout_ms {
            return Err(malformed("debounce_ms must be shorter than idle_timeout_ms"));
        }
        if self.checkpoint_interval_secs == 0
            || self.checkpoint_interval_secs > MAX_CONFIG_DURATION_SECS
        {
            return Err(malformed("checkpoint_interval_secs must be between 1 and one day"));
        }
        Ok(())
    }
}

/// Returns `~/.spec-metrics`, the home for config and log files.
pub fn app_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DIR_NAME))
}

pub fn default_config_path() -> Option<PathBuf> {
    app_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Loads configuration from `path`, or from [`default_config_path`].
///
/// A missing file returns defaults. An unreadable or invalid file is an error;
/// callers decide whether to fall back.
pub fn load_config(path: Option<&Path>) -> Result<MetricsConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(MetricsConfig::default()),
        },
    };

    let content = match fs_err::read_to_string(&config_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(MetricsConfig::default())
        }
        Err(err) => return Err(MetricsError::io("Failed to read config", err)),
    };

    let config: MetricsConfig =
        toml::from_str(&content).map_err(|err| MetricsError::ConfigMalformed {
            path: config_path.clone(),
            details: err.to_string(),
        })?;
    config.check(&config_path)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(Some(&temp.path().join("absent.toml"))).unwrap();
        assert_eq!(config, MetricsConfig::default());
        assert_eq!(config.idle_timeout_ms, 45_000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "metadata_dir = \".kiro\"\ncheckpoint_interval_secs = 5\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.metadata_dir, ".kiro");
        assert_eq!(config.checkpoint_interval_secs, 5);
        assert_eq!(config.idle_timeout_ms, IDLE_TIMEOUT_MS);
        assert_eq!(config.debounce_ms, DEBOUNCE_MS);
    }

    #[test]
    fn malformed_toml_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "idle_timeout_ms = \"soon\"").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, MetricsError::ConfigMalformed { .. }));
    }

    #[test]
    fn rejects_debounce_longer_than_idle_timeout() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "idle_timeout_ms = 50\ndebounce_ms = 100\n").unwrap();

        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn rejects_durations_longer_than_a_day() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        std::fs::write(&path, "idle_timeout_ms = 9223372036854775807\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, MetricsError::ConfigMalformed { .. }));

        std::fs::write(&path, "checkpoint_interval_secs = 18446744073709551615\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, MetricsError::ConfigMalformed { .. }));

        std::fs::write(&path, "idle_timeout_ms = 86400000\ncheckpoint_interval_secs = 86400\n")
            .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.checkpoint_interval_secs, 86_400);
    }

    #[test]
    fn durations_follow_fields() {
        let config = MetricsConfig::default();
        assert_eq!(config.idle_timeout().num_milliseconds(), 45_000);
        assert_eq!(config.debounce().num_milliseconds(), 100);
        assert_eq!(config.checkpoint_interval().as_secs(), 30);
    }
}

//! Runner settings

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{ProcessError, Result};

/// Prefix for environment variable overrides (`PROCESS_POLL_INTERVAL_US`, ...)
const ENV_PREFIX: &str = "PROCESS";

/// Default runner settings, overridable from TOML and the environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    /// Sleep between polls of the synchronous wait loop, in microseconds
    pub poll_interval_us: u64,
    /// Wall-clock limit since spawn in microseconds; negative means none
    pub timeout_us: i64,
    /// Grace period between SIGTERM and SIGKILL on stop, in microseconds
    pub kill_timeout_us: u64,
    /// Tick of the asynchronous driver, in milliseconds
    pub async_tick_ms: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            poll_interval_us: 1_000,
            timeout_us: -1,
            kill_timeout_us: 1_000_000,
            async_tick_ms: 100,
        }
    }
}

impl ProcessSettings {
    /// Load settings from an optional TOML file, then `PROCESS_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }

        let settings: Self = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ProcessError::Settings(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(source).map_err(|e| ProcessError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_us == 0 {
            return Err(ProcessError::Settings(
                "poll_interval_us must be greater than 0".to_string(),
            ));
        }
        if self.async_tick_ms == 0 {
            return Err(ProcessError::Settings(
                "async_tick_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    /// `None` when no timeout is configured
    pub fn timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout_us).ok().map(Duration::from_micros)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_micros(self.kill_timeout_us)
    }

    pub fn async_tick(&self) -> Duration {
        Duration::from_millis(self.async_tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ProcessSettings::default();
        assert_eq!(settings.poll_interval(), Duration::from_millis(1));
        assert_eq!(settings.timeout(), None);
        assert_eq!(settings.kill_timeout(), Duration::from_secs(1));
        assert_eq!(settings.async_tick(), Duration::from_millis(100));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let settings = ProcessSettings::from_toml_str("timeout_us = 2500000\n").unwrap();
        assert_eq!(settings.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(settings.poll_interval_us, 1_000);
    }

    #[test]
    fn test_negative_timeout_means_none() {
        let settings = ProcessSettings::from_toml_str("timeout_us = -5\n").unwrap();
        assert_eq!(settings.timeout(), None);
    }

    #[test]
    fn test_rejects_zero_intervals() {
        assert!(matches!(
            ProcessSettings::from_toml_str("poll_interval_us = 0\n"),
            Err(ProcessError::Settings(_))
        ));
        assert!(ProcessSettings::from_toml_str("async_tick_ms = 0\n").is_err());
        assert!(ProcessSettings::from_toml_str("poll_interval_us = \"fast\"\n").is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process.toml");
        std::fs::write(&path, "poll_interval_us = 5000\nkill_timeout_us = 200000\n").unwrap();

        let settings = ProcessSettings::load(Some(&path)).unwrap();
        assert_eq!(settings.poll_interval(), Duration::from_millis(5));
        assert_eq!(settings.kill_timeout(), Duration::from_millis(200));
    }

    #[test]
    #[serial_test::serial]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ProcessSettings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.async_tick_ms, 100);
    }

    #[test]
    #[serial_test::serial]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process.toml");
        std::fs::write(&path, "poll_interval_us = 5000\nkill_timeout_us = 200000\n").unwrap();

        std::env::set_var("PROCESS_POLL_INTERVAL_US", "7000");
        let loaded = ProcessSettings::load(Some(&path));
        std::env::remove_var("PROCESS_POLL_INTERVAL_US");

        let settings = loaded.unwrap();
        assert_eq!(settings.poll_interval_us, 7_000);
        assert_eq!(settings.kill_timeout_us, 200_000);
        assert_eq!(settings.async_tick_ms, 100);
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_environment_value_is_rejected() {
        std::env::set_var("PROCESS_ASYNC_TICK_MS", "0");
        let loaded = ProcessSettings::load(None);
        std::env::remove_var("PROCESS_ASYNC_TICK_MS");

        assert!(matches!(loaded, Err(ProcessError::Settings(_))));
    }
}

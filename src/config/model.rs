// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Top-level runtime config
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub capture: CaptureConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enable: bool,
    pub file: Option<String>,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: "INFO".into() }
    }
}

/// Mirror of the `[capture]` table
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Channel name; generated when absent.
    pub name: Option<String>,
    /// Initial delivery gate.
    pub enabled: bool,
    /// Handshake wait cadence, e.g. `"3s"` or `"500ms"`.
    pub wait_timeout: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { name: None, enabled: true, wait_timeout: "3s".into() }
    }
}

impl CaptureConfig {
    /// Parsed wait cadence.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.wait_timeout)
            .map_err(|e| ConfigError::InvalidDuration(self.wait_timeout.clone(), e))
    }
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_cadence() {
        let cfg = Config::default();
        assert!(!cfg.logging.enable);
        assert_eq!(cfg.logging.level, "INFO");
        assert!(cfg.capture.enabled);
        assert_eq!(cfg.capture.timeout().unwrap(), Duration::from_millis(3000));
        assert!(cfg.capture.name.is_none());
    }

    #[test]
    fn full_table_parses() {
        let cfg: Config = toml::from_str(
            r#"
            [logging]
            enable = true
            level = "DEBUG"
            file = "dbgcap.log"

            [capture]
            name = "OutputDebugString"
            enabled = false
            wait_timeout = "250ms"
            "#,
        )
        .unwrap();

        assert!(cfg.logging.enable);
        assert_eq!(cfg.logging.file.as_deref(), Some("dbgcap.log"));
        assert_eq!(cfg.capture.name.as_deref(), Some("OutputDebugString"));
        assert!(!cfg.capture.enabled);
        assert_eq!(cfg.capture.timeout().unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn bad_durations_are_reported_with_the_offending_text() {
        let cfg = CaptureConfig { wait_timeout: "soon".into(), ..Default::default() };
        match cfg.timeout() {
            Err(ConfigError::InvalidDuration(text, _)) => assert_eq!(text, "soon"),
            other => panic!("expected InvalidDuration, got {other:?}"),
        }
    }
}

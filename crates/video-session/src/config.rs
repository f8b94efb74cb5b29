//! Configuration loading and defaults.
//!
//! Every field is optional in TOML; accessors resolve the defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_SEEK_INTERVAL_MS: u64 = 10_000;
const DEFAULT_PROGRESS_POLL_MS: u64 = 100;
const DEFAULT_CAST_PROGRESS_MS: u64 = 250;

/// Top-level session configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Step used by seek back/forward, in milliseconds.
    pub seek_interval_ms: Option<u64>,
    /// Local position polling cadence while playing, in milliseconds.
    pub progress_poll_ms: Option<u64>,
    /// Allow sessions to offer picture-in-picture.
    pub picture_in_picture_enabled: Option<bool>,
    /// Cast settings. Casting is disabled without a receiver application id.
    pub cast: Option<CastConfig>,
}

/// Cast settings from TOML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CastConfig {
    /// Remote receiver application id.
    pub receiver_application_id: Option<String>,
    /// Requested remote progress reporting cadence, in milliseconds.
    pub progress_interval_ms: Option<u64>,
}

impl SessionConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<SessionConfig>(raw)?;
        if cfg.progress_poll_ms == Some(0) {
            anyhow::bail!("progress_poll_ms must be greater than zero");
        }
        Ok(cfg)
    }

    pub fn seek_interval(&self) -> Duration {
        Duration::from_millis(self.seek_interval_ms.unwrap_or(DEFAULT_SEEK_INTERVAL_MS))
    }

    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.progress_poll_ms
                .unwrap_or(DEFAULT_PROGRESS_POLL_MS)
                .max(1),
        )
    }

    pub fn picture_in_picture_enabled(&self) -> bool {
        self.picture_in_picture_enabled.unwrap_or(false)
    }

    /// Resolved cast settings (defaults when the table is absent).
    pub fn cast(&self) -> CastConfig {
        self.cast.clone().unwrap_or_default()
    }
}

impl CastConfig {
    pub fn enabled(&self) -> bool {
        self.receiver_application_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(
            self.progress_interval_ms
                .unwrap_or(DEFAULT_CAST_PROGRESS_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_resolves_defaults() {
        let cfg = SessionConfig::from_toml_str("").expect("parse");
        assert_eq!(cfg.seek_interval(), Duration::from_secs(10));
        assert_eq!(cfg.progress_poll_interval(), Duration::from_millis(100));
        assert!(!cfg.picture_in_picture_enabled());
        assert!(!cfg.cast().enabled());
        assert_eq!(cfg.cast().progress_interval(), Duration::from_millis(250));
    }

    #[test]
    fn cast_table_enables_casting() {
        let cfg = SessionConfig::from_toml_str(
            r#"
seek_interval_ms = 5000
picture_in_picture_enabled = true

[cast]
receiver_application_id = "CC1AD845"
progress_interval_ms = 500
"#,
        )
        .expect("parse");
        assert_eq!(cfg.seek_interval(), Duration::from_secs(5));
        assert!(cfg.picture_in_picture_enabled());
        let cast = cfg.cast();
        assert!(cast.enabled());
        assert_eq!(cast.progress_interval(), Duration::from_millis(500));
    }

    #[test]
    fn blank_receiver_id_keeps_cast_disabled() {
        let cfg = SessionConfig::from_toml_str("[cast]\nreceiver_application_id = \"  \"\n")
            .expect("parse");
        assert!(!cfg.cast().enabled());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(SessionConfig::from_toml_str("progress_poll_ms = 0").is_err());
    }
}

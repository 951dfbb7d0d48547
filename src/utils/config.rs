// src/utils/config.rs
//! Agent configuration
//!
//! Layered with the `config` crate: compiled defaults, then an optional
//! `squeaky.toml` (or any format `config` understands), then environment
//! variables prefixed with `SQUEAKY_` using `__` as the section separator
//! (e.g. `SQUEAKY_SESSION__CUTOFF_MS=60000`).

use crate::utils::errors::{AgentError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower bound for the cosmetic mutation throttle window
pub const MIN_THROTTLE_WINDOW_MS: u64 = 5;

/// Upper bound for the cosmetic mutation throttle window
pub const MAX_THROTTLE_WINDOW_MS: u64 = 50;

/// Top-level agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub site: SiteConfig,
    pub api: ApiConfig,
    pub collector: CollectorConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub capture: CaptureSourceConfig,
    pub logging: LoggingConfig,
}

/// Site being recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site identifier issued by the backend
    pub id: String,

    /// Page URL the agent reports as its location (origin + path + query)
    pub page_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            page_url: "http://localhost/".to_string(),
        }
    }
}

/// Settings endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// GraphQL gateway URL
    pub settings_url: String,

    /// Read settings from a local JSON file instead of the gateway
    pub settings_file: Option<String>,

    /// Give up on the settings request after this long
    pub settings_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            settings_url: "http://localhost:4000/gateway/graphql".to_string(),
            settings_file: None,
            settings_timeout_ms: 10_000,
        }
    }
}

/// Collector connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Collector socket address (host:port)
    pub address: String,

    /// Request path sent in the connection handshake
    pub path: String,

    /// Reconnect attempts after an unexpected close
    pub max_reconnect_attempts: u32,

    /// Backoff step; attempt `n` waits `n * step`
    pub reconnect_step_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5000".to_string(),
            path: "/api/in".to_string(),
            max_reconnect_attempts: 5,
            reconnect_step_ms: 100,
        }
    }
}

/// Session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which the session is over (milliseconds)
    pub cutoff_ms: u64,

    /// How often the inactivity timer re-checks staleness (milliseconds)
    pub check_interval_ms: u64,

    /// SPA navigation poll interval (milliseconds)
    pub navigation_poll_ms: u64,

    /// Cosmetic mutation throttle window, clamped to 5..=50 ms
    pub mutation_throttle_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cutoff_ms: 30 * 60 * 1000,
            check_interval_ms: 10_000,
            navigation_poll_ms: 500,
            mutation_throttle_ms: MAX_THROTTLE_WINDOW_MS,
        }
    }
}

impl SessionConfig {
    pub fn cutoff(&self) -> Duration {
        Duration::from_millis(self.cutoff_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn navigation_poll(&self) -> Duration {
        Duration::from_millis(self.navigation_poll_ms)
    }

    /// Throttle window, clamped into the supported range
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(
            self.mutation_throttle_ms
                .clamp(MIN_THROTTLE_WINDOW_MS, MAX_THROTTLE_WINDOW_MS),
        )
    }
}

/// Persisted identity storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path; in-memory storage when unset
    pub path: Option<String>,
}

/// Source of raw capture events for the standalone binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSourceConfig {
    /// JSON-lines file of raw capture events to replay
    pub replay_file: Option<String>,

    /// Replay at recorded pace instead of as fast as possible
    pub realtime: bool,
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AgentConfig {
    /// Load from `squeaky.*` in the working directory and the environment
    pub fn load() -> Result<Self> {
        Self::load_from("squeaky")
    }

    /// Load from an explicit file stem (the file is optional)
    pub fn load_from(file: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&AgentConfig::default())?)
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("SQUEAKY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: AgentConfig = config.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.site.id.trim().is_empty() {
            return Err(AgentError::ConfigError("site.id must be set".to_string()));
        }

        if self.session.cutoff_ms == 0 {
            return Err(AgentError::ConfigError(
                "session.cutoff_ms cannot be 0".to_string(),
            ));
        }

        if self.session.check_interval_ms == 0 || self.session.navigation_poll_ms == 0 {
            return Err(AgentError::ConfigError(
                "session timer intervals cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.collector.max_reconnect_attempts, 5);
        assert_eq!(config.collector.reconnect_step_ms, 100);
        assert_eq!(config.session.cutoff(), Duration::from_secs(1800));
        assert_eq!(config.session.check_interval(), Duration::from_secs(10));
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn test_throttle_window_is_clamped() {
        let mut session = SessionConfig::default();

        session.mutation_throttle_ms = 1;
        assert_eq!(session.throttle_window(), Duration::from_millis(5));

        session.mutation_throttle_ms = 500;
        assert_eq!(session.throttle_window(), Duration::from_millis(50));

        session.mutation_throttle_ms = 20;
        assert_eq!(session.throttle_window(), Duration::from_millis(20));
    }

    #[test]
    fn test_validation_requires_site_id() {
        let config = AgentConfig::default();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.site.id = "site_id".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[site]\nid = \"site_id\"\n\n[session]\ncutoff_ms = 60000\nmutation_throttle_ms = 10"
        )
        .unwrap();

        let stem = path.with_extension("");
        let config = AgentConfig::load_from(stem.to_str().unwrap()).unwrap();

        assert_eq!(config.site.id, "site_id");
        assert_eq!(config.session.cutoff_ms, 60_000);
        assert_eq!(config.session.throttle_window(), Duration::from_millis(10));
        // Untouched sections keep their defaults
        assert_eq!(config.collector.path, "/api/in");
    }
}

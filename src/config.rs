//! Configuration
//!
//! Every section has working defaults, so an empty JSON object `{}` is a
//! valid configuration file.

use crate::error::ConfigError;
use crate::protocol::Mode;
use crate::transport::{default_candidates, Endpoint};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Serial line and handshake timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial speed (8N1)
    pub baud_rate: u32,
    /// Per-read timeout of the serial port
    pub read_timeout_ms: u64,
    /// Wait for the identity reply
    pub identity_settle_ms: u64,
    /// Wait for any other command reply
    pub command_settle_ms: u64,
    /// Extra wait after a mode change while the device reinitializes
    pub mode_settle_ms: u64,
    /// Pause between empty reads while scanning for a frame marker
    pub byte_poll_delay_ms: u64,
    /// Maximum reply bytes read after a command
    pub reply_capacity: usize,
    /// Discard buffered input after each accepted frame
    pub flush_after_frame: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            read_timeout_ms: 5,
            identity_settle_ms: 200,
            command_settle_ms: 100,
            mode_settle_ms: 500,
            byte_poll_delay_ms: 1,
            reply_capacity: 10,
            flush_after_frame: true,
        }
    }
}

impl LinkConfig {
    /// No settle delays at all; for in-memory transports
    pub fn immediate() -> Self {
        Self {
            identity_settle_ms: 0,
            command_settle_ms: 0,
            mode_settle_ms: 0,
            byte_poll_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Host polling loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Tick of the frame-reading task
    pub update_interval_ms: u64,
    /// Tick of the connection-keeping task
    pub autoconnect_interval_ms: u64,
    /// Consecutive missed reads tolerated before the link is declared down
    pub missed_read_threshold: u32,
    /// Attempts at selecting the initial mode after connecting
    pub mode_retry_attempts: u32,
    /// Delay between those attempts
    pub mode_retry_delay_ms: u64,
    /// Mode selected on every fresh connection
    pub initial_mode: Mode,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 5,
            autoconnect_interval_ms: 200,
            missed_read_threshold: 30,
            mode_retry_attempts: 10,
            mode_retry_delay_ms: 100,
            initial_mode: Mode::Static,
        }
    }
}

impl PollConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn autoconnect_interval(&self) -> Duration {
        Duration::from_millis(self.autoconnect_interval_ms)
    }

    pub fn mode_retry_delay(&self) -> Duration {
        Duration::from_millis(self.mode_retry_delay_ms)
    }
}

/// Device-side adaptive threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Feature samples kept in the window
    pub capacity: usize,
    /// Multiplier applied to each per-second maximum before storage
    pub scaling_factor: f32,
    /// Percentile reported as the threshold
    pub percent: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            capacity: 150,
            scaling_factor: 100.0,
            percent: 90,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub poll: PollConfig,
    pub threshold: ThresholdConfig,
    /// Endpoints to probe instead of the platform defaults
    pub candidates: Option<Vec<Endpoint>>,
}

impl Config {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Endpoints to probe, in order
    pub fn candidates(&self) -> Vec<Endpoint> {
        self.candidates.clone().unwrap_or_else(default_candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.link.baud_rate, 19200);
        assert_eq!(config.link.identity_settle_ms, 200);
        assert_eq!(config.poll.missed_read_threshold, 30);
        assert_eq!(config.poll.autoconnect_interval(), Duration::from_millis(200));
        assert_eq!(config.threshold.capacity, 150);
        assert_eq!(config.candidates(), default_candidates());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json_str(
            r#"{ "poll": { "initial_mode": "Dynamic" }, "candidates": [ { "ComPort": 7 } ] }"#,
        )
        .unwrap();
        assert_eq!(config.poll.initial_mode, Mode::Dynamic);
        assert_eq!(config.poll.update_interval_ms, 5);
        assert_eq!(config.candidates(), vec![Endpoint::ComPort(7)]);
        assert_eq!(config.link, LinkConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "threshold": {{ "percent": 75 }} }}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.threshold.percent, 75);
        assert_eq!(config.threshold.scaling_factor, 100.0);
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            Config::load("/nonexistent/shoulder.json"),
            Err(ConfigError::Io(_))
        ));
        assert!(matches!(
            Config::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = Config::default();
        config.candidates = Some(vec![Endpoint::Path("/dev/ttyUSB0".to_string())]);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(Config::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_immediate_link_has_no_delays() {
        let link = LinkConfig::immediate();
        assert_eq!(link.identity_settle_ms, 0);
        assert_eq!(link.mode_settle_ms, 0);
        assert_eq!(link.baud_rate, 19200);
    }
}

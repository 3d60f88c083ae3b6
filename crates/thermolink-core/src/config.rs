//! Monitor configuration
//!
//! Everything the pipeline reads but never mutates: calibration, link
//! timing, port selection, reconnect backoff and the optional forward link.
//! Stored as JSON; every field has a default so partial files are fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::discovery::{BackoffPolicy, ScanOrder};
use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_TIMEOUT_MS};

/// Baud rate of the downstream forward link
pub const DEFAULT_FORWARD_BAUD_RATE: u32 = 115200;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Delta limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    /// Apply the limiter at all
    pub enabled: bool,
    /// Largest accepted jump between consecutive readings (°C)
    pub threshold_c: f64,
    /// Granularity of synthesized replacements (°C)
    pub step_c: f64,
    /// Fixed RNG seed; `None` seeds from OS entropy
    pub seed: Option<u64>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_c: 1.8,
            step_c: 0.1,
            seed: None,
        }
    }
}

/// Operator-supplied calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationContext {
    /// Cold (reference) junction temperature in °C
    pub cold_junction_c: f64,
    /// Delta limiter settings
    pub limiter: LimiterSettings,
}

impl Default for CalibrationContext {
    fn default() -> Self {
        Self {
            cold_junction_c: 22.0,
            limiter: LimiterSettings::default(),
        }
    }
}

/// Instrument link timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Multimeter baud rate (the instrument is fixed at 9600 8N1)
    pub baud_rate: u32,
    /// Read timeout once the instrument has answered the probe
    pub read_timeout_ms: u64,
    /// Read timeout while probing a candidate port
    pub probe_timeout_ms: u64,
    /// Delay between opening a port and sending the break byte
    pub settle_delay_ms: u64,
    /// Extra lines read per sample when a prompt shows up instead of data
    pub max_desync_reads: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            settle_delay_ms: 200,
            max_desync_reads: 3,
        }
    }
}

impl LinkSettings {
    /// Operating read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Probe read timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Post-open settle delay
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Candidate port selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Explicit candidate list; `None` enumerates system ports
    pub ports: Option<Vec<String>>,
    /// Order in which candidates are tried
    pub order: ScanOrder,
}

/// Reconnect timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// Wait before the first scan after startup or link loss
    pub after_loss_ms: u64,
    /// Wait between scans that found nothing
    pub policy: BackoffPolicy,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            after_loss_ms: 500,
            policy: BackoffPolicy::default(),
        }
    }
}

/// Optional downstream link receiving accepted temperatures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardSettings {
    /// Serial port name
    pub port: String,
    /// Baud rate
    #[serde(default = "default_forward_baud_rate")]
    pub baud_rate: u32,
    /// Read back and log the receiver's echo
    #[serde(default)]
    pub read_echo: bool,
}

fn default_forward_baud_rate() -> u32 {
    DEFAULT_FORWARD_BAUD_RATE
}

/// Complete monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Calibration
    pub calibration: CalibrationContext,
    /// Instrument link timing
    pub link: LinkSettings,
    /// Port selection
    pub scan: ScanSettings,
    /// Reconnect timing
    pub backoff: BackoffSettings,
    /// Delay between sample ticks
    pub poll_interval_ms: u64,
    /// Per-sink queue depth before records are dropped
    pub sink_queue_depth: usize,
    /// Downstream forward link
    pub forward: Option<ForwardSettings>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            calibration: CalibrationContext::default(),
            link: LinkSettings::default(),
            scan: ScanSettings::default(),
            backoff: BackoffSettings::default(),
            poll_interval_ms: 500,
            sink_queue_depth: 64,
            forward: None,
        }
    }
}

impl MonitorConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate JSON config text
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON text
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Delay between sample ticks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limiter = &self.calibration.limiter;
        if !self.calibration.cold_junction_c.is_finite() {
            return Err(ConfigError::Invalid(
                "cold_junction_c must be a finite number".into(),
            ));
        }
        if !(limiter.threshold_c.is_finite() && limiter.threshold_c > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "limiter.threshold_c must be positive, got {}",
                limiter.threshold_c
            )));
        }
        if !(limiter.step_c.is_finite() && limiter.step_c > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "limiter.step_c must be positive, got {}",
                limiter.step_c
            )));
        }
        if self.link.baud_rate == 0 {
            return Err(ConfigError::Invalid("link.baud_rate must be non-zero".into()));
        }
        if self.link.read_timeout_ms == 0 || self.link.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "link timeouts must be non-zero".into(),
            ));
        }
        if self.sink_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "sink_queue_depth must be at least 1".into(),
            ));
        }
        if let Some(ports) = &self.scan.ports {
            if ports.is_empty() {
                return Err(ConfigError::Invalid(
                    "scan.ports must list at least one port when set".into(),
                ));
            }
        }
        self.backoff
            .policy
            .validate()
            .map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

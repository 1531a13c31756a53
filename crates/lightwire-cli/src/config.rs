//! CLI configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/lightwire/config.toml` by default. Every section is optional;
//! missing keys take the host defaults.
//!
//! ```toml
//! [device]
//! path = "/dev/ttyACM0"
//! baud_rate = 115200
//!
//! [poller]
//! response_timeout_ms = 2000
//! max_retries = 3
//!
//! [thresholds]
//! low = 50
//! high = 800
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use lightwire_core::Thresholds;
use lightwire_host::{
    DEFAULT_BAUD_RATE, DEFAULT_DEVICE, HostConfig, LinkConfig, OverflowPolicy, PollerConfig,
    QueueConfig,
};
use serde::{Deserialize, Serialize};

use crate::cli::RunArgs;

/// Configuration for the lightwire CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Serial device settings.
    pub device: DeviceSettings,

    /// Query timeout and resend settings.
    pub poller: PollerSettings,

    /// Alert bounds.
    pub thresholds: Thresholds,

    /// Stage queue sizing.
    pub queues: QueueSettings,

    /// Console output settings.
    pub output: OutputSettings,
}

/// Serial device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub path: String,
    pub baud_rate: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Poller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    /// Milliseconds to wait for a reading before resending.
    pub response_timeout_ms: u64,

    /// Resends before giving up.
    pub max_retries: u32,

    /// Send the first query at startup.
    pub autostart: bool,
}

impl Default for PollerSettings {
    fn default() -> Self {
        let defaults = PollerConfig::default();
        Self {
            response_timeout_ms: defaults.response_timeout.as_millis() as u64,
            max_retries: defaults.max_retries,
            autostart: defaults.autostart,
        }
    }
}

/// Queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub frame_capacity: usize,
    pub event_capacity: usize,
    /// `"block"` or `"drop-oldest"`, for the alerter and display queues.
    pub overflow: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let defaults = QueueConfig::default();
        Self {
            frame_capacity: defaults.frame_capacity,
            event_capacity: defaults.event_capacity,
            overflow: defaults.event_overflow,
        }
    }
}

/// Console output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Print JSON lines instead of text.
    pub json: bool,

    /// Print every reading, not only alerts.
    pub report_readings: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            json: false,
            report_readings: true,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    ///
    /// A missing file is not an error.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lightwire")
    }

    /// Applies `run` flags on top of the file values.
    pub fn apply(&mut self, args: &RunArgs) {
        if let Some(ref device) = args.device {
            self.device.path = device.clone();
        }
        if let Some(baud) = args.baud {
            self.device.baud_rate = baud;
        }
        if let Some(ms) = args.response_timeout_ms {
            self.poller.response_timeout_ms = ms;
        }
        if let Some(retries) = args.max_retries {
            self.poller.max_retries = retries;
        }
        if let Some(low) = args.low {
            self.thresholds.low = low;
        }
        if let Some(high) = args.high {
            self.thresholds.high = high;
        }
        if args.no_readings {
            self.output.report_readings = false;
        }
    }

    /// Builds the host pipeline configuration.
    pub fn host_config(&self) -> HostConfig {
        let poller = PollerConfig::new(Duration::from_millis(self.poller.response_timeout_ms))
            .with_max_retries(self.poller.max_retries)
            .with_autostart(self.poller.autostart);

        let queues = QueueConfig::default()
            .with_frame_capacity(self.queues.frame_capacity)
            .with_event_capacity(self.queues.event_capacity)
            .with_event_overflow(self.queues.overflow);

        HostConfig::new()
            .with_poller(poller)
            .with_thresholds(self.thresholds)
            .with_queues(queues)
            .with_report_readings(self.output.report_readings)
    }

    /// Builds the serial link configuration.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::new(self.device.path.clone()).with_baud_rate(self.device.baud_rate)
    }

    /// Checks every setting the pipeline would reject at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.device.path.trim().is_empty() {
            return Err("device path must not be empty".to_string());
        }
        if self.device.baud_rate == 0 {
            return Err("baud rate must be greater than zero".to_string());
        }
        self.host_config().validate().map_err(|e| e.to_string())
    }
}

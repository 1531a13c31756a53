//! Host pipeline configuration.

use lightwire_core::Thresholds;

use crate::error::{HostError, HostResult};
use crate::poller::PollerConfig;
use crate::queue::OverflowPolicy;

/// Capacities and overflow behaviour of the stage queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Frames between the reader and the dispatcher. Always blocks when full.
    pub frame_capacity: usize,

    /// Readings and messages waiting for the alerter and display workers.
    pub event_capacity: usize,

    /// What the sink-bound queues do when full.
    pub event_overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            frame_capacity: 64,
            event_capacity: 256,
            event_overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl QueueConfig {
    /// Builder: set frame queue capacity.
    pub fn with_frame_capacity(mut self, capacity: usize) -> Self {
        self.frame_capacity = capacity;
        self
    }

    /// Builder: set event queue capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builder: set event queue overflow policy.
    pub fn with_event_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.event_overflow = policy;
        self
    }
}

/// Host pipeline configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Query cadence, timeout and resend policy.
    pub poller: PollerConfig,

    /// Alert bounds.
    pub thresholds: Thresholds,

    /// Stage queue sizing.
    pub queues: QueueConfig,

    /// Whether every reading is sent to the sink, not only alerts.
    pub report_readings: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            thresholds: Thresholds::default(),
            queues: QueueConfig::default(),
            report_readings: true,
        }
    }
}

impl HostConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set poller configuration.
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Builder: set thresholds.
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Builder: set queue configuration.
    pub fn with_queues(mut self, queues: QueueConfig) -> Self {
        self.queues = queues;
        self
    }

    /// Builder: set whether readings are reported.
    pub fn with_report_readings(mut self, report: bool) -> Self {
        self.report_readings = report;
        self
    }

    /// Checks the configuration before the pipeline starts.
    pub fn validate(&self) -> HostResult<()> {
        self.thresholds
            .validate()
            .map_err(|e| HostError::config(e.to_string()))?;

        if self.poller.response_timeout.is_zero() {
            return Err(HostError::config("response timeout must be greater than zero"));
        }
        if self.queues.frame_capacity == 0 || self.queues.event_capacity == 0 {
            return Err(HostError::config("queue capacities must be greater than zero"));
        }

        Ok(())
    }
}

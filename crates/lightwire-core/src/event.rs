//! Events delivered to the display sink.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::LightAlert;

/// A light reading published by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingEvent {
    /// Position of this reading in the stream, starting at 1.
    pub sequence: u64,
    pub value: i16,
    pub received_at: DateTime<Utc>,
}

impl ReadingEvent {
    /// Creates a reading stamped with the current time.
    pub fn now(sequence: u64, value: i16) -> Self {
        Self {
            sequence,
            value,
            received_at: Utc::now(),
        }
    }
}

impl fmt::Display for ReadingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Anything the host shows to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// A light reading.
    Reading(ReadingEvent),
    /// A threshold alert.
    Alert(LightAlert),
    /// Text sent by the device.
    Message { text: String },
}

impl HostEvent {
    /// Creates a text message event.
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message { text: text.into() }
    }

    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reading(_) => "reading",
            Self::Alert(_) => "alert",
            Self::Message { .. } => "message",
        }
    }
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reading(reading) => fmt::Display::fmt(reading, f),
            Self::Alert(alert) => fmt::Display::fmt(alert, f),
            Self::Message { text } => f.write_str(text),
        }
    }
}

impl From<ReadingEvent> for HostEvent {
    fn from(reading: ReadingEvent) -> Self {
        Self::Reading(reading)
    }
}

impl From<LightAlert> for HostEvent {
    fn from(alert: LightAlert) -> Self {
        Self::Alert(alert)
    }
}

//! Core types: readings, threshold alerts, host events, rendering, tracing

pub mod alert;
pub mod event;
pub mod format;
pub mod tracing;

pub use alert::{
    AlertLevel, DEFAULT_HIGH_THRESHOLD, DEFAULT_LOW_THRESHOLD, LightAlert, ThresholdError,
    Thresholds,
};
pub use event::{HostEvent, ReadingEvent};
pub use format::{OutputFormat, render};
pub use crate::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};

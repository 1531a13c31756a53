//! Host pipeline for the lightwire sensor.
//!
//! This crate runs the host side of the sensor protocol:
//! - a serial bridge exposing the device as an async byte stream
//! - bounded stage queues with explicit overflow policies
//! - reader, dispatcher, poller, writer, alerter and display stages
//! - a controller that spawns and supervises the stages
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lightwire_core::HostEvent;
//! use lightwire_host::{Controller, HostConfig, LinkConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = Arc::new(|event: &HostEvent| println!("{event}"));
//!     let handle = Controller::spawn_serial(&LinkConfig::default(), HostConfig::new(), sink)?;
//!     handle.shutdown_handle().spawn_signal_listener();
//!
//!     let reason = handle.join().await?;
//!     println!("stopped: {reason:?}");
//!     Ok(())
//! }
//! ```

mod config;
mod controller;
mod dispatcher;
mod error;
mod poller;
mod queue;
mod reader;
mod signals;
mod sink;
mod stats;
mod transport;
mod workers;
mod writer;

pub use config::{HostConfig, QueueConfig};
pub use controller::{Controller, ControllerHandle};
pub use dispatcher::{Routes, classify_frame, run_dispatcher};
pub use error::{HostError, HostResult};
pub use poller::{
    Poller, PollerCommand, PollerConfig, PollerHandle, PollerState, PollerTask, QueryToken, Step,
};
pub use queue::{OverflowPolicy, QueueMetrics, SendError, StageReceiver, StageSender, bounded};
pub use reader::run_reader;
pub use signals::{ShutdownHandle, ShutdownSignal, StopReason};
pub use sink::{ChannelSink, EventSink};
pub use stats::{PipelineStats, SharedStats, StatsSnapshot};
pub use transport::{
    DEFAULT_BAUD_RATE, DEFAULT_DEVICE, LinkConfig, PortSummary, SerialLink, available_ports,
};
pub use workers::{AlerterConfig, run_alerter, run_display};
pub use writer::{OUTBOUND_CAPACITY, OutboundQuery, WriterHandle, outbound_queue, run_writer};

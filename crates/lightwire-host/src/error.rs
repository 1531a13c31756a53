//! Host error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors that stop the host pipeline.
///
/// Malformed or unknown frames never show up here: they are dropped and
/// counted by the dispatcher.
#[derive(Debug, Error)]
pub enum HostError {
    /// IO error on the transport.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol-level IO failure while reading or writing frames.
    #[error("Protocol error: {0}")]
    Protocol(#[from] lightwire_protocol::ProtocolError),

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The device never answered a query, even after resending it.
    #[error("No reading received after {attempts} queries ({timeout:?} each)")]
    ResponseTimeout { attempts: u32, timeout: Duration },

    /// A pipeline queue closed while a stage still needed it.
    #[error("Pipeline channel closed: {stage}")]
    ChannelClosed { stage: &'static str },

    /// A stage task panicked or was aborted.
    #[error("Pipeline stage failed: {message}")]
    WorkerFailed { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl HostError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a channel closed error.
    pub fn channel_closed(stage: &'static str) -> Self {
        Self::ChannelClosed { stage }
    }

    /// Creates a worker failed error.
    pub fn worker_failed(message: impl Into<String>) -> Self {
        Self::WorkerFailed {
            message: message.into(),
        }
    }

    /// Returns true if the error came from the transport itself.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::Serial(_) => true,
            Self::Protocol(e) => matches!(e, lightwire_protocol::ProtocolError::Io(_)),
            _ => false,
        }
    }
}

//! Run command: polls the sensor in the foreground until the device goes
//! away, the link stalls, or a shutdown signal arrives.

use std::sync::Arc;

use lightwire_core::OutputFormat;
use lightwire_host::{Controller, StopReason};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::config::ClientConfig;
use crate::error::{CliError, CliResult};
use crate::output::ConsoleSink;

/// Starts the pipeline on the configured serial device and waits for it.
pub async fn run(args: &RunArgs, config: &ClientConfig, format: OutputFormat) -> CliResult<()> {
    let mut config = config.clone();
    config.apply(args);
    config.validate().map_err(CliError::Config)?;

    let link = config.link_config();
    info!(device = %link.path, baud_rate = link.baud_rate, "Opening sensor link");

    let sink = Arc::new(ConsoleSink::new(format));
    let handle = Controller::spawn_serial(&link, config.host_config(), sink)?;
    handle.shutdown_handle().spawn_signal_listener();

    let (result, stats) = handle.finish().await;
    info!(%stats, "Final counters");
    if stats.dropped_frames() > 0 {
        warn!(
            decode_failures = stats.decode_failures,
            protocol_violations = stats.protocol_violations,
            "Some frames were dropped"
        );
    }

    match result? {
        StopReason::TransportClosed => warn!(device = %link.path, "Sensor disconnected"),
        StopReason::Shutdown => info!("Stopped"),
    }
    Ok(())
}

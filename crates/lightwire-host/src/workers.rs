//! Sink-facing workers: threshold alerts and device text.

use std::sync::Arc;

use lightwire_core::{HostEvent, LightAlert, ReadingEvent, Thresholds};
use lightwire_protocol::StringMessage;
use tracing::{debug, info};

use crate::queue::StageReceiver;
use crate::signals::ShutdownHandle;
use crate::sink::EventSink;
use crate::stats::{PipelineStats, SharedStats};

/// Alerter settings.
#[derive(Debug, Clone, Copy)]
pub struct AlerterConfig {
    pub thresholds: Thresholds,
    /// Emit every reading, not only alerts.
    pub report_readings: bool,
}

/// Evaluates every published reading against the thresholds.
///
/// Stateless per reading: a value that stays out of bounds alerts again
/// each time it is read.
pub async fn run_alerter(
    mut readings: StageReceiver<ReadingEvent>,
    config: AlerterConfig,
    sink: Arc<dyn EventSink>,
    stats: SharedStats,
    shutdown: ShutdownHandle,
) {
    loop {
        let reading = tokio::select! {
            biased;
            _ = shutdown.wait().wait() => break,
            reading = readings.recv() => match reading {
                Some(reading) => reading,
                None => break,
            },
        };

        if config.report_readings {
            sink.emit(&HostEvent::Reading(reading));
        }

        for level in config.thresholds.evaluate(reading.value) {
            PipelineStats::incr(&stats.alerts);
            let alert = LightAlert {
                level,
                value: reading.value,
                sequence: reading.sequence,
            };
            info!(%alert, sequence = reading.sequence, "Threshold crossed");
            sink.emit(&HostEvent::Alert(alert));
        }
    }

    debug!("Alerter stopped");
}

/// Shows device text messages.
pub async fn run_display(
    mut messages: StageReceiver<StringMessage>,
    sink: Arc<dyn EventSink>,
    shutdown: ShutdownHandle,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.wait().wait() => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        sink.emit(&HostEvent::message(message.into_string()));
    }

    debug!("Display stopped");
}

//! Wires the stages together and supervises them.
//!
//! ```text
//!              frames (block)         readings (block)
//! reader ─────────────────► dispatcher ───────────────► poller ──► writer
//!                               │                          │
//!                               │ messages                 │ reading events
//!                               ▼                          ▼
//!                            display                    alerter
//!                               └──────────► sink ◄────────┘
//! ```
//!
//! Every stage is a task in one `JoinSet`. End of stream on the transport
//! closes the reader's queue, and each stage exits in turn once its input
//! queue drains. A failing stage triggers shutdown for all the others.

use std::sync::Arc;

use lightwire_protocol::{FrameReader, FrameWriter};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span};

use crate::config::HostConfig;
use crate::dispatcher::{Routes, run_dispatcher};
use crate::error::{HostError, HostResult};
use crate::poller::{PollerHandle, PollerTask};
use crate::queue::{OverflowPolicy, QueueMetrics, bounded};
use crate::reader::run_reader;
use crate::signals::{ShutdownHandle, StopReason};
use crate::sink::EventSink;
use crate::stats::{PipelineStats, SharedStats, StatsSnapshot};
use crate::transport::{LinkConfig, SerialLink};
use crate::workers::{AlerterConfig, run_alerter, run_display};
use crate::writer::{outbound_queue, run_writer};

type StageOutcome = (&'static str, HostResult<Option<StopReason>>);

/// Starts host pipelines.
pub struct Controller;

impl Controller {
    /// Spawns the pipeline over any byte stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T>(
        transport: T,
        config: HostConfig,
        sink: Arc<dyn EventSink>,
    ) -> HostResult<ControllerHandle>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;

        let (read_half, write_half) = tokio::io::split(transport);
        let stats = PipelineStats::shared();
        let shutdown = ShutdownHandle::new();
        let queues = &config.queues;

        let (frames_tx, frames_rx) = bounded("frames", queues.frame_capacity, OverflowPolicy::Block);
        let (inbox_tx, inbox_rx) = bounded("poller", queues.frame_capacity, OverflowPolicy::Block);
        let (messages_tx, messages_rx) =
            bounded("display", queues.event_capacity, queues.event_overflow);
        let (readings_tx, readings_rx) =
            bounded("alerter", queues.event_capacity, queues.event_overflow);
        let (writer, outbound_rx) = outbound_queue();

        let metrics = vec![
            frames_tx.metrics(),
            inbox_tx.metrics(),
            messages_tx.metrics(),
            readings_tx.metrics(),
        ];

        let (poller, poller_handle) = PollerTask::new(
            config.poller.clone(),
            inbox_rx,
            writer,
            readings_tx,
            stats.clone(),
            shutdown.clone(),
        );

        let mut tasks: JoinSet<StageOutcome> = JoinSet::new();

        tasks.spawn(
            {
                let reader = FrameReader::new(read_half);
                let (stats, shutdown) = (stats.clone(), shutdown.clone());
                async move {
                    let result = run_reader(reader, frames_tx, stats, shutdown).await;
                    ("reader", result.map(Some))
                }
            }
            .instrument(info_span!("reader")),
        );

        tasks.spawn(
            {
                let routes = Routes {
                    readings: inbox_tx,
                    messages: messages_tx,
                };
                let (stats, shutdown) = (stats.clone(), shutdown.clone());
                async move {
                    let result = run_dispatcher(frames_rx, routes, stats, shutdown).await;
                    ("dispatcher", result.map(|()| None))
                }
            }
            .instrument(info_span!("dispatcher")),
        );

        tasks.spawn(
            async move { ("poller", poller.run().await.map(Some)) }.instrument(info_span!("poller")),
        );

        tasks.spawn(
            {
                let writer = FrameWriter::new(write_half);
                let (stats, shutdown) = (stats.clone(), shutdown.clone());
                async move {
                    let result = run_writer(writer, outbound_rx, stats, shutdown).await;
                    ("writer", result.map(|()| None))
                }
            }
            .instrument(info_span!("writer")),
        );

        tasks.spawn(
            {
                let alerter = AlerterConfig {
                    thresholds: config.thresholds,
                    report_readings: config.report_readings,
                };
                let (sink, stats, shutdown) = (sink.clone(), stats.clone(), shutdown.clone());
                async move {
                    run_alerter(readings_rx, alerter, sink, stats, shutdown).await;
                    ("alerter", Ok(None))
                }
            }
            .instrument(info_span!("alerter")),
        );

        tasks.spawn(
            {
                let shutdown = shutdown.clone();
                async move {
                    run_display(messages_rx, sink, shutdown).await;
                    ("display", Ok(None))
                }
            }
            .instrument(info_span!("display")),
        );

        info!(
            timeout_ms = config.poller.response_timeout.as_millis() as u64,
            max_retries = config.poller.max_retries,
            low = config.thresholds.low,
            high = config.thresholds.high,
            "Pipeline started"
        );

        let supervisor = tokio::spawn(supervise(tasks, shutdown.clone()));

        Ok(ControllerHandle {
            shutdown,
            poller: poller_handle,
            stats,
            queues: metrics,
            supervisor,
        })
    }

    /// Opens the serial device and spawns the pipeline on it.
    pub fn spawn_serial(
        link: &LinkConfig,
        config: HostConfig,
        sink: Arc<dyn EventSink>,
    ) -> HostResult<ControllerHandle> {
        config.validate()?;
        let link = SerialLink::open(link)?;
        Self::spawn(link, config, sink)
    }
}

/// Waits for every stage and folds their outcomes into one result.
///
/// The first error wins; otherwise the reader decides why the pipeline
/// stopped.
async fn supervise(
    mut tasks: JoinSet<StageOutcome>,
    shutdown: ShutdownHandle,
) -> HostResult<StopReason> {
    let mut failure: Option<HostError> = None;
    let mut reason: Option<StopReason> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((stage, Ok(stopped))) => {
                debug!(stage, ?stopped, "Stage finished");
                if stage == "reader" {
                    reason = stopped;
                }
            }
            Ok((stage, Err(e))) => {
                error!(stage, error = %e, "Stage failed");
                shutdown.trigger();
                failure.get_or_insert(e);
            }
            Err(e) => {
                error!(error = %e, "Stage task did not complete");
                shutdown.trigger();
                failure.get_or_insert(HostError::worker_failed(e.to_string()));
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            let reason = reason.unwrap_or(StopReason::Shutdown);
            info!(?reason, "Pipeline stopped");
            Ok(reason)
        }
    }
}

/// Handle to a running pipeline.
pub struct ControllerHandle {
    shutdown: ShutdownHandle,
    poller: PollerHandle,
    stats: SharedStats,
    queues: Vec<Arc<QueueMetrics>>,
    supervisor: JoinHandle<HostResult<StopReason>>,
}

impl ControllerHandle {
    /// Starts the query cadence if it is idle.
    pub async fn trigger(&self) -> HostResult<()> {
        self.poller.trigger().await
    }

    /// Stops sending queries until the next trigger.
    pub async fn pause(&self) -> HostResult<()> {
        self.poller.pause().await
    }

    /// Asks every stage to stop.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Returns a clone of the pipeline's shutdown handle.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Reads the current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(&self.queues)
    }

    /// Overflow drops of each stage queue, by name.
    pub fn queue_drops(&self) -> Vec<(&'static str, u64)> {
        self.queues.iter().map(|q| (q.name(), q.dropped())).collect()
    }

    /// Waits for the pipeline to stop.
    pub async fn join(self) -> HostResult<StopReason> {
        self.finish().await.0
    }

    /// Waits for the pipeline to stop and returns the final counters too.
    pub async fn finish(self) -> (HostResult<StopReason>, StatsSnapshot) {
        let result = match self.supervisor.await {
            Ok(result) => result,
            Err(e) => Err(HostError::worker_failed(e.to_string())),
        };
        (result, self.stats.snapshot(&self.queues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::PollerConfig;
    use crate::sink::ChannelSink;
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_invalid_config() {
        let (host, _device) = tokio::io::duplex(64);
        let (sink, _events) = ChannelSink::channel();
        let config = HostConfig::new().with_poller(PollerConfig::new(Duration::ZERO));
        let result = Controller::spawn(host, config, Arc::new(sink));
        assert!(matches!(result, Err(HostError::Config { .. })));
    }

    #[tokio::test]
    async fn shutdown_stops_every_stage() {
        let (host, _device) = tokio::io::duplex(64);
        let (sink, _events) = ChannelSink::channel();
        let handle = Controller::spawn(host, HostConfig::new(), Arc::new(sink)).unwrap();

        let drops = handle.queue_drops();
        assert_eq!(drops.len(), 4);
        assert!(drops.iter().all(|(_, dropped)| *dropped == 0));
        handle.shutdown();
        let reason = tokio::time::timeout(Duration::from_secs(1), handle.join()).await;
        assert_eq!(reason.unwrap().unwrap(), StopReason::Shutdown);
    }

    #[tokio::test]
    async fn eof_stops_cleanly() {
        let (host, device) = tokio::io::duplex(64);
        let (sink, _events) = ChannelSink::channel();
        let handle = Controller::spawn(host, HostConfig::new(), Arc::new(sink)).unwrap();

        drop(device);
        let reason = tokio::time::timeout(Duration::from_secs(1), handle.join()).await;
        assert_eq!(reason.unwrap().unwrap(), StopReason::TransportClosed);
    }

    #[tokio::test]
    async fn finish_reports_final_counters() {
        let (host, device) = tokio::io::duplex(64);
        let (sink, _events) = ChannelSink::channel();
        let handle = Controller::spawn(host, HostConfig::new(), Arc::new(sink)).unwrap();

        let (mut rx, _tx) = tokio::io::split(device);
        let mut kickoff = [0u8; 5];
        tokio::io::AsyncReadExt::read_exact(&mut rx, &mut kickoff)
            .await
            .unwrap();
        assert_eq!(&kickoff, b"/wAA\n");

        handle.shutdown();
        let (result, stats) = handle.finish().await;
        assert_eq!(result.unwrap(), StopReason::Shutdown);
        assert_eq!(stats.queries, 1);
        assert_eq!(stats.readings, 0);
    }

    struct FailingDevice;

    impl std::io::Read for FailingDevice {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("EIO"))
        }
    }

    impl std::io::Write for FailingDevice {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("EIO"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct QuietDevice;

    impl std::io::Read for QuietDevice {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(std::io::ErrorKind::TimedOut.into())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serial_read_error_fails_the_pipeline() {
        let link = SerialLink::bridge("mem", FailingDevice, std::io::sink()).unwrap();
        let (sink, _events) = ChannelSink::channel();
        let handle = Controller::spawn(link, HostConfig::new(), Arc::new(sink)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle.join()).await;
        let err = result.unwrap().unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serial_write_error_fails_the_pipeline() {
        let link = SerialLink::bridge("mem", QuietDevice, FailingDevice).unwrap();
        let (sink, _events) = ChannelSink::channel();
        let config = HostConfig::new()
            .with_poller(PollerConfig::new(Duration::from_millis(20)).with_max_retries(10));
        let handle = Controller::spawn(link, config, Arc::new(sink)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle.join()).await;
        let err = result.unwrap().unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}

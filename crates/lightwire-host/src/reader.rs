//! Inbound stage: transport bytes to frames.

use bytes::Bytes;
use lightwire_protocol::FrameReader;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::error::{HostError, HostResult};
use crate::queue::StageSender;
use crate::signals::{ShutdownHandle, StopReason};
use crate::stats::{PipelineStats, SharedStats};

/// Reads frames until end of stream or shutdown.
///
/// Blocks on a full frame queue, which in turn stops reading from the
/// transport. Read errors are fatal.
pub async fn run_reader<R>(
    mut reader: FrameReader<R>,
    frames: StageSender<Bytes>,
    stats: SharedStats,
    shutdown: ShutdownHandle,
) -> HostResult<StopReason>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.wait().wait() => return Ok(StopReason::Shutdown),
            frame = reader.read_frame() => frame?,
        };

        let Some(frame) = frame else {
            info!("Transport closed");
            return Ok(StopReason::TransportClosed);
        };

        let count = PipelineStats::incr(&stats.frames);
        debug!(len = frame.len(), count, "Frame received");

        if frames.send(frame).await.is_err() {
            if shutdown.is_shutdown() {
                return Ok(StopReason::Shutdown);
            }
            return Err(HostError::channel_closed("dispatcher"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{OverflowPolicy, bounded};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn forwards_frames_until_eof() {
        let (mut device, host) = tokio::io::duplex(64);
        let (tx, mut rx) = bounded("frames", 8, OverflowPolicy::Block);
        let stats = PipelineStats::shared();
        let task = tokio::spawn(run_reader(
            FrameReader::new(host),
            tx,
            stats.clone(),
            ShutdownHandle::new(),
        ));

        device.write_all(b"AAEA").await.unwrap();
        device.write_all(b"ewA=\n\nAAAC").await.unwrap();
        drop(device);

        assert_eq!(task.await.unwrap().unwrap(), StopReason::TransportClosed);
        assert_eq!(rx.recv().await.unwrap(), &b"AAEAewA="[..]);
        assert_eq!(rx.recv().await.unwrap(), &b""[..]);
        assert_eq!(rx.recv().await, None);
        assert_eq!(stats.snapshot(&[]).frames, 2);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (_device, host) = tokio::io::duplex(64);
        let (tx, _rx) = bounded("frames", 8, OverflowPolicy::Block);
        let shutdown = ShutdownHandle::new();
        let task = tokio::spawn(run_reader(
            FrameReader::new(host),
            tx,
            PipelineStats::shared(),
            shutdown.clone(),
        ));

        shutdown.trigger();
        assert_eq!(task.await.unwrap().unwrap(), StopReason::Shutdown);
    }

    #[tokio::test]
    async fn closed_dispatcher_is_an_error() {
        let (mut device, host) = tokio::io::duplex(64);
        let (tx, rx) = bounded("frames", 8, OverflowPolicy::Block);
        drop(rx);
        let task = tokio::spawn(run_reader(
            FrameReader::new(host),
            tx,
            PipelineStats::shared(),
            ShutdownHandle::new(),
        ));

        device.write_all(b"AAEAewA=\n").await.unwrap();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, HostError::ChannelClosed { stage: "dispatcher" }));
    }
}

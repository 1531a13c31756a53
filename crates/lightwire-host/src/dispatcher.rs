//! Decodes frames in arrival order and routes them by packet type.
//!
//! Readings go to the poller, text goes to the display worker. Frames that
//! fail to decode or carry an unknown type are counted and dropped; they
//! never stop the pipeline.

use bytes::Bytes;
use lightwire_protocol::{LightReading, Message, Packet, ProtocolResult, StringMessage};
use tracing::{debug, trace};

use crate::error::{HostError, HostResult};
use crate::queue::{StageReceiver, StageSender};
use crate::signals::ShutdownHandle;
use crate::stats::{PipelineStats, SharedStats};

/// Downstream queues of the dispatcher.
pub struct Routes {
    /// Poller inbox.
    pub readings: StageSender<LightReading>,
    /// Display worker queue.
    pub messages: StageSender<StringMessage>,
}

/// Decodes and classifies one frame.
pub fn classify_frame(frame: &[u8]) -> ProtocolResult<Message> {
    Packet::decode(frame)?.classify()
}

/// Dispatches frames until the frame queue closes or shutdown.
pub async fn run_dispatcher(
    mut frames: StageReceiver<Bytes>,
    routes: Routes,
    stats: SharedStats,
    shutdown: ShutdownHandle,
) -> HostResult<()> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.wait().wait() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = dispatch(&frame, &routes, &stats).await {
            if shutdown.is_shutdown() {
                break;
            }
            return Err(e);
        }
    }

    debug!("Dispatcher stopped");
    Ok(())
}

async fn dispatch(frame: &[u8], routes: &Routes, stats: &PipelineStats) -> HostResult<()> {
    match classify_frame(frame) {
        Ok(Message::Reading(reading)) => {
            trace!(value = reading.value(), "Light reading");
            routes
                .readings
                .send(reading)
                .await
                .map_err(|_| HostError::channel_closed("poller"))
        }
        Ok(Message::Text(text)) => {
            PipelineStats::incr(&stats.messages);
            trace!(len = text.text().len(), "Text message");
            routes
                .messages
                .send(text)
                .await
                .map_err(|_| HostError::channel_closed("display"))
        }
        Err(e) if e.is_protocol_violation() => {
            let total = PipelineStats::incr(&stats.protocol_violations);
            trace!(error = %e, total, "Dropped frame");
            Ok(())
        }
        Err(e) => {
            let total = PipelineStats::incr(&stats.decode_failures);
            debug!(error = %e, len = frame.len(), total, "Dropped undecodable frame");
            Ok(())
        }
    }
}

//! Outbound stage: the only task that writes to the transport.
//!
//! ```text
//! poller --submit()--> outbound queue --> writer task --> transport
//! ```
//!
//! Submitting only queues the query; the poller never waits for the flush,
//! so a slow device cannot stall frame ingestion. The writer performs one
//! write + flush at a time.

use std::io;

use lightwire_protocol::{FrameWriter, ProtocolError, QueryCommand};
use tokio::io::AsyncWrite;
use tracing::{debug, info, trace};

use crate::error::{HostError, HostResult};
use crate::poller::QueryToken;
use crate::queue::{OverflowPolicy, StageReceiver, StageSender, bounded};
use crate::signals::ShutdownHandle;
use crate::stats::{PipelineStats, SharedStats};

/// Outbound queue depth. The poller keeps at most one query outstanding.
pub const OUTBOUND_CAPACITY: usize = 4;

/// A query waiting to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundQuery {
    pub token: QueryToken,
    /// 1 for the first send, incremented on each resend.
    pub attempt: u32,
}

/// Handle for queueing queries to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: StageSender<OutboundQuery>,
}

impl WriterHandle {
    /// Queues a query for writing.
    pub async fn submit(&self, query: OutboundQuery) -> HostResult<()> {
        self.tx
            .send(query)
            .await
            .map_err(|_| HostError::channel_closed("writer"))
    }
}

/// Creates the outbound queue.
pub fn outbound_queue() -> (WriterHandle, StageReceiver<OutboundQuery>) {
    let (tx, rx) = bounded("outbound", OUTBOUND_CAPACITY, OverflowPolicy::Block);
    (WriterHandle { tx }, rx)
}

/// Writes queued queries until the queue closes or shutdown.
///
/// A closed peer is not an error here: later queries are discarded and
/// the reader reports the closure. Any other write failure is fatal.
pub async fn run_writer<W>(
    mut writer: FrameWriter<W>,
    mut queries: StageReceiver<OutboundQuery>,
    stats: SharedStats,
    shutdown: ShutdownHandle,
) -> HostResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut peer_closed = false;

    loop {
        let query = tokio::select! {
            biased;
            _ = shutdown.wait().wait() => break,
            query = queries.recv() => match query {
                Some(query) => query,
                None => break,
            },
        };

        if peer_closed {
            trace!(token = %query.token, "Transport closed, query discarded");
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.wait().wait() => break,
            result = writer.write_packet(QueryCommand.as_bytes()) => result,
        };

        match result {
            Ok(()) => {
                let total = PipelineStats::incr(&stats.queries);
                trace!(token = %query.token, attempt = query.attempt, total, "Query written");
            }
            Err(ProtocolError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                // The reader sees the same closure as end of stream.
                info!("Transport closed for writing");
                peer_closed = true;
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!("Writer stopped");
    Ok(())
}

//! Pipeline counters.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::queue::QueueMetrics;

/// Counters updated by the stage tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Frames split off the byte stream
    pub frames: AtomicU64,
    /// Frames dropped for bad encoding or truncated payloads
    pub decode_failures: AtomicU64,
    /// Frames dropped for an unknown discriminator
    pub protocol_violations: AtomicU64,
    pub readings: AtomicU64,
    pub messages: AtomicU64,
    /// Query commands written to the transport, resends included
    pub queries: AtomicU64,
    pub retries: AtomicU64,
    pub alerts: AtomicU64,
}

/// Shared pipeline counters.
pub type SharedStats = Arc<PipelineStats>;

impl PipelineStats {
    /// Creates a zeroed, shareable set of counters.
    pub fn shared() -> SharedStats {
        Arc::new(Self::default())
    }

    pub(crate) fn incr(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reads every counter. Queue drops are summed from `queues`.
    pub fn snapshot(&self, queues: &[Arc<QueueMetrics>]) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            readings: self.readings.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            overflow_drops: queues.iter().map(|q| q.dropped()).sum(),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub decode_failures: u64,
    pub protocol_violations: u64,
    pub readings: u64,
    pub messages: u64,
    pub queries: u64,
    pub retries: u64,
    pub alerts: u64,
    pub overflow_drops: u64,
}

impl StatsSnapshot {
    /// Frames that were dropped for any reason.
    pub fn dropped_frames(&self) -> u64 {
        self.decode_failures + self.protocol_violations
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} readings={} messages={} queries={} retries={} alerts={} \
             decode_failures={} protocol_violations={} overflow_drops={}",
            self.frames,
            self.readings,
            self.messages,
            self.queries,
            self.retries,
            self.alerts,
            self.decode_failures,
            self.protocol_violations,
            self.overflow_drops,
        )
    }
}

//! Bounded queues connecting pipeline stages.
//!
//! Every stage hands work to the next one through a [`bounded`] queue with
//! an explicit [`OverflowPolicy`]:
//!
//! - `Block`: a full queue suspends the sender until the receiver catches
//!   up (backpressure towards the transport reader). Backed by
//!   [`tokio::sync::mpsc`].
//! - `DropOldest`: a full queue discards its oldest item to make room, so a
//!   slow consumer only ever sees the most recent `capacity` items. Backed
//!   by [`tokio::sync::broadcast`] with a single subscriber; evictions
//!   surface as `Lagged` on the receiving side and are counted there.
//!
//! Queues are multi-producer, single-consumer. The receiver sees `None`
//! once every sender is gone and the queue is drained; senders get their
//! item back once the receiver is gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

pub use tokio::sync::mpsc::error::SendError;

/// What a full queue does with a new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for free space.
    #[default]
    Block,
    /// Evict the oldest queued item.
    DropOldest,
}

/// Shared counters for one queue, for stats reporting.
#[derive(Debug)]
pub struct QueueMetrics {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl QueueMetrics {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Effective capacity. `DropOldest` queues round up to a power of two.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Items evicted by `DropOldest`, as observed by the receiver so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drops(&self, n: u64) {
        let total = self.dropped.fetch_add(n, Ordering::Relaxed) + n;
        debug!(
            queue = self.name,
            dropped = n,
            dropped_total = total,
            "Queue overflowed, oldest items dropped"
        );
    }
}

/// Creates a queue holding at most `capacity` items (minimum 1).
pub fn bounded<T: Clone>(
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
) -> (StageSender<T>, StageReceiver<T>) {
    let capacity = match policy {
        OverflowPolicy::Block => capacity.max(1),
        OverflowPolicy::DropOldest => capacity.max(1).next_power_of_two(),
    };
    let metrics = Arc::new(QueueMetrics {
        name,
        capacity,
        policy,
        dropped: AtomicU64::new(0),
    });

    match policy {
        OverflowPolicy::Block => {
            let (tx, rx) = mpsc::channel(capacity);
            (
                StageSender {
                    tx: Tx::Block(tx),
                    metrics: metrics.clone(),
                },
                StageReceiver {
                    rx: Rx::Block(rx),
                    metrics,
                },
            )
        }
        OverflowPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (
                StageSender {
                    tx: Tx::DropOldest(tx),
                    metrics: metrics.clone(),
                },
                StageReceiver {
                    rx: Rx::DropOldest(rx),
                    metrics,
                },
            )
        }
    }
}

#[derive(Debug)]
enum Tx<T> {
    Block(mpsc::Sender<T>),
    DropOldest(broadcast::Sender<T>),
}

#[derive(Debug)]
enum Rx<T> {
    Block(mpsc::Receiver<T>),
    DropOldest(broadcast::Receiver<T>),
}

/// Sending half of a stage queue.
#[derive(Debug)]
pub struct StageSender<T> {
    tx: Tx<T>,
    metrics: Arc<QueueMetrics>,
}

impl<T> StageSender<T> {
    /// Queues an item, applying the overflow policy when full.
    ///
    /// Only `Block` queues ever wait.
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        match &self.tx {
            Tx::Block(tx) => tx.send(item).await,
            Tx::DropOldest(tx) => tx
                .send(item)
                .map(|_| ())
                .map_err(|broadcast::error::SendError(item)| SendError(item)),
        }
    }

    /// Returns true once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Tx::Block(tx) => tx.is_closed(),
            Tx::DropOldest(tx) => tx.receiver_count() == 0,
        }
    }

    /// Returns the stats view of this queue.
    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }
}

impl<T> Clone for StageSender<T> {
    fn clone(&self) -> Self {
        let tx = match &self.tx {
            Tx::Block(tx) => Tx::Block(tx.clone()),
            Tx::DropOldest(tx) => Tx::DropOldest(tx.clone()),
        };
        Self {
            tx,
            metrics: self.metrics.clone(),
        }
    }
}

/// Receiving half of a stage queue.
#[derive(Debug)]
pub struct StageReceiver<T> {
    rx: Rx<T>,
    metrics: Arc<QueueMetrics>,
}

impl<T: Clone> StageReceiver<T> {
    /// Takes the next item, waiting if the queue is empty.
    ///
    /// Returns `None` once all senders are dropped and the queue is drained.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.rx {
            Rx::Block(rx) => rx.recv().await,
            Rx::DropOldest(rx) => loop {
                match rx.recv().await {
                    Ok(item) => return Some(item),
                    Err(RecvError::Lagged(n)) => self.metrics.record_drops(n),
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Takes the next item if one is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        match &mut self.rx {
            Rx::Block(rx) => rx.try_recv().ok(),
            Rx::DropOldest(rx) => loop {
                match rx.try_recv() {
                    Ok(item) => return Some(item),
                    Err(TryRecvError::Lagged(n)) => self.metrics.record_drops(n),
                    Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
                }
            },
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        match &self.rx {
            Rx::Block(rx) => rx.len(),
            Rx::DropOldest(rx) => rx.len().min(self.metrics.capacity),
        }
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items evicted by `DropOldest` so far.
    pub fn dropped(&self) -> u64 {
        self.metrics.dropped()
    }
}

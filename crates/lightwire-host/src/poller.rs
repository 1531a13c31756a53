//! Light poller: the call/response cadence.
//!
//! The device sends one reading per query. The poller keeps exactly one
//! query outstanding, identified by a [`QueryToken`], and issues the next
//! one only after the current one is answered:
//!
//! ```text
//!            trigger                        reading
//!   Idle ───────────────► AwaitingResponse ────────┐
//!                           ▲   │  publish + query │
//!                           │   └──────────────────┘
//!                           │ deadline: resend (attempt + 1)
//!                           └──────── until max_retries, then fatal
//! ```
//!
//! The device protocol has no timeout of its own. A lost query or reading
//! would stall the cadence forever, so the poller resends after
//! `response_timeout` and gives up with [`HostError::ResponseTimeout`] once
//! `max_retries` resends went unanswered.
//!
//! Readings carry no token, so after a resend the poller cannot tell a late
//! reply to an earlier send from the reply to the resend. It counts the sends
//! still owed a reply: a reading that arrives while more than one is owed is
//! published without a new query, and the resend keeps waiting with a fresh
//! deadline and retry budget. If that deadline passes too, the remaining
//! sends are presumed lost. This keeps at most one query in flight at the
//! device; a genuinely lost query costs one `response_timeout` per reading
//! until the next clean exchange.
//!
//! [`Poller`] is the pure state machine; [`PollerTask`] drives it from the
//! pipeline queues.

use std::fmt;
use std::time::Duration;

use lightwire_core::ReadingEvent;
use lightwire_protocol::LightReading;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::error::{HostError, HostResult};
use crate::queue::{StageReceiver, StageSender};
use crate::signals::{ShutdownHandle, StopReason};
use crate::stats::{PipelineStats, SharedStats};
use crate::writer::{OutboundQuery, WriterHandle};

/// Poller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// How long to wait for a reading before resending the query.
    pub response_timeout: Duration,
    /// Resends before giving up.
    pub max_retries: u32,
    /// Send the first query as soon as the pipeline starts.
    pub autostart: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(2),
            max_retries: 3,
            autostart: true,
        }
    }
}

impl PollerConfig {
    /// Creates a poller config with the given response timeout.
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            response_timeout,
            ..Default::default()
        }
    }

    /// Builder: set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder: set autostart.
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Total queries sent for one reading before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Identifies the outstanding query. Every send, resends included, gets a
/// fresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryToken(u64);

impl QueryToken {
    /// Wraps a raw token id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw token id. Ids start at 1 and increase with every send.
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Poller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No query outstanding.
    Idle,
    /// One query outstanding.
    AwaitingResponse {
        token: QueryToken,
        /// 1 for the first send.
        attempt: u32,
        deadline: Instant,
    },
    /// Terminal.
    Stopped,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing.
    Ignore,
    /// Send a query.
    Query(OutboundQuery),
    /// Publish the reading, then send the next query.
    PublishAndQuery(OutboundQuery),
    /// Publish the reading without sending a query: it was unsolicited,
    /// or answered an earlier send while a resend is still outstanding.
    Publish,
    /// The outstanding query was never answered.
    GiveUp { attempts: u32 },
}

/// The call/response state machine. Time is passed in, never read.
#[derive(Debug)]
pub struct Poller {
    config: PollerConfig,
    state: PollerState,
    next_token: u64,
    /// Sends since the last query that started a fresh exchange.
    unanswered: u32,
    /// A reading was matched to an earlier send since the last send.
    late_reply: bool,
}

impl Poller {
    /// Creates an idle poller.
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            state: PollerState::Idle,
            next_token: 1,
            unanswered: 0,
            late_reply: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Configuration this poller was built with.
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Sends that may still be answered by the device.
    pub fn unanswered(&self) -> u32 {
        match self.state {
            PollerState::AwaitingResponse { .. } => self.unanswered,
            _ => 0,
        }
    }

    /// Token of the outstanding query, if any.
    pub fn outstanding(&self) -> Option<QueryToken> {
        match self.state {
            PollerState::AwaitingResponse { token, .. } => Some(token),
            _ => None,
        }
    }

    /// When the outstanding query times out.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            PollerState::AwaitingResponse { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    /// Start or external trigger. Ignored unless idle.
    pub fn trigger(&mut self, now: Instant) -> Step {
        match self.state {
            PollerState::Idle => Step::Query(self.send(1, now)),
            PollerState::AwaitingResponse { token, .. } => {
                trace!(outstanding = %token, "Trigger ignored, query outstanding");
                Step::Ignore
            }
            PollerState::Stopped => Step::Ignore,
        }
    }

    /// A light reading arrived.
    pub fn on_reading(&mut self, now: Instant) -> Step {
        match self.state {
            PollerState::AwaitingResponse { token, .. } if self.unanswered > 1 => {
                self.unanswered -= 1;
                self.late_reply = true;
                self.state = PollerState::AwaitingResponse {
                    token,
                    attempt: 1,
                    deadline: now + self.config.response_timeout,
                };
                debug!(
                    outstanding = %token,
                    unanswered = self.unanswered,
                    "Reading answers an earlier send, query still outstanding"
                );
                Step::Publish
            }
            PollerState::AwaitingResponse { .. } => Step::PublishAndQuery(self.send(1, now)),
            PollerState::Idle => Step::Publish,
            PollerState::Stopped => Step::Ignore,
        }
    }

    /// Checks the outstanding query against `now`.
    pub fn on_deadline(&mut self, now: Instant) -> Step {
        let PollerState::AwaitingResponse {
            token,
            attempt,
            deadline,
        } = self.state
        else {
            return Step::Ignore;
        };

        if now < deadline {
            return Step::Ignore;
        }

        if attempt >= self.config.max_attempts() {
            self.state = PollerState::Stopped;
            return Step::GiveUp { attempts: attempt };
        }

        debug!(expired = %token, attempt = attempt + 1, "No reading in time, resending query");
        Step::Query(self.send(attempt + 1, now))
    }

    /// Drops the outstanding query, if any, and returns to idle.
    ///
    /// A reading that still arrives for it is published as unsolicited.
    pub fn pause(&mut self) {
        if self.state != PollerState::Stopped {
            self.state = PollerState::Idle;
        }
        self.unanswered = 0;
        self.late_reply = false;
    }

    /// Enters the terminal state.
    pub fn stop(&mut self) {
        self.state = PollerState::Stopped;
    }

    fn send(&mut self, attempt: u32, now: Instant) -> OutboundQuery {
        // A fresh exchange, or a resend after the owed reply never came.
        if attempt == 1 || self.late_reply {
            self.unanswered = 0;
            self.late_reply = false;
        }
        self.unanswered += 1;

        let token = QueryToken(self.next_token);
        self.next_token += 1;
        self.state = PollerState::AwaitingResponse {
            token,
            attempt,
            deadline: now + self.config.response_timeout,
        };
        OutboundQuery { token, attempt }
    }
}

/// Commands accepted by a running poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerCommand {
    /// Send a query if none is outstanding.
    Trigger,
    /// Stop querying until the next trigger.
    Pause,
}

/// Handle for sending commands to a running poller.
#[derive(Clone, Debug)]
pub struct PollerHandle {
    command_tx: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    /// Starts the cadence if it is idle.
    pub async fn trigger(&self) -> HostResult<()> {
        self.send(PollerCommand::Trigger).await
    }

    /// Pauses the cadence.
    pub async fn pause(&self) -> HostResult<()> {
        self.send(PollerCommand::Pause).await
    }

    async fn send(&self, command: PollerCommand) -> HostResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| HostError::channel_closed("poller"))
    }
}

/// Drives a [`Poller`] from the pipeline.
pub struct PollerTask {
    poller: Poller,
    inbox: StageReceiver<LightReading>,
    commands: mpsc::Receiver<PollerCommand>,
    writer: WriterHandle,
    readings: StageSender<ReadingEvent>,
    stats: SharedStats,
    shutdown: ShutdownHandle,
}

impl PollerTask {
    /// Creates the task and its command handle.
    pub fn new(
        config: PollerConfig,
        inbox: StageReceiver<LightReading>,
        writer: WriterHandle,
        readings: StageSender<ReadingEvent>,
        stats: SharedStats,
        shutdown: ShutdownHandle,
    ) -> (Self, PollerHandle) {
        let (command_tx, commands) = mpsc::channel(16);
        let task = Self {
            poller: Poller::new(config),
            inbox,
            commands,
            writer,
            readings,
            stats,
            shutdown,
        };
        (task, PollerHandle { command_tx })
    }

    /// Runs until the inbox closes, shutdown, or the device stops answering.
    pub async fn run(mut self) -> HostResult<StopReason> {
        info!(
            timeout_ms = self.poller.config().response_timeout.as_millis() as u64,
            max_retries = self.poller.config().max_retries,
            "Poller started"
        );

        if self.poller.config().autostart {
            let step = self.poller.trigger(Instant::now());
            self.apply(step, None).await?;
        }

        let shutdown = self.shutdown.clone();
        let reason = loop {
            let deadline = self.poller.deadline();

            tokio::select! {
                biased;
                _ = shutdown.wait().wait() => break StopReason::Shutdown,
                reading = self.inbox.recv() => match reading {
                    Some(reading) => {
                        let step = self.poller.on_reading(Instant::now());
                        self.apply(step, Some(reading)).await?;
                    }
                    None => break StopReason::TransportClosed,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let step = self.poller.on_deadline(Instant::now());
                    self.apply(step, None).await?;
                }
                Some(command) = self.commands.recv() => {
                    debug!(?command, "Poller command");
                    match command {
                        PollerCommand::Trigger => {
                            let step = self.poller.trigger(Instant::now());
                            self.apply(step, None).await?;
                        }
                        PollerCommand::Pause => self.poller.pause(),
                    }
                }
            }
        };

        self.poller.stop();
        debug!(?reason, "Poller stopped");
        Ok(reason)
    }

    async fn apply(&mut self, step: Step, reading: Option<LightReading>) -> HostResult<()> {
        match step {
            Step::Ignore => {}
            Step::Query(query) => {
                if query.attempt > 1 {
                    PipelineStats::incr(&self.stats.retries);
                }
                self.writer.submit(query).await?;
            }
            Step::PublishAndQuery(query) => {
                if let Some(reading) = reading {
                    self.publish(reading).await?;
                }
                self.writer.submit(query).await?;
            }
            Step::Publish => {
                if let Some(reading) = reading {
                    trace!(value = reading.value(), "Reading published without a new query");
                    self.publish(reading).await?;
                }
            }
            Step::GiveUp { attempts } => {
                let timeout = self.poller.config().response_timeout;
                warn!(attempts, ?timeout, "Device stopped answering queries");
                return Err(HostError::ResponseTimeout { attempts, timeout });
            }
        }
        Ok(())
    }

    async fn publish(&self, reading: LightReading) -> HostResult<()> {
        let sequence = PipelineStats::incr(&self.stats.readings);
        let event = ReadingEvent::now(sequence, reading.value());
        trace!(sequence, value = event.value, "Reading");
        self.readings
            .send(event)
            .await
            .map_err(|_| HostError::channel_closed("alerter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{OverflowPolicy, bounded};
    use crate::writer::outbound_queue;

    fn config(max_retries: u32) -> PollerConfig {
        PollerConfig::new(Duration::from_millis(100)).with_max_retries(max_retries)
    }

    #[test]
    fn config_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.response_timeout, Duration::from_secs(2));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_attempts(), 4);
        assert!(config.autostart);
        assert!(!config.with_autostart(false).autostart);
    }

    #[tokio::test]
    async fn trigger_then_reading_cycles() {
        let now = Instant::now();
        let mut poller = Poller::new(config(3));
        assert_eq!(poller.state(), PollerState::Idle);

        let Step::Query(first) = poller.trigger(now) else {
            panic!("expected a query");
        };
        assert_eq!(first.attempt, 1);
        assert_eq!(poller.outstanding(), Some(first.token));
        assert_eq!(poller.deadline(), Some(now + Duration::from_millis(100)));

        // A second trigger while awaiting does nothing.
        assert_eq!(poller.trigger(now), Step::Ignore);

        let Step::PublishAndQuery(next) = poller.on_reading(now) else {
            panic!("expected publish + query");
        };
        assert!(next.token > first.token);
        assert_eq!(next.attempt, 1);
        assert_eq!(poller.outstanding(), Some(next.token));
    }

    #[tokio::test]
    async fn unsolicited_reading_is_published_only() {
        let mut poller = Poller::new(config(3));
        assert_eq!(poller.on_reading(Instant::now()), Step::Publish);
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test]
    async fn deadline_resends_then_gives_up() {
        let start = Instant::now();
        let timeout = Duration::from_millis(100);
        let mut poller = Poller::new(config(2));
        let Step::Query(first) = poller.trigger(start) else {
            panic!("expected a query");
        };

        // Not yet expired.
        assert_eq!(poller.on_deadline(start + timeout / 2), Step::Ignore);

        let Step::Query(second) = poller.on_deadline(start + timeout) else {
            panic!("expected a resend");
        };
        assert_eq!(second.attempt, 2);
        assert_ne!(second.token, first.token);

        let Step::Query(third) = poller.on_deadline(start + timeout * 2) else {
            panic!("expected a resend");
        };
        assert_eq!(third.attempt, 3);

        assert_eq!(
            poller.on_deadline(start + timeout * 3),
            Step::GiveUp { attempts: 3 }
        );
        assert_eq!(poller.state(), PollerState::Stopped);
        assert_eq!(poller.trigger(start), Step::Ignore);
        assert_eq!(poller.on_reading(start), Step::Ignore);
    }

    #[tokio::test]
    async fn reading_resets_attempts() {
        let start = Instant::now();
        let timeout = Duration::from_millis(100);
        let mut poller = Poller::new(config(1));
        poller.trigger(start);
        let Step::Query(resend) = poller.on_deadline(start + timeout) else {
            panic!("expected a resend");
        };
        assert_eq!(resend.attempt, 2);
        assert_eq!(poller.unanswered(), 2);

        // The device is alive: the retry budget starts over.
        let late = start + timeout + Duration::from_millis(10);
        assert_eq!(poller.on_reading(late), Step::Publish);
        let Step::Query(again) = poller.on_deadline(late + timeout) else {
            panic!("expected a resend, not a give-up");
        };
        assert_eq!(again.attempt, 2);

        let Step::PublishAndQuery(next) = poller.on_reading(late + timeout) else {
            panic!("expected publish + query");
        };
        assert_eq!(next.attempt, 1);
    }

    #[tokio::test]
    async fn late_reply_after_resend_keeps_one_query_in_flight() {
        let start = Instant::now();
        let timeout = Duration::from_millis(100);
        let mut poller = Poller::new(config(3));
        let Step::Query(_) = poller.trigger(start) else {
            panic!("expected a query");
        };
        let Step::Query(resend) = poller.on_deadline(start + timeout) else {
            panic!("expected a resend");
        };

        // The device got both sends and answers each of them.
        let mut at_device = 2;
        let mut readings = 0;
        let mut queries = 0;
        let now = start + timeout;

        // Reply to the first send: publish only, the resend is still owed.
        at_device -= 1;
        readings += 1;
        assert_eq!(poller.on_reading(now), Step::Publish);
        assert_eq!(poller.outstanding(), Some(resend.token));

        while readings < 10 {
            at_device -= 1;
            readings += 1;
            match poller.on_reading(now) {
                Step::PublishAndQuery(_) => {
                    queries += 1;
                    at_device += 1;
                }
                other => panic!("expected publish + query, got {other:?}"),
            }
            assert_eq!(at_device, 1);
            assert_eq!(poller.unanswered(), 1);
        }
        assert_eq!(queries, 9);
    }

    #[tokio::test]
    async fn lost_query_is_not_waited_for_twice() {
        let start = Instant::now();
        let timeout = Duration::from_millis(100);
        let mut poller = Poller::new(config(3));
        poller.trigger(start);
        poller.on_deadline(start + timeout);

        // The first send was lost: only the resend is answered.
        let t1 = start + timeout + Duration::from_millis(5);
        assert_eq!(poller.on_reading(t1), Step::Publish);

        // Nothing else is coming; the next resend starts a clean count.
        let Step::Query(resend) = poller.on_deadline(t1 + timeout) else {
            panic!("expected a resend");
        };
        assert_eq!(resend.attempt, 2);
        assert_eq!(poller.unanswered(), 1);
        assert!(matches!(poller.on_reading(t1 + timeout), Step::PublishAndQuery(_)));
    }

    #[tokio::test]
    async fn pause_returns_to_idle() {
        let mut poller = Poller::new(config(1));
        poller.trigger(Instant::now());
        poller.pause();
        assert_eq!(poller.state(), PollerState::Idle);
        assert_eq!(poller.deadline(), None);
        assert_eq!(poller.unanswered(), 0);

        poller.stop();
        poller.pause();
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    struct Harness {
        inbox: StageSender<LightReading>,
        outbound: StageReceiver<OutboundQuery>,
        readings: StageReceiver<ReadingEvent>,
        handle: PollerHandle,
        stats: SharedStats,
        shutdown: ShutdownHandle,
        task: tokio::task::JoinHandle<HostResult<StopReason>>,
    }

    fn spawn_task(config: PollerConfig) -> Harness {
        let (inbox, inbox_rx) = bounded("poller", 8, OverflowPolicy::Block);
        let (writer, outbound) = outbound_queue();
        let (readings_tx, readings) = bounded("readings", 8, OverflowPolicy::Block);
        let stats = PipelineStats::shared();
        let shutdown = ShutdownHandle::new();
        let (task, handle) = PollerTask::new(
            config,
            inbox_rx,
            writer,
            readings_tx,
            stats.clone(),
            shutdown.clone(),
        );
        Harness {
            inbox,
            outbound,
            readings,
            handle,
            stats,
            shutdown,
            task: tokio::spawn(task.run()),
        }
    }

    #[tokio::test]
    async fn task_publishes_before_querying() {
        let mut h = spawn_task(config(3));

        let first = h.outbound.recv().await.unwrap();
        assert_eq!(first.attempt, 1);

        h.inbox.send(LightReading::new(123)).await.unwrap();
        let event = h.readings.recv().await.unwrap();
        assert_eq!((event.sequence, event.value), (1, 123));
        let second = h.outbound.recv().await.unwrap();
        assert!(second.token > first.token);

        drop(h.inbox);
        assert_eq!(h.task.await.unwrap().unwrap(), StopReason::TransportClosed);
        assert_eq!(h.stats.snapshot(&[]).readings, 1);
    }

    #[tokio::test]
    async fn task_waits_for_trigger_without_autostart() {
        let mut h = spawn_task(config(3).with_autostart(false));
        assert!(h.outbound.try_recv().is_none());

        h.handle.trigger().await.unwrap();
        let query = h.outbound.recv().await.unwrap();
        assert_eq!(query.token, QueryToken::new(1));

        h.shutdown.trigger();
        assert_eq!(h.task.await.unwrap().unwrap(), StopReason::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn task_times_out() {
        let mut h = spawn_task(config(2));

        let mut attempts = Vec::new();
        while let Some(query) = h.outbound.recv().await {
            attempts.push(query.attempt);
        }
        assert_eq!(attempts, vec![1, 2, 3]);

        let err = h.task.await.unwrap().unwrap_err();
        assert!(matches!(err, HostError::ResponseTimeout { attempts: 3, .. }));
        assert_eq!(h.stats.snapshot(&[]).retries, 2);
    }
}

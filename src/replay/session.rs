//! Per-connection apply and persist workers
//!
//! A [`ReplaySession`] owns two single-consumer workers started on the first admitted
//! event: the apply worker drains the bounded event queue through the gate and the
//! [`Replayer`], then hands each completed event to the persist worker over a second
//! bounded queue. Full queues block their producer.
//!
//! A fatal persistence fault cancels the session's failure token: the persist worker
//! stops, the apply worker drops every later event, and [`ReplaySession::close`] returns
//! the fault.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::driver::TargetDriver;
use super::replayer::Replayer;
use super::retry::RetryPolicy;
use crate::config::{OutputConfig, QueueConfig, ReplayConfig};
use crate::gate::{CheckpointGate, Directive, Gate, ReplayAll};
use crate::sink::{OutcomeRecord, OutcomeSink};
use crate::stats::ReplayStats;
use crate::types::MAX_PAYLOAD_LEN;
use crate::{CommandEvent, CommandKind, ConnId, ReplayError, Result};

/// Settings shared by every session of one replay run.
#[derive(Clone)]
pub struct SessionOptions {
    pub gate: Arc<dyn Gate>,
    pub output: OutputConfig,
    pub queues: QueueConfig,
    pub retry: RetryPolicy,
    /// Maximum protocol frame payload; shorter frames end a command
    pub max_frame_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            gate: Arc::new(ReplayAll),
            output: OutputConfig::default(),
            queues: QueueConfig::default(),
            retry: RetryPolicy::default(),
            max_frame_size: MAX_PAYLOAD_LEN,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("output", &self.output)
            .field("queues", &self.queues)
            .field("retry", &self.retry)
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

impl SessionOptions {
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self {
            gate: Arc::new(CheckpointGate::from(&config.gate)),
            output: config.output.clone(),
            queues: config.queues,
            retry: RetryPolicy::from(&config.retry),
            max_frame_size: MAX_PAYLOAD_LEN,
        }
    }

    pub fn with_gate(mut self, gate: impl Gate) -> Self {
        self.gate = Arc::new(gate);
        self
    }
}

struct ApplyExit<D: TargetDriver> {
    replayer: Option<Replayer<D>>,
    persist: Option<JoinHandle<Result<()>>>,
}

/// Replay pipeline of one captured connection.
pub struct ReplaySession<D: TargetDriver> {
    conn: ConnId,
    driver: Option<Arc<D>>,
    options: Arc<SessionOptions>,
    stats: Arc<ReplayStats>,
    failed: CancellationToken,
    events: Option<mpsc::Sender<CommandEvent>>,
    apply: Option<JoinHandle<ApplyExit<D>>>,
}

impl<D: TargetDriver> std::fmt::Debug for ReplaySession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySession")
            .field("conn", &self.conn)
            .field("capture_only", &self.driver.is_none())
            .field("started", &self.apply.is_some())
            .field("failed", &self.failed.is_cancelled())
            .finish()
    }
}

impl<D: TargetDriver> ReplaySession<D> {
    /// Without a driver the session runs capture-only: events are gated and persisted but
    /// never sent to a target.
    pub fn new(
        conn: ConnId,
        driver: Option<Arc<D>>,
        options: Arc<SessionOptions>,
        stats: Arc<ReplayStats>,
    ) -> Self {
        Self {
            conn,
            driver,
            options,
            stats,
            failed: CancellationToken::new(),
            events: None,
            apply: None,
        }
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// True once the persistence pipeline hit a fatal fault.
    pub fn is_failed(&self) -> bool {
        self.failed.is_cancelled()
    }

    /// Queue an event for the apply worker, waiting while the queue is full.
    pub async fn admit(&mut self, event: CommandEvent) -> Result<()> {
        let events = match self.events.take() {
            Some(events) => self.events.insert(events),
            None => {
                let events = self.spawn_apply();
                self.events.insert(events)
            }
        };
        events
            .send(event)
            .await
            .map_err(|_| ReplayError::worker(format!("apply worker for {} has stopped", self.conn)))?;
        self.stats.event_admitted();
        self.stats.set_event_queue_depth(events.max_capacity() - events.capacity());
        Ok(())
    }

    fn spawn_apply(&mut self) -> mpsc::Sender<CommandEvent> {
        let (tx, rx) = mpsc::channel(self.options.queues.events.max(1));
        let replayer = self.driver.as_ref().map(|driver| {
            Replayer::new(self.conn, Arc::clone(driver), self.options.retry, Arc::clone(&self.stats))
        });
        let worker = ApplyWorker {
            conn: self.conn,
            options: Arc::clone(&self.options),
            stats: Arc::clone(&self.stats),
            failed: self.failed.clone(),
        };
        self.apply = Some(tokio::spawn(worker.run(rx, replayer)));
        debug!(conn = %self.conn, "Spawned apply worker");
        tx
    }

    /// Wait until every admitted event is applied and persisted, then release the target
    /// connection and its statements.
    ///
    /// Returns the fatal persistence fault if one stopped the session.
    pub async fn close(mut self) -> Result<()> {
        drop(self.events.take());
        let Some(apply) = self.apply.take() else {
            return Ok(());
        };
        let exit = apply
            .await
            .map_err(|e| ReplayError::worker(format!("apply worker for {}: {}", self.conn, e)))?;

        let result = match exit.persist {
            Some(persist) => persist
                .await
                .map_err(|e| ReplayError::worker(format!("persist worker for {}: {}", self.conn, e)))
                .and_then(|r| r),
            None => Ok(()),
        };
        if let Some(replayer) = exit.replayer {
            replayer.close().await;
        }
        info!(conn = %self.conn, failed = result.is_err(), "Replay session closed");
        result
    }
}

struct ApplyWorker {
    conn: ConnId,
    options: Arc<SessionOptions>,
    stats: Arc<ReplayStats>,
    failed: CancellationToken,
}

impl ApplyWorker {
    async fn run<D: TargetDriver>(
        self,
        mut events: mpsc::Receiver<CommandEvent>,
        mut replayer: Option<Replayer<D>>,
    ) -> ApplyExit<D> {
        info!(conn = %self.conn, capture_only = replayer.is_none(), "Apply worker started");
        let mut outcomes: Option<mpsc::Sender<CommandEvent>> = None;
        let mut persist = None;
        let mut applied = 0u64;

        while let Some(mut event) = events.recv().await {
            self.stats.set_event_queue_depth(events.len());
            if self.failed.is_cancelled() {
                self.stats.event_dropped();
                trace!(conn = %self.conn, event = %event, "Dropping event after persistence failure");
                continue;
            }

            match self.directive(&event) {
                Directive::Skip => {
                    self.stats.event_skipped();
                    trace!(conn = %self.conn, event = %event, "Skipping event before checkpoint");
                    continue;
                }
                Directive::LogOnly => {
                    self.stats.event_logged();
                    match serde_json::to_string(&OutcomeRecord::new(&event)) {
                        Ok(record) => info!(conn = %self.conn, %record, "Event near checkpoint"),
                        Err(e) => warn!(conn = %self.conn, error = %e, "Failed to serialize event"),
                    }
                    continue;
                }
                Directive::Replay => {}
            }

            if let Some(replayer) = replayer.as_mut() {
                if replayer.apply(&mut event).await.is_err() {
                    self.stats.replay_failed();
                }
                self.stats.event_applied();
                applied += 1;
            }

            let tx = match outcomes.take() {
                Some(tx) => outcomes.insert(tx),
                None => {
                    let (tx, rx) = mpsc::channel(self.options.queues.outcomes.max(1));
                    persist = Some(self.spawn_persist(rx));
                    outcomes.insert(tx)
                }
            };
            if tx.send(event).await.is_err() {
                self.stats.event_dropped();
                continue;
            }
            self.stats.set_outcome_queue_depth(tx.max_capacity() - tx.capacity());
        }

        drop(outcomes);
        info!(conn = %self.conn, applied, "Apply worker finished");
        ApplyExit { replayer, persist }
    }

    fn directive(&self, event: &CommandEvent) -> Directive {
        match event.kind() {
            CommandKind::Prepare | CommandKind::Close => Directive::Replay,
            _ => self.options.gate.directive(event.timestamp),
        }
    }

    fn spawn_persist(&self, outcomes: mpsc::Receiver<CommandEvent>) -> JoinHandle<Result<()>> {
        let conn = self.conn;
        let sink = OutcomeSink::new(&conn, &self.options.output);
        debug!(conn = %conn, "Spawned persist worker");
        tokio::spawn(persist_outcomes(conn, outcomes, sink, Arc::clone(&self.stats), self.failed.clone()))
    }
}

/// Drain completed events into the sink. Only the file I/O of each write runs on the
/// blocking pool, so an idle session holds no blocking thread.
async fn persist_outcomes(
    conn: ConnId,
    mut outcomes: mpsc::Receiver<CommandEvent>,
    mut sink: OutcomeSink,
    stats: Arc<ReplayStats>,
    failed: CancellationToken,
) -> Result<()> {
    while let Some(event) = outcomes.recv().await {
        stats.set_outcome_queue_depth(outcomes.len());
        let (returned, result, event) = tokio::task::spawn_blocking(move || {
            let result = sink.write(&event);
            (sink, result, event)
        })
        .await
        .map_err(|e| ReplayError::worker(format!("outcome write for {}: {}", conn, e)))?;
        sink = returned;

        match result {
            Ok(()) => stats.outcome_written(),
            Err(err @ ReplayError::Persist { .. }) => {
                error!(conn = %conn, error = %err, "Persistence failed, stopping replay for this connection");
                failed.cancel();
                return Err(err);
            }
            Err(err) => {
                stats.write_failed();
                warn!(conn = %conn, event = %event, error = %err, "Failed to write outcome");
            }
        }
    }
    tokio::task::spawn_blocking(move || sink.close())
        .await
        .map_err(|e| ReplayError::worker(format!("closing outcomes for {}: {}", conn, e)))
}

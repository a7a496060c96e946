// src/pipeline.rs
//! The long-running monitor → summarize → broadcast loop.
//!
//! One cycle walks `Fetching → Detecting → Summarizing → Delivering`, then
//! the loop sleeps for the interval (or the fault cooldown after a fault).
//! Forced cycles requested from the command surface run between scheduled
//! ones, bypass change detection and never move the cursor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::analyze::{DigestGenerator, DigestOutcome};
use crate::change_detector::{self, Cursor};
use crate::error::CycleFault;
use crate::history::{CycleKind, CycleRecord, StatusBoard};
use crate::ingest::types::MessageRecord;
use crate::ingest::FeedReader;
use crate::notify::{DeliveryIdentity, DeliveryReport, Dispatcher};
use crate::shutdown::Shutdown;
use crate::subscribers::SubscriberRegistry;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_FAULT_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_FORCED_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Detecting,
    Summarizing,
    Delivering,
    Sleeping,
    Faulted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Fetching => "fetching",
            PipelineState::Detecting => "detecting",
            PipelineState::Summarizing => "summarizing",
            PipelineState::Delivering => "delivering",
            PipelineState::Sleeping => "sleeping",
            PipelineState::Faulted => "faulted",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Feed returned nothing for the window.
    NoMessages,
    /// Newest id equals the cursor.
    Unchanged { newest_id: i64 },
    /// New messages but nobody to deliver to; summarization skipped.
    NoSubscribers { newest_id: i64, fetched: usize },
    Delivered {
        newest_id: i64,
        fetched: usize,
        digest: DigestOutcome,
        report: DeliveryReport,
    },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::NoMessages => "no_messages",
            CycleOutcome::Unchanged { .. } => "unchanged",
            CycleOutcome::NoSubscribers { .. } => "no_subscribers",
            CycleOutcome::Delivered { .. } => "delivered",
        }
    }

    pub fn report(&self) -> Option<&DeliveryReport> {
        match self {
            CycleOutcome::Delivered { report, .. } => Some(report),
            _ => None,
        }
    }

    pub fn newest_id(&self) -> Option<i64> {
        match self {
            CycleOutcome::NoMessages => None,
            CycleOutcome::Unchanged { newest_id }
            | CycleOutcome::NoSubscribers { newest_id, .. }
            | CycleOutcome::Delivered { newest_id, .. } => Some(*newest_id),
        }
    }

    fn fetched(&self) -> usize {
        match self {
            CycleOutcome::NoSubscribers { fetched, .. } | CycleOutcome::Delivered { fetched, .. } => *fetched,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Only(i64),
}

/// A cycle requested out of schedule.
#[derive(Debug)]
pub struct ForceRequest {
    pub window: Duration,
    pub audience: Audience,
    pub reply: oneshot::Sender<Result<CycleOutcome, String>>,
}

pub type ForceSender = mpsc::Sender<ForceRequest>;

pub struct Pipeline {
    reader: FeedReader,
    generator: DigestGenerator,
    dispatcher: Dispatcher,
    registry: Arc<SubscriberRegistry>,
    status: Arc<StatusBoard>,
    cursor: Cursor,
    state: PipelineState,
    window: Duration,
    fault_cooldown: Duration,
    force_rx: Option<mpsc::Receiver<ForceRequest>>,
}

impl Pipeline {
    pub fn new(
        reader: FeedReader,
        generator: DigestGenerator,
        dispatcher: Dispatcher,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        let status = Arc::new(StatusBoard::new(reader.channel()));
        Self {
            reader,
            generator,
            dispatcher,
            registry,
            status,
            cursor: None,
            state: PipelineState::Idle,
            window: DEFAULT_INTERVAL,
            fault_cooldown: DEFAULT_FAULT_COOLDOWN,
            force_rx: None,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_fault_cooldown(mut self, cooldown: Duration) -> Self {
        self.fault_cooldown = cooldown;
        self
    }

    pub fn with_status(mut self, status: Arc<StatusBoard>) -> Self {
        self.status = status;
        self
    }

    /// Create the channel the command surface uses to request forced cycles.
    pub fn force_channel(&mut self) -> ForceSender {
        let (tx, rx) = mpsc::channel(8);
        self.force_rx = Some(rx);
        tx
    }

    pub fn status(&self) -> Arc<StatusBoard> {
        self.status.clone()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn enter(&mut self, state: PipelineState) {
        tracing::trace!(target: "pipeline", from = self.state.as_str(), to = state.as_str(), "state");
        self.state = state;
        self.status.set_state(state.as_str());
    }

    fn advance_cursor(&mut self, newest_id: i64) {
        self.cursor = Some(newest_id);
        self.status.set_cursor(self.cursor);
    }

    /// One scheduled cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleFault> {
        self.enter(PipelineState::Fetching);
        let messages = self.reader.fetch(self.window).await?;

        self.enter(PipelineState::Detecting);
        let Some(newest_id) = change_detector::newest_id(&messages) else {
            tracing::debug!(target: "pipeline", "no messages in window");
            return Ok(CycleOutcome::NoMessages);
        };
        if !change_detector::has_new(&messages, self.cursor) {
            tracing::info!(target: "pipeline", newest_id, "no new messages since last digest");
            return Ok(CycleOutcome::Unchanged { newest_id });
        }

        self.enter(PipelineState::Summarizing);
        let recipients = self.registry.list_active()?;
        if recipients.is_empty() {
            tracing::info!(target: "pipeline", newest_id, "no active subscribers, skipping digest");
            self.advance_cursor(newest_id);
            return Ok(CycleOutcome::NoSubscribers {
                newest_id,
                fetched: messages.len(),
            });
        }

        let (digest, report) = self.summarize_and_deliver(&messages, &recipients).await;
        self.advance_cursor(newest_id);
        Ok(CycleOutcome::Delivered {
            newest_id,
            fetched: messages.len(),
            digest,
            report,
        })
    }

    /// Out-of-schedule cycle over `window`, delivered to `audience`. The
    /// cursor is left alone.
    pub async fn run_forced(&mut self, window: Duration, audience: Audience) -> Result<CycleOutcome, CycleFault> {
        self.enter(PipelineState::Fetching);
        let messages = self.reader.fetch(window).await?;

        self.enter(PipelineState::Detecting);
        let Some(newest_id) = change_detector::newest_id(&messages) else {
            return Ok(CycleOutcome::NoMessages);
        };

        self.enter(PipelineState::Summarizing);
        let recipients = match audience {
            Audience::All => self.registry.list_active()?,
            Audience::Only(id) => vec![id],
        };
        if recipients.is_empty() {
            return Ok(CycleOutcome::NoSubscribers {
                newest_id,
                fetched: messages.len(),
            });
        }

        let (digest, report) = self.summarize_and_deliver(&messages, &recipients).await;
        Ok(CycleOutcome::Delivered {
            newest_id,
            fetched: messages.len(),
            digest,
            report,
        })
    }

    async fn summarize_and_deliver(
        &mut self,
        messages: &[MessageRecord],
        recipients: &[i64],
    ) -> (DigestOutcome, DeliveryReport) {
        let digest = self.generator.generate_outcome(messages).await;

        self.enter(PipelineState::Delivering);
        let report = self
            .dispatcher
            .deliver(digest.digest(), recipients, DeliveryIdentity::Primary)
            .await;
        if !report.delivered() {
            tracing::warn!(
                target: "pipeline",
                attempted = report.attempted,
                "digest reached no recipients"
            );
        }
        (digest, report)
    }

    fn record(&self, kind: CycleKind, result: &Result<CycleOutcome, CycleFault>) {
        let now = Utc::now();
        let rec = match result {
            Ok(outcome) => CycleRecord {
                at: now,
                kind,
                outcome: outcome.label(),
                fetched: outcome.fetched(),
                newest_id: outcome.newest_id(),
                attempted: outcome.report().map_or(0, |r| r.attempted),
                succeeded: outcome.report().map_or(0, |r| r.succeeded),
                error: None,
            },
            Err(fault) => CycleRecord {
                at: now,
                kind,
                outcome: "faulted",
                fetched: 0,
                newest_id: None,
                attempted: 0,
                succeeded: 0,
                error: Some(fault.to_string()),
            },
        };
        counter!("pipeline_cycles_total", "outcome" => rec.outcome).increment(1);
        gauge!("pipeline_last_cycle_ts").set(now.timestamp() as f64);
        self.status.record_cycle(rec);
    }

    /// Run one scheduled cycle; returns the cooldown to use instead of the
    /// interval when the cycle faulted.
    async fn scheduled_step(&mut self) -> Option<Duration> {
        let result = self.run_cycle().await;
        self.record(CycleKind::Scheduled, &result);
        match result {
            Ok(outcome) => {
                tracing::info!(
                    target: "pipeline",
                    outcome = outcome.label(),
                    cursor = ?self.cursor,
                    "cycle finished"
                );
                None
            }
            Err(fault) => {
                self.enter(PipelineState::Faulted);
                counter!("pipeline_faults_total").increment(1);
                tracing::error!(target: "pipeline", error = %fault, "cycle faulted");
                Some(self.fault_cooldown)
            }
        }
    }

    async fn forced_step(&mut self, req: ForceRequest) {
        tracing::info!(target: "pipeline", audience = ?req.audience, window_secs = req.window.as_secs(), "forced cycle");
        let result = self.run_forced(req.window, req.audience).await;
        self.record(CycleKind::Forced, &result);
        if let Err(fault) = &result {
            counter!("pipeline_faults_total").increment(1);
            tracing::error!(target: "pipeline", error = %fault, "forced cycle faulted");
        }
        self.enter(PipelineState::Sleeping);
        // requester may have gone away
        let _ = req.reply.send(result.map_err(|e| e.to_string()));
    }

    /// Run until `shutdown` fires. Faults never escape; they only replace the
    /// next sleep with the fault cooldown.
    pub async fn run_cycle_forever(mut self, interval: Duration, mut shutdown: Shutdown) {
        tracing::info!(
            target: "pipeline",
            channel = self.reader.channel(),
            interval_secs = interval.as_secs(),
            window_secs = self.window.as_secs(),
            "pipeline started"
        );
        self.reader.set_shutdown(shutdown.clone());

        'outer: while !shutdown.is_triggered() {
            let sleep_for = self.scheduled_step().await.unwrap_or(interval);
            self.enter(PipelineState::Sleeping);
            let deadline = Instant::now() + sleep_for;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = shutdown.wait() => break 'outer,
                    req = next_force(&mut self.force_rx) => match req {
                        Some(req) => self.forced_step(req).await,
                        None => self.force_rx = None,
                    },
                }
            }
        }

        self.enter(PipelineState::Idle);
        tracing::info!(target: "pipeline", "pipeline stopped");
    }
}

async fn next_force(rx: &mut Option<mpsc::Receiver<ForceRequest>>) -> Option<ForceRequest> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

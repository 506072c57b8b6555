//! Job status polling.
//!
//! Each tracked job gets one driver task. The driver turns timers, backend
//! replies, and cancellation into [`PollMessage`]s and feeds them to a
//! [`PollMachine`], which decides what to do next. The machine is plain data
//! so its transitions are tested without a runtime.
//!
//! ```text
//!   Idle ── start ──▶ Request
//!            Tick                 Response(ok, non-terminal)
//!   Wait ──────────▶ Request ──────────────────────────────▶ Wait
//!     ▲                 │  Response(retryable err): backoff     │
//!     └─────────────────┘                                       │
//!   any ── Cancel ──▶ Cancelled    Tick past deadline ──▶ Failed(Timeout)
//! ```
//!
//! `current_job_id` is cleared by a drop guard on every exit path except a
//! detach, which keeps it so the job can be resumed later.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use citecheck_core::defaults::{self, KEY_CURRENT_JOB_ID};
use citecheck_core::{
    Error, Job, JobStatus, JobStatusResponse, JobStore, Result, ValidationTransport,
};

use crate::tracker::{ApplyOutcome, JobTracker};
use crate::upgrade::UpgradeTracker;

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between polls while the job is healthy.
    pub interval_ms: u64,
    /// Upper bound for the backoff delay after failures.
    pub max_interval_ms: u64,
    /// Multiplier applied to the delay after each retryable failure.
    pub backoff_factor: u32,
    /// Limit for a single status request.
    pub request_timeout_secs: u64,
    /// Total time allowed before the job is reported as timed out.
    pub budget_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: defaults::POLL_INTERVAL_MS,
            max_interval_ms: defaults::POLL_MAX_INTERVAL_MS,
            backoff_factor: defaults::POLL_BACKOFF_FACTOR,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            budget_secs: defaults::POLL_BUDGET_SECS,
        }
    }
}

impl PollConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CITECHECK_POLL_INTERVAL_MS` | `2000` | Delay between polls |
    /// | `CITECHECK_POLL_MAX_INTERVAL_MS` | `10000` | Backoff ceiling |
    /// | `CITECHECK_POLL_TIMEOUT_SECS` | `20` | Per-request limit |
    /// | `CITECHECK_POLL_BUDGET_SECS` | `90` | Total polling budget |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let interval_ms = read("CITECHECK_POLL_INTERVAL_MS", defaults::POLL_INTERVAL_MS).max(1);
        let max_interval_ms = read(
            "CITECHECK_POLL_MAX_INTERVAL_MS",
            defaults::POLL_MAX_INTERVAL_MS,
        )
        .max(interval_ms);
        let request_timeout_secs =
            read("CITECHECK_POLL_TIMEOUT_SECS", defaults::REQUEST_TIMEOUT_SECS).max(1);
        let budget_secs = read("CITECHECK_POLL_BUDGET_SECS", defaults::POLL_BUDGET_SECS).max(1);

        Self {
            interval_ms,
            max_interval_ms,
            backoff_factor: defaults::POLL_BACKOFF_FACTOR,
            request_timeout_secs,
            budget_secs,
        }
    }

    pub fn with_interval(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    pub fn with_max_interval(mut self, ms: u64) -> Self {
        self.max_interval_ms = ms;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_budget(mut self, secs: u64) -> Self {
        self.budget_secs = secs;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    /// Delay following `current` after a retryable failure.
    pub fn backoff(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.backoff_factor.max(1))
            .min(self.max_interval())
    }
}

/// Why polling stopped before a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A newer submission replaced this job.
    Superseded,
    /// The owner went away; the job stays resumable.
    Detached,
    /// The user abandoned the job.
    UserCancelled,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Superseded => write!(f, "superseded"),
            Self::Detached => write!(f, "detached"),
            Self::UserCancelled => write!(f, "user_cancelled"),
        }
    }
}

/// Input to the poll state machine.
#[derive(Debug)]
pub enum PollMessage {
    /// The wait before the next poll elapsed.
    Tick,
    /// A status request finished. `tag` is the job it was issued for.
    Response {
        tag: String,
        result: Result<JobStatusResponse>,
    },
    Cancel(CancelReason),
}

/// Lifecycle of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl PollerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// How a poll ended.
#[derive(Debug)]
pub enum Finish {
    /// Reached `completed` or `partial`.
    Completed,
    Failed(Error),
    Cancelled(CancelReason),
}

/// What the driver should do next.
#[derive(Debug)]
pub enum PollAction {
    /// Issue a status request now.
    Request,
    /// Sleep, then deliver a [`PollMessage::Tick`].
    Wait(Duration),
    /// Merge the response into the tracked job, then call
    /// [`PollMachine::applied`].
    Apply(JobStatusResponse),
    /// Message ignored; nothing changed.
    Ignore,
    Finish(Finish),
}

/// Poll state machine for a single job.
#[derive(Debug)]
pub struct PollMachine {
    job_id: String,
    config: PollConfig,
    state: PollerState,
    delay: Duration,
    deadline: Instant,
    failures: u32,
}

impl PollMachine {
    pub fn new(job_id: impl Into<String>, config: PollConfig, now: Instant) -> Self {
        let delay = config.interval();
        let deadline = now + config.budget();
        Self {
            job_id: job_id.into(),
            config,
            state: PollerState::Idle,
            delay,
            deadline,
            failures: 0,
        }
    }

    /// Enter `Polling`; the budget runs from `now`.
    pub fn start(&mut self, now: Instant) -> PollAction {
        if self.state != PollerState::Idle {
            return PollAction::Ignore;
        }
        self.state = PollerState::Polling;
        self.deadline = now + self.config.budget();
        PollAction::Request
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Consecutive retryable failures since the last good response.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Budget left at `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn handle(&mut self, message: PollMessage, now: Instant) -> PollAction {
        if self.state != PollerState::Polling {
            return PollAction::Ignore;
        }

        match message {
            PollMessage::Cancel(reason) => {
                self.state = PollerState::Cancelled;
                PollAction::Finish(Finish::Cancelled(reason))
            }
            PollMessage::Tick if now >= self.deadline => self.fail(Error::Timeout {
                job_id: self.job_id.clone(),
                after_ms: self.config.budget().as_millis() as u64,
            }),
            PollMessage::Tick => PollAction::Request,
            PollMessage::Response { tag, .. } if tag != self.job_id => PollAction::Ignore,
            PollMessage::Response { result: Ok(response), .. } => PollAction::Apply(response),
            PollMessage::Response { result: Err(e), .. } if e.is_retryable() => {
                self.failures += 1;
                self.delay = self.config.backoff(self.delay);
                self.wait(now)
            }
            PollMessage::Response { result: Err(e), .. } => self.fail(e),
        }
    }

    /// Next step once a response was merged and the job is at `status`.
    ///
    /// `error` is the backend's failure message for a `failed` job.
    pub fn applied(&mut self, status: JobStatus, error: Option<&str>, now: Instant) -> PollAction {
        if self.state != PollerState::Polling {
            return PollAction::Ignore;
        }

        match status {
            JobStatus::Completed | JobStatus::Partial => {
                self.state = PollerState::Completed;
                PollAction::Finish(Finish::Completed)
            }
            JobStatus::Failed => self.fail(Error::JobFailed(
                error.unwrap_or("validation job failed").to_string(),
            )),
            JobStatus::Pending | JobStatus::Processing => {
                self.failures = 0;
                self.delay = self.config.interval();
                self.wait(now)
            }
        }
    }

    fn wait(&self, now: Instant) -> PollAction {
        PollAction::Wait(self.delay.min(self.remaining(now)))
    }

    fn fail(&mut self, error: Error) -> PollAction {
        self.state = PollerState::Failed;
        PollAction::Finish(Finish::Failed(error))
    }
}

/// Event emitted by the poller.
#[derive(Debug, Clone, PartialEq)]
pub enum PollerEvent {
    Started { job_id: String },
    StatusChanged { job_id: String, status: JobStatus },
    Retrying {
        job_id: String,
        error: String,
        delay_ms: u64,
    },
    StaleResponseDiscarded { job_id: String },
    Completed { job_id: String, status: JobStatus },
    Failed { job_id: String, error: String },
    Cancelled { job_id: String, reason: CancelReason },
}

/// Final result of a poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// Job reached `completed` or `partial`.
    Completed(Job),
    Failed { job_id: String, error: Error },
    Cancelled { job_id: String, reason: CancelReason },
}

impl PollOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed(job) => &job.id,
            Self::Failed { job_id, .. } | Self::Cancelled { job_id, .. } => job_id,
        }
    }
}

/// Handle to a running poll.
///
/// Dropping the handle detaches the poll: the driver stops and
/// `current_job_id` is kept for a later resume.
pub struct PollHandle {
    job_id: String,
    cancel_tx: mpsc::Sender<CancelReason>,
    state_rx: watch::Receiver<PollerState>,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Watch the poll state without taking the handle.
    ///
    /// The sender closes when the driver exits, including by panic.
    pub fn state(&self) -> watch::Receiver<PollerState> {
        self.state_rx.clone()
    }

    /// Stop polling and wait for the driver to exit.
    pub async fn cancel(self, reason: CancelReason) -> PollOutcome {
        // Already-finished drivers have dropped the receiver.
        let _ = self.cancel_tx.send(reason).await;
        self.wait().await
    }

    /// Wait for the poll to end on its own.
    pub async fn wait(self) -> PollOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => PollOutcome::Failed {
                job_id: self.job_id,
                error: Error::Internal(format!("poll task aborted: {}", e)),
            },
        }
    }
}

/// Clears `current_job_id` when dropped, if it still names this job.
struct ClearOnDrop {
    store: Arc<dyn JobStore>,
    job_id: String,
    armed: bool,
}

impl ClearOnDrop {
    fn new(store: Arc<dyn JobStore>, job_id: &str) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.clear_if(KEY_CURRENT_JOB_ID, &self.job_id) {
            Ok(true) => debug!(job_id = %self.job_id, "Cleared current job id"),
            Ok(false) => {}
            Err(e) => warn!(job_id = %self.job_id, error = %e, "Failed to clear current job id"),
        }
    }
}

/// Starts poll drivers for tracked jobs.
pub struct JobPoller {
    transport: Arc<dyn ValidationTransport>,
    store: Arc<dyn JobStore>,
    tracker: JobTracker,
    upgrades: Option<UpgradeTracker>,
    config: PollConfig,
    event_tx: broadcast::Sender<PollerEvent>,
}

impl JobPoller {
    pub fn new(
        transport: Arc<dyn ValidationTransport>,
        store: Arc<dyn JobStore>,
        tracker: JobTracker,
        config: PollConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            transport,
            store,
            tracker,
            upgrades: None,
            config,
            event_tx,
        }
    }

    /// Record jobs that end `partial` as pending upgrades.
    pub fn with_upgrades(mut self, upgrades: UpgradeTracker) -> Self {
        self.upgrades = Some(upgrades);
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Get a receiver for poller events.
    pub fn events(&self) -> broadcast::Receiver<PollerEvent> {
        self.event_tx.subscribe()
    }

    /// Track `job` and start polling it.
    pub async fn start(&self, job: Job) -> PollHandle {
        let job_id = job.id.clone();
        if let Some(previous) = self.tracker.adopt(job).await {
            if previous.id != job_id {
                debug!(previous = %previous.id, job_id = %job_id, "Replaced tracked job");
            }
        }

        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);
        let driver = PollDriver {
            job_id: job_id.clone(),
            state_tx,
            transport: self.transport.clone(),
            store: self.store.clone(),
            tracker: self.tracker.clone(),
            upgrades: self.upgrades.clone(),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
        };
        let task = tokio::spawn(driver.run(cancel_rx));

        PollHandle {
            job_id,
            cancel_tx,
            state_rx,
            task,
        }
    }
}

/// Everything one driver task needs.
struct PollDriver {
    job_id: String,
    state_tx: watch::Sender<PollerState>,
    transport: Arc<dyn ValidationTransport>,
    store: Arc<dyn JobStore>,
    tracker: JobTracker,
    upgrades: Option<UpgradeTracker>,
    config: PollConfig,
    event_tx: broadcast::Sender<PollerEvent>,
}

impl PollDriver {
    fn emit(&self, event: PollerEvent) {
        let _ = self.event_tx.send(event);
    }

    #[instrument(skip_all, fields(job_id = %self.job_id))]
    async fn run(self, mut cancel_rx: mpsc::Receiver<CancelReason>) -> PollOutcome {
        let mut guard = ClearOnDrop::new(self.store.clone(), &self.job_id);
        let mut machine =
            PollMachine::new(self.job_id.clone(), self.config.clone(), Instant::now());
        let mut action = machine.start(Instant::now());
        self.state_tx.send_replace(machine.state());
        let mut latest: Option<Job> = None;

        info!(budget_secs = self.config.budget_secs, "Polling job");
        self.emit(PollerEvent::Started {
            job_id: self.job_id.clone(),
        });

        let finish = loop {
            let message = match action {
                PollAction::Finish(finish) => break finish,
                PollAction::Request => {
                    let limit = self
                        .config
                        .request_timeout()
                        .min(machine.remaining(Instant::now()));
                    debug!(limit_ms = limit.as_millis() as u64, "Requesting job status");
                    tokio::select! {
                        biased;
                        reason = cancel_rx.recv() => {
                            PollMessage::Cancel(reason.unwrap_or(CancelReason::Detached))
                        }
                        result = timeout(limit, self.transport.job_status(&self.job_id)) => {
                            PollMessage::Response {
                                tag: self.job_id.clone(),
                                result: result.unwrap_or_else(|_| {
                                    Err(Error::Timeout {
                                        job_id: self.job_id.clone(),
                                        after_ms: limit.as_millis() as u64,
                                    })
                                }),
                            }
                        }
                    }
                }
                PollAction::Wait(delay) => {
                    tokio::select! {
                        biased;
                        reason = cancel_rx.recv() => {
                            PollMessage::Cancel(reason.unwrap_or(CancelReason::Detached))
                        }
                        _ = sleep(delay) => PollMessage::Tick,
                    }
                }
                PollAction::Apply(response) => {
                    match self.tracker.apply(&self.job_id, response).await {
                        ApplyOutcome::Applied { job, changed } => {
                            if changed {
                                info!(status = %job.status, "Job status changed");
                                self.emit(PollerEvent::StatusChanged {
                                    job_id: self.job_id.clone(),
                                    status: job.status,
                                });
                            }
                            action = machine.applied(
                                job.status,
                                job.error.as_deref(),
                                Instant::now(),
                            );
                            latest = Some(job);
                            continue;
                        }
                        ApplyOutcome::Discarded => {
                            self.emit(PollerEvent::StaleResponseDiscarded {
                                job_id: self.job_id.clone(),
                            });
                            PollMessage::Cancel(CancelReason::Superseded)
                        }
                    }
                }
                PollAction::Ignore => PollMessage::Tick,
            };

            let retry_error = match &message {
                PollMessage::Response { result: Err(e), .. } if e.is_retryable() => {
                    Some(e.to_string())
                }
                _ => None,
            };

            action = machine.handle(message, Instant::now());

            if let (Some(error), PollAction::Wait(delay)) = (retry_error, &action) {
                warn!(
                    error = %error,
                    attempt = machine.failures(),
                    delay_ms = delay.as_millis() as u64,
                    "Status request failed, retrying"
                );
                self.emit(PollerEvent::Retrying {
                    job_id: self.job_id.clone(),
                    error,
                    delay_ms: delay.as_millis() as u64,
                });
            }
        };

        let job_id = self.job_id.clone();
        let outcome = match finish {
            Finish::Completed => {
                let job = latest.unwrap_or_else(|| Job::new(job_id.clone(), 0));
                info!(
                    status = %job.status,
                    processed = job.processed_count,
                    submitted = job.submitted_count,
                    "Job finished"
                );
                // Must land before the guard drops `current_job_id`.
                if let Some(upgrades) = self.upgrades.as_ref().filter(|_| job.is_partial()) {
                    if let Err(e) = upgrades.mark_pending(&job.id) {
                        warn!(error = %e, "Failed to record pending upgrade");
                    }
                }
                PollOutcome::Completed(job)
            }
            Finish::Failed(error) => {
                error!(error = %error, "Job polling failed");
                PollOutcome::Failed { job_id, error }
            }
            Finish::Cancelled(reason) => {
                if reason == CancelReason::Detached {
                    guard.disarm();
                }
                info!(%reason, "Job polling cancelled");
                PollOutcome::Cancelled { job_id, reason }
            }
        };
        drop(guard);
        self.state_tx.send_replace(machine.state());

        self.emit(match &outcome {
            PollOutcome::Completed(job) => PollerEvent::Completed {
                job_id: job.id.clone(),
                status: job.status,
            },
            PollOutcome::Failed { job_id, error } => PollerEvent::Failed {
                job_id: job_id.clone(),
                error: error.to_string(),
            },
            PollOutcome::Cancelled { job_id, reason } => PollerEvent::Cancelled {
                job_id: job_id.clone(),
                reason: *reason,
            },
        });
        outcome
    }
}

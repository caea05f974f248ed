//! Periodic task scheduler for ingestion fetches
//!
//! Tasks fire on a cadence (fixed interval or daily wall-clock time). One
//! control loop owns all task state; spawned task units report completion
//! over a channel, so no lock is shared between the loop and the units. A
//! global semaphore caps concurrent units across all tasks, and a per-task
//! running flag enforces the skip policy: a cadence tick that lands while
//! the previous run of the same task is still in flight is skipped, not
//! queued.
//!
//! Failure policy per completed run: success resets the failure streak; a
//! failed run reschedules with exponential backoff; a run refused by an open
//! circuit retries on the next tick without backoff (the breaker already
//! paces the source).

use crate::ingest_core::source_client::{BoundingRegion, SourceQuery, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

/// When a task fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed interval between trigger times (not between completions).
    Every(Duration),
    /// Once a day at the given UTC wall-clock time. Out-of-range values
    /// wrap (`hour % 24`, `minute % 60`).
    Daily { hour: u32, minute: u32 },
}

impl Schedule {
    /// First trigger time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Schedule::Every(interval) => {
                after + chrono::Duration::milliseconds(interval.as_millis() as i64)
            }
            Schedule::Daily { hour, minute } => {
                let naive = after
                    .date_naive()
                    .and_hms_opt(hour % 24, minute % 60, 0)
                    .unwrap_or_else(|| after.date_naive().and_hms_opt(0, 0, 0).unwrap());
                let candidate = Utc.from_utc_datetime(&naive);
                if candidate > after {
                    candidate
                } else {
                    candidate + chrono::Duration::days(1)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Never,
    Success,
    Failed,
    Skipped,
    Interrupted,
}

/// Counters from one completed run, aggregated for the status log.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub fetched: usize,
    pub events: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
}

#[derive(Debug)]
pub enum RunError {
    /// Source circuit is open; the run did nothing.
    CircuitOpen,
    /// Run observed the cancel signal and stopped early.
    Cancelled,
    Failed(String),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::CircuitOpen => write!(f, "Circuit open"),
            RunError::Cancelled => write!(f, "Cancelled"),
            RunError::Failed(msg) => write!(f, "Run failed: {}", msg),
        }
    }
}

impl std::error::Error for RunError {}

/// What one task fetches when it fires.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub source_id: String,
    pub region: BoundingRegion,
    /// How far back each fetch looks. Overlapping lookbacks are expected;
    /// dedup collapses the repeats.
    pub lookback: Duration,
}

impl FetchSpec {
    pub fn to_query(&self, now: DateTime<Utc>) -> SourceQuery {
        SourceQuery {
            source_id: self.source_id.clone(),
            region: self.region,
            range: TimeRange {
                start: now - chrono::Duration::milliseconds(self.lookback.as_millis() as i64),
                end: now,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: String,
    pub schedule: Schedule,
    pub spec: FetchSpec,
}

/// Executes one run of one task. Implementations check the cancel signal at
/// their suspension points and return `RunError::Cancelled` when it fires.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(
        &self,
        task: &ScheduledTask,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunStats, RunError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub max_concurrency: usize,
    /// Uniform random delay added to each trigger, spreading load across
    /// sources that share a cadence.
    pub jitter_ms: u64,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrency: 4,
            jitter_ms: 2000,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(3600),
        }
    }
}

/// Backoff delay after `consecutive_failures` failed runs (>= 1).
fn backoff_delay(config: &SchedulerConfig, consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(16);
    let delay = config
        .backoff_base
        .as_secs()
        .saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_secs(delay.min(config.backoff_cap.as_secs()))
}

struct TaskEntry {
    task: ScheduledTask,
    next_run_at: DateTime<Utc>,
    running: bool,
    consecutive_failures: u32,
    last_run_status: RunStatus,
}

pub struct Scheduler {
    runner: Arc<dyn TaskRunner>,
    config: SchedulerConfig,
    tasks: Vec<TaskEntry>,
}

/// Handle to a started scheduler. `stop` initiates graceful shutdown and
/// resolves to the final status of every registered task.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<Option<Duration>>,
    join: JoinHandle<Vec<(String, RunStatus)>>,
}

impl SchedulerHandle {
    pub async fn stop(self, grace: Duration) -> Vec<(String, RunStatus)> {
        let _ = self.shutdown_tx.send(Some(grace));
        self.join.await.unwrap_or_default()
    }
}

impl Scheduler {
    pub fn new(runner: Arc<dyn TaskRunner>, config: SchedulerConfig) -> Self {
        Self {
            runner,
            config,
            tasks: Vec::new(),
        }
    }

    /// Register a task. First trigger is immediate (plus jitter).
    pub fn register(&mut self, task: ScheduledTask) {
        log::info!("🗓️  Registered task {} for {}", task.id, task.spec.source_id);
        self.tasks.push(TaskEntry {
            task,
            next_run_at: Utc::now(),
            running: false,
            consecutive_failures: 0,
            last_run_status: RunStatus::Never,
        });
    }

    fn with_jitter(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if self.config.jitter_ms == 0 {
            return at;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
        at + chrono::Duration::milliseconds(jitter as i64)
    }

    /// Start the control loop.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        let join = tokio::spawn(self.control_loop(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }

    async fn control_loop(
        mut self,
        mut shutdown_rx: watch::Receiver<Option<Duration>>,
    ) -> Vec<(String, RunStatus)> {
        let mut heap: BinaryHeap<Reverse<(i64, usize)>> = BinaryHeap::new();
        for (idx, entry) in self.tasks.iter().enumerate() {
            heap.push(Reverse((entry.next_run_at.timestamp_millis(), idx)));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (done_tx, mut done_rx) = mpsc::channel::<(usize, Result<RunStats, RunError>)>(64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        log::info!(
            "🚀 Scheduler started with {} tasks (max concurrency {})",
            self.tasks.len(),
            self.config.max_concurrency
        );

        let grace = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_due(&mut heap, &semaphore, &done_tx, &cancel_rx);
                }
                Some((idx, result)) = done_rx.recv() => {
                    self.complete(idx, result, &mut heap);
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break Duration::ZERO;
                    }
                    if let Some(grace) = *shutdown_rx.borrow() {
                        log::info!("🔄 Scheduler stopping (grace {}s)", grace.as_secs());
                        break grace;
                    }
                }
            }
        };

        self.drain(grace, &cancel_tx, &mut done_rx).await;

        self.tasks
            .into_iter()
            .map(|e| (e.task.id, e.last_run_status))
            .collect()
    }

    fn dispatch_due(
        &mut self,
        heap: &mut BinaryHeap<Reverse<(i64, usize)>>,
        semaphore: &Arc<Semaphore>,
        done_tx: &mpsc::Sender<(usize, Result<RunStats, RunError>)>,
        cancel_rx: &watch::Receiver<bool>,
    ) {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        while let Some(Reverse((due_ms, idx))) = heap.peek().copied() {
            if due_ms > now_ms {
                break;
            }
            heap.pop();

            // Entries left behind by a reschedule are stale; drop them.
            if due_ms != self.tasks[idx].next_run_at.timestamp_millis() {
                continue;
            }

            // Next cadence trigger is scheduled before the run starts, so a
            // long run cannot stall the cadence (it gets skipped instead).
            let next = self.with_jitter(self.tasks[idx].task.schedule.next_after(now));
            self.tasks[idx].next_run_at = next;
            heap.push(Reverse((next.timestamp_millis(), idx)));

            let entry = &mut self.tasks[idx];
            if entry.running {
                entry.last_run_status = RunStatus::Skipped;
                log::warn!(
                    "⏭️  Skipping trigger for {}: previous run still in flight",
                    entry.task.id
                );
                continue;
            }
            entry.running = true;

            let runner = self.runner.clone();
            let task = entry.task.clone();
            let semaphore = semaphore.clone();
            let done_tx = done_tx.clone();
            let cancel_rx = cancel_rx.clone();
            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                log::debug!("⏰ Running task {}", task.id);
                let result = runner.run(&task, cancel_rx).await;
                let _ = done_tx.send((idx, result)).await;
            });
        }
    }

    fn complete(
        &mut self,
        idx: usize,
        result: Result<RunStats, RunError>,
        heap: &mut BinaryHeap<Reverse<(i64, usize)>>,
    ) {
        let entry = &mut self.tasks[idx];
        entry.running = false;

        match result {
            Ok(stats) => {
                entry.consecutive_failures = 0;
                entry.last_run_status = RunStatus::Success;
                log::info!(
                    "📊 Task {}: fetched {} → {} events ({} rejected, {} duplicates, {} dead-lettered)",
                    entry.task.id,
                    stats.fetched,
                    stats.events,
                    stats.rejected,
                    stats.duplicates,
                    stats.dead_lettered
                );
            }
            Err(RunError::CircuitOpen) => {
                entry.last_run_status = RunStatus::Failed;
                // No backoff: the breaker cooldown already paces retries.
                let next = Utc::now();
                entry.next_run_at = next;
                heap.push(Reverse((next.timestamp_millis(), idx)));
                log::warn!("🔌 Task {} blocked by open circuit, retrying next tick", entry.task.id);
            }
            Err(RunError::Cancelled) => {
                entry.last_run_status = RunStatus::Interrupted;
                log::warn!("⚠️  Task {} interrupted", entry.task.id);
            }
            Err(RunError::Failed(msg)) => {
                entry.consecutive_failures += 1;
                entry.last_run_status = RunStatus::Failed;
                let delay = backoff_delay(&self.config, entry.consecutive_failures);
                let next = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                entry.next_run_at = next;
                heap.push(Reverse((next.timestamp_millis(), idx)));
                log::error!(
                    "❌ Task {} failed ({} consecutive): {}, retrying in {}s",
                    entry.task.id,
                    entry.consecutive_failures,
                    msg,
                    delay.as_secs()
                );
            }
        }
    }

    async fn drain(
        &mut self,
        grace: Duration,
        cancel_tx: &watch::Sender<bool>,
        done_rx: &mut mpsc::Receiver<(usize, Result<RunStats, RunError>)>,
    ) {
        let _ = cancel_tx.send(true);
        let deadline = tokio::time::Instant::now() + grace;

        while self.tasks.iter().any(|e| e.running) {
            match tokio::time::timeout_at(deadline, done_rx.recv()).await {
                Ok(Some((idx, result))) => {
                    let entry = &mut self.tasks[idx];
                    entry.running = false;
                    entry.last_run_status = match result {
                        Ok(_) => RunStatus::Success,
                        Err(RunError::Cancelled) => RunStatus::Interrupted,
                        Err(_) => RunStatus::Failed,
                    };
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        for entry in self.tasks.iter_mut().filter(|e| e.running) {
            entry.running = false;
            entry.last_run_status = RunStatus::Interrupted;
            log::warn!("⚠️  Abandoning task {} still running past grace", entry.task.id);
        }
        log::info!("✅ Scheduler stopped");
    }
}

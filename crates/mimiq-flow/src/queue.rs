//! Queues and their dispatch loops.
//!
//! Each queue owns its task set, a timer heap, a ready FIFO, a token
//! bucket, and a concurrency semaphore, and runs one long-lived dispatch
//! loop. The loop promotes due tasks to ready, takes rate and concurrency
//! budget, and spawns one concurrent dispatch per attempt. All waiting is
//! cancel-safe and goes through the emulator clock.
//!
//! Lock discipline: the queue lock protects everything in [`QueueInner`]
//! and is never held across an await point; the outbound call runs
//! without it and outcome application reacquires it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use mimiq_core::{Clock, Error, OidcSigner, QueueName, Result, TaskName};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::QueueConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher, TargetResolver};
use crate::rate::TokenBucket;
use crate::retry::{self, RetryDecision};
use crate::task::{Attempt, NewTask, Task, TaskSnapshot, TaskState};

/// Dependencies shared by every queue in a registry.
pub(crate) struct EngineShared {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) signer: Arc<OidcSigner>,
    pub(crate) app_engine_host: Option<String>,
}

/// Lifecycle state of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Dispatching normally.
    Running,
    /// Tasks accumulate but nothing dispatches.
    Paused,
    /// Reserved; never produced by the emulator.
    Disabled,
    /// Shut down and unregistered.
    Deleted,
}

impl QueueState {
    /// The wire-level state name.
    #[must_use]
    pub const fn as_str_name(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Disabled => "DISABLED",
            Self::Deleted => "DELETED",
        }
    }
}

/// A point-in-time view of a queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    /// Fully qualified name.
    pub name: QueueName,
    /// Lifecycle state.
    pub state: QueueState,
    /// Configuration.
    pub config: QueueConfig,
}

/// A timer or ready-queue entry; tasks are referenced by id, never by
/// pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TimerEntry {
    at: DateTime<Utc>,
    seq: u64,
    task_id: String,
    epoch: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    state: QueueState,
    config: QueueConfig,
    tasks: HashMap<String, Task>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    ready: VecDeque<TimerEntry>,
    bucket: TokenBucket,
    /// Cancels in-flight dispatches; swapped out on hard purge.
    abort: CancellationToken,
    inflight: usize,
    next_seq: u64,
}

/// A queue and its dispatch machinery.
pub(crate) struct Queue {
    name: QueueName,
    shared: Arc<EngineShared>,
    inner: Mutex<QueueInner>,
    /// Wakes the dispatch loop on any state change. The loop is the only
    /// waiter, so `notify_one` permits are never lost.
    notify: Notify,
    /// Wakes hard-purge waiters when an in-flight dispatch completes.
    quiesced: Notify,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

enum Step {
    Dispatch(TimerEntry),
    WaitUntil(DateTime<Utc>),
    Idle,
}

enum Launch {
    Go {
        request: crate::dispatch::DispatchRequest,
        abort: CancellationToken,
        attempt: i32,
    },
    Skip,
}

impl Queue {
    pub(crate) fn new(name: QueueName, config: QueueConfig, shared: Arc<EngineShared>) -> Arc<Self> {
        let now = shared.clock.now();
        let shutdown = CancellationToken::new();
        let permits = usize::try_from(config.rate_limits.max_concurrent_dispatches).unwrap_or(1);
        let inner = QueueInner {
            state: QueueState::Running,
            bucket: TokenBucket::new(&config.rate_limits, now),
            config,
            tasks: HashMap::new(),
            timers: BinaryHeap::new(),
            ready: VecDeque::new(),
            abort: shutdown.child_token(),
            inflight: 0,
            next_seq: 0,
        };
        Arc::new(Self {
            name,
            shared,
            inner: Mutex::new(inner),
            notify: Notify::new(),
            quiesced: Notify::new(),
            semaphore: Arc::new(Semaphore::new(permits)),
            shutdown,
        })
    }

    // Recover the guard after a panicked holder; the state is kept
    // consistent by construction, not by unwinding.
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            name: self.name.clone(),
            state: inner.state,
            config: inner.config.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Task operations (called through the registry)
    // ------------------------------------------------------------------

    pub(crate) fn insert_task(&self, name: TaskName, new: NewTask) -> Result<TaskSnapshot> {
        let now = self.shared.clock.now();
        let mut inner = self.lock();
        if inner.state == QueueState::Deleted {
            return Err(Error::not_found("queue", self.name.to_string()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let schedule_time = new.schedule_time.unwrap_or(now);
        let task = Task {
            name,
            payload: new.payload,
            schedule_time,
            create_time: now,
            dispatch_deadline: new.dispatch_deadline,
            dispatch_count: 0,
            response_count: 0,
            first_attempt: None,
            last_attempt: None,
            state: TaskState::Pending,
            seq,
            timer_epoch: 0,
        };
        let snapshot = task.snapshot();
        inner.timers.push(Reverse(TimerEntry {
            at: schedule_time,
            seq,
            task_id: task.name.task_id.clone(),
            epoch: 0,
        }));
        inner.tasks.insert(task.name.task_id.clone(), task);
        drop(inner);
        self.notify.notify_one();
        Ok(snapshot)
    }

    pub(crate) fn get_task(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.lock().tasks.get(task_id).map(Task::snapshot)
    }

    pub(crate) fn list_tasks(&self) -> Vec<TaskSnapshot> {
        let inner = self.lock();
        let mut tasks: Vec<&Task> = inner.tasks.values().collect();
        tasks.sort_by_key(|task| task.seq);
        tasks.iter().map(|task| task.snapshot()).collect()
    }

    pub(crate) fn delete_task(&self, task_id: &str) -> Result<()> {
        let mut inner = self.lock();
        // Stale timer/ready entries are invalidated lazily; a mid-dispatch
        // outcome is discarded when the lookup fails.
        if inner.tasks.remove(task_id).is_none() {
            return Err(Error::not_found(
                "task",
                format!("{}/tasks/{task_id}", self.name),
            ));
        }
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    pub(crate) fn run_task(&self, task_id: &str) -> Result<TaskSnapshot> {
        let now = self.shared.clock.now();
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Err(Error::not_found(
                "task",
                format!("{}/tasks/{task_id}", self.name),
            ));
        };
        match task.state {
            TaskState::Dispatching => Err(Error::failed_precondition(format!(
                "task is currently dispatching: {}",
                task.name
            ))),
            // Already due; it will fire as soon as budget allows.
            TaskState::Ready => Ok(task.snapshot()),
            TaskState::Pending => {
                task.schedule_time = now;
                task.timer_epoch += 1;
                let entry = TimerEntry {
                    at: now,
                    seq: task.seq,
                    task_id: task.name.task_id.clone(),
                    epoch: task.timer_epoch,
                };
                let snapshot = task.snapshot();
                inner.timers.push(Reverse(entry));
                drop(inner);
                self.notify.notify_one();
                Ok(snapshot)
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn pause(&self) -> QueueSnapshot {
        {
            let mut inner = self.lock();
            if inner.state == QueueState::Running {
                inner.state = QueueState::Paused;
            }
        }
        self.notify.notify_one();
        tracing::info!(queue = %self.name, "queue paused");
        self.snapshot()
    }

    pub(crate) fn resume(&self) -> QueueSnapshot {
        {
            let mut inner = self.lock();
            if inner.state == QueueState::Paused {
                inner.state = QueueState::Running;
            }
        }
        self.notify.notify_one();
        tracing::info!(queue = %self.name, "queue resumed");
        self.snapshot()
    }

    /// Fire-and-forget purge: every queued task is dropped; in-flight
    /// dispatches finish but their outcomes are discarded.
    pub(crate) fn purge(&self) {
        let dropped = {
            let mut inner = self.lock();
            let dropped = inner.tasks.len();
            inner.tasks.clear();
            inner.timers.clear();
            inner.ready.clear();
            dropped
        };
        self.notify.notify_one();
        tracing::info!(queue = %self.name, dropped, "queue purged");
    }

    /// Hard-reset purge: aborts in-flight dispatches and returns only once
    /// the queue is quiescent.
    pub(crate) async fn purge_and_quiesce(&self) {
        {
            let mut inner = self.lock();
            inner.tasks.clear();
            inner.timers.clear();
            inner.ready.clear();
            let stale = std::mem::replace(&mut inner.abort, self.shutdown.child_token());
            stale.cancel();
        }
        self.notify.notify_one();

        loop {
            let quiesced = self.quiesced.notified();
            tokio::pin!(quiesced);
            // Register before checking, so a completion between the check
            // and the await is not lost.
            quiesced.as_mut().enable();
            if self.lock().inflight == 0 {
                break;
            }
            quiesced.await;
        }
        tracing::info!(queue = %self.name, "queue purged and quiescent");
    }

    /// Purges, marks the queue deleted, and stops the dispatch loop. The
    /// registry joins the loop handle after calling this.
    pub(crate) fn begin_shutdown(&self) {
        self.purge();
        self.lock().state = QueueState::Deleted;
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // Dispatch loop
    // ------------------------------------------------------------------

    pub(crate) async fn run(self: Arc<Self>) {
        tracing::debug!(queue = %self.name, "dispatch loop started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.next_step() {
                Step::Dispatch(entry) => Self::acquire_and_launch(&self, entry).await,
                Step::WaitUntil(at) => {
                    tokio::select! {
                        () = self.shared.clock.sleep_until(at) => {}
                        () = self.notify.notified() => {}
                        () = self.shutdown.cancelled() => {}
                    }
                }
                Step::Idle => {
                    tokio::select! {
                        () = self.notify.notified() => {}
                        () = self.shutdown.cancelled() => {}
                    }
                }
            }
        }
        tracing::debug!(queue = %self.name, "dispatch loop stopped");
    }

    /// Promotes due timers and picks the next action without blocking.
    fn next_step(&self) -> Step {
        let now = self.shared.clock.now();
        let mut inner = self.lock();

        // PENDING -> READY is driven purely by timers; pause gates
        // dispatch, not promotion.
        while let Some(Reverse(head)) = inner.timers.peek() {
            if head.at > now {
                break;
            }
            let Some(Reverse(entry)) = inner.timers.pop() else {
                break;
            };
            let promote = inner.tasks.get(&entry.task_id).is_some_and(|task| {
                task.timer_epoch == entry.epoch && task.state == TaskState::Pending
            });
            if promote {
                if let Some(task) = inner.tasks.get_mut(&entry.task_id) {
                    task.state = TaskState::Ready;
                }
                inner.ready.push_back(entry);
            }
        }

        if inner.state == QueueState::Paused {
            return Step::Idle;
        }
        if let Some(entry) = inner.ready.pop_front() {
            return Step::Dispatch(entry);
        }
        match inner.timers.peek() {
            Some(Reverse(head)) => Step::WaitUntil(head.at),
            None => Step::Idle,
        }
    }

    /// Takes a rate token and a concurrency slot for the entry, then
    /// launches the attempt. Re-defers on pause, abandons on deletion.
    async fn acquire_and_launch(this: &Arc<Self>, entry: TimerEntry) {
        // Rate gate.
        loop {
            let wait = {
                let mut inner = this.lock();
                if inner.state == QueueState::Paused {
                    inner.ready.push_front(entry);
                    return;
                }
                if !inner
                    .tasks
                    .get(&entry.task_id)
                    .is_some_and(|task| task.state == TaskState::Ready)
                {
                    return;
                }
                let now = this.shared.clock.now();
                if inner.bucket.try_take(now) {
                    break;
                }
                inner.bucket.time_until_token(now)
            };
            tokio::select! {
                () = this.shared.clock.sleep(wait) => {}
                () = this.notify.notified() => {}
                () = this.shutdown.cancelled() => return,
            }
        }

        // Concurrency gate.
        let permit = tokio::select! {
            permit = Arc::clone(&this.semaphore).acquire_owned() => {
                let Ok(permit) = permit else { return };
                permit
            }
            () = this.shutdown.cancelled() => return,
        };

        let task_id = entry.task_id.clone();
        match this.prepare_launch(entry) {
            Launch::Skip => drop(permit),
            Launch::Go {
                request,
                abort,
                attempt,
            } => {
                let queue = Arc::clone(this);
                let span =
                    mimiq_core::observability::dispatch_span(&queue.name.to_string(), &task_id, attempt);
                tokio::spawn(
                    async move {
                        let outcome = queue
                            .shared
                            .dispatcher
                            .dispatch(request, abort.clone())
                            .await;
                        queue.apply_outcome(&task_id, &outcome);
                        // Slot frees only after the outcome is recorded.
                        drop(permit);
                    }
                    .instrument(span),
                );
            }
        }
    }

    /// Final pre-flight check under the lock: re-verify state, build the
    /// request, and count the attempt.
    fn prepare_launch(&self, entry: TimerEntry) -> Launch {
        let now = self.shared.clock.now();
        let mut inner = self.lock();

        if inner.state == QueueState::Paused {
            // Paused since pick-up: resources go back, no attempt counted.
            inner.ready.push_front(entry);
            return Launch::Skip;
        }
        let routing_default = inner.config.app_engine_routing_override.clone();
        let Some(task) = inner.tasks.get_mut(&entry.task_id) else {
            return Launch::Skip;
        };
        if task.state != TaskState::Ready {
            return Launch::Skip;
        }

        let resolver = TargetResolver {
            queue_id: &self.name.queue_id,
            routing_default: routing_default.as_ref(),
            app_engine_host: self.shared.app_engine_host.as_deref(),
            signer: &self.shared.signer,
        };
        let request = match resolver.build(task, now) {
            Ok(request) => request,
            Err(error) => {
                // Non-retryable: no request goes out, so no attempt is
                // counted; the task is dropped.
                tracing::warn!(
                    queue = %self.name,
                    task = %entry.task_id,
                    error = %error,
                    "dropping task: dispatch cannot be constructed"
                );
                inner.tasks.remove(&entry.task_id);
                return Launch::Skip;
            }
        };

        task.dispatch_count += 1;
        task.state = TaskState::Dispatching;
        let attempt = Attempt {
            schedule_time: task.schedule_time,
            dispatch_time: Some(now),
            response_time: None,
            response_status: None,
            response_message: None,
        };
        if task.first_attempt.is_none() {
            task.first_attempt = Some(attempt.clone());
        }
        task.last_attempt = Some(attempt);
        let attempt_number = task.dispatch_count;
        inner.inflight += 1;
        let abort = inner.abort.clone();

        Launch::Go {
            request,
            abort,
            attempt: attempt_number,
        }
    }

    /// Records an attempt outcome and decides the task's fate.
    fn apply_outcome(&self, task_id: &str, outcome: &DispatchOutcome) {
        let now = self.shared.clock.now();
        let mut inner = self.lock();
        inner.inflight -= 1;
        let retry_config = inner.config.retry.clone();

        let Some(task) = inner.tasks.get_mut(task_id) else {
            // Deleted or purged mid-flight: the outcome is discarded.
            drop(inner);
            self.quiesced.notify_waiters();
            self.notify.notify_one();
            return;
        };

        if outcome.status.is_some() {
            task.response_count += 1;
        }
        let is_first = task.dispatch_count == 1;
        let record = |slot: &mut Option<Attempt>| {
            if let Some(attempt) = slot {
                attempt.response_time = Some(now);
                attempt.response_status = outcome.status;
                attempt.response_message = Some(outcome.describe());
            }
        };
        record(&mut task.last_attempt);
        if is_first {
            record(&mut task.first_attempt);
        }

        if outcome.is_success() {
            tracing::info!(
                queue = %self.name,
                task = %task_id,
                attempts = task.dispatch_count,
                "task completed"
            );
            inner.tasks.remove(task_id);
        } else {
            let first_dispatch = task
                .first_attempt
                .as_ref()
                .and_then(|attempt| attempt.dispatch_time);
            match retry::evaluate(&retry_config, task.dispatch_count, first_dispatch, now) {
                RetryDecision::GiveUp => {
                    tracing::warn!(
                        queue = %self.name,
                        task = %task_id,
                        attempts = task.dispatch_count,
                        outcome = %outcome.describe(),
                        "task exhausted retries"
                    );
                    inner.tasks.remove(task_id);
                }
                RetryDecision::Retry { backoff } => {
                    tracing::debug!(
                        queue = %self.name,
                        task = %task_id,
                        attempts = task.dispatch_count,
                        outcome = %outcome.describe(),
                        backoff_ms = backoff.as_millis() as u64,
                        "task will retry"
                    );
                    task.state = TaskState::Pending;
                    task.schedule_time = now
                        + chrono::Duration::from_std(backoff)
                            .unwrap_or_else(|_| chrono::Duration::MAX);
                    task.timer_epoch += 1;
                    let entry = TimerEntry {
                        at: task.schedule_time,
                        seq: task.seq,
                        task_id: task.name.task_id.clone(),
                        epoch: task.timer_epoch,
                    };
                    inner.timers.push(Reverse(entry));
                }
            }
        }

        drop(inner);
        self.quiesced.notify_waiters();
        self.notify.notify_one();
    }
}

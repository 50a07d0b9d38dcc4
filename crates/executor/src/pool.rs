//! Bounded worker pool
//!
//! A pool runs submitted tasks on at most `max_concurrency` long-lived worker
//! tasks. Excess submissions wait in a bounded queue; past that, the pool's
//! overload policy decides between rejecting and running on the caller.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use expense_core::TaskError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::async_result::{AsyncResult, SettleOnDrop};
use crate::config::{OverloadPolicy, PoolConfigError, WorkerPoolConfig};

/// How often shutdown re-checks for remaining work
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

type Job = BoxFuture<'static, ()>;

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPoolStatus {
    /// Accepting and executing tasks
    Running,
    /// Finishing queued and in-flight tasks, not accepting new ones
    Draining,
    /// Stopped; submissions are rejected
    Stopped,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub ran_on_caller: u64,
    pub aborted: u64,
    /// Live worker tasks, busy or idle
    pub workers: usize,
    pub idle_workers: usize,
    pub queued: usize,
}

/// Outcome of [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// All work finished before the drain timeout
    pub drained: bool,
    /// Queued or in-flight tasks cancelled after the drain timeout
    pub aborted: usize,
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    ran_on_caller: AtomicU64,
    aborted: AtomicU64,
}

impl PoolCounters {
    fn record<T>(&self, outcome: &Result<T, TaskError>) {
        let counter = if outcome.is_ok() {
            &self.completed
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct PoolState {
    queue: VecDeque<Job>,
    workers: usize,
    idle: usize,
    status: WorkerPoolStatus,
}

struct PoolInner {
    config: WorkerPoolConfig,
    state: Mutex<PoolState>,
    work_available: Notify,
    workers: Mutex<JoinSet<()>>,
    counters: Arc<PoolCounters>,
}

enum Admission {
    Queued { spawn_worker: bool },
    Overloaded(Job),
    Closed(Job),
}

enum NextStep {
    Run(Job),
    Wait,
    Exit,
}

/// A named, bounded execution context
///
/// Cheap to clone; clones share the same workers and queue.
///
/// # Example
///
/// ```ignore
/// use expense_executor::{WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::general())?;
/// let result = pool.submit(|| async { Ok(21 * 2) }).await;
/// assert_eq!(result.wait().await?, 42);
///
/// let report = pool.shutdown().await;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.config.name)
            .field("status", &self.status())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool; workers start with the first submissions
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolConfigError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    status: WorkerPoolStatus::Running,
                }),
                work_available: Notify::new(),
                workers: Mutex::new(JoinSet::new()),
                counters: Arc::new(PoolCounters::default()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    pub fn status(&self) -> WorkerPoolStatus {
        self.inner.state.lock().status
    }

    pub fn is_accepting(&self) -> bool {
        self.status() == WorkerPoolStatus::Running
    }

    pub fn stats(&self) -> PoolStats {
        let (workers, idle_workers, queued) = {
            let state = self.inner.state.lock();
            (state.workers, state.idle, state.queue.len())
        };
        let counters = &self.inner.counters;

        PoolStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            ran_on_caller: counters.ran_on_caller.load(Ordering::Relaxed),
            aborted: counters.aborted.load(Ordering::Relaxed),
            workers,
            idle_workers,
            queued,
        }
    }

    /// Submit a task and get a handle to its outcome
    ///
    /// Returns once the task is queued, rejected, or (under the run-on-caller
    /// policy with a saturated pool) already executed on the caller.
    pub async fn submit<T, F, Fut>(&self, task: F) -> AsyncResult<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let result = AsyncResult::pending();
        self.submit_into(result.clone(), task).await;
        result
    }

    /// Submit a task whose outcome settles an existing result
    pub(crate) async fn submit_into<T, F, Fut>(&self, result: AsyncResult<T>, task: F)
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let job = self.wrap(result.clone(), task);

        match self.admit(job) {
            Admission::Queued { spawn_worker: true } => self.spawn_worker(),
            Admission::Queued { spawn_worker: false } => self.inner.work_available.notify_one(),
            Admission::Overloaded(job) => match self.inner.config.overload_policy {
                OverloadPolicy::CallerRuns => {
                    self.inner
                        .counters
                        .ran_on_caller
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(pool = %self.name(), "Pool saturated, running task on caller");
                    job.await;
                }
                OverloadPolicy::Reject => {
                    self.reject(&result, "queue is full");
                    drop(job);
                }
            },
            Admission::Closed(job) => {
                self.reject(&result, "pool is shutting down");
                drop(job);
            }
        }
    }

    fn reject<T>(&self, result: &AsyncResult<T>, reason: &str) {
        self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(pool = %self.name(), reason, "Task rejected");
        result.fail(TaskError::Rejected {
            pool: self.name().to_string(),
            reason: reason.to_string(),
        });
    }

    /// Box a task into a job that always settles `result`
    fn wrap<T, F, Fut>(&self, result: AsyncResult<T>, task: F) -> Job
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let guard = SettleOnDrop::new(result, self.name());
        let counters = Arc::clone(&self.inner.counters);
        let span = tracing::debug_span!("pool_task", pool = %self.name());

        async move {
            let outcome = match AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!("Task panicked");
                    Err(TaskError::Aborted("task panicked".to_string()))
                }
            };
            counters.record(&outcome);
            guard.settle(outcome);
        }
        .instrument(span)
        .boxed()
    }

    fn admit(&self, job: Job) -> Admission {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();

        if state.status != WorkerPoolStatus::Running {
            return Admission::Closed(job);
        }

        let needs_worker =
            state.workers < config.min_concurrency || state.idle <= state.queue.len();
        if needs_worker && state.workers < config.max_concurrency {
            state.queue.push_back(job);
            state.workers += 1;
            return Admission::Queued { spawn_worker: true };
        }

        if state.queue.len() < config.queue_capacity || state.idle > state.queue.len() {
            state.queue.push_back(job);
            return Admission::Queued {
                spawn_worker: false,
            };
        }

        Admission::Overloaded(job)
    }

    fn spawn_worker(&self) {
        let inner = Arc::clone(&self.inner);
        let mut workers = self.inner.workers.lock();
        while workers.try_join_next().is_some() {}
        workers.spawn(run_worker(inner));
    }

    /// Stop accepting work, drain, then cancel whatever is left
    ///
    /// Waits up to the drain timeout for queued and in-flight tasks. Tasks
    /// still queued or running after that are cancelled and their results
    /// fail with `Aborted`.
    #[instrument(skip(self), fields(pool = %self.name()))]
    pub async fn shutdown(&self) -> ShutdownReport {
        {
            let mut state = self.inner.state.lock();
            if state.status != WorkerPoolStatus::Running {
                return ShutdownReport {
                    drained: state.status == WorkerPoolStatus::Stopped,
                    aborted: 0,
                };
            }
            state.status = WorkerPoolStatus::Draining;
        }

        info!(pool = %self.name(), "Draining worker pool");

        let deadline = tokio::time::Instant::now() + self.inner.config.drain_timeout;
        let drained = loop {
            self.inner.work_available.notify_waiters();

            let (workers, queued) = {
                let state = self.inner.state.lock();
                (state.workers, state.queue.len())
            };
            if workers == 0 && queued == 0 {
                debug!("All tasks completed");
                break true;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(workers, queued, "Drain timeout reached, cancelling remaining tasks");
                break false;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        };

        let (discarded, in_flight) = {
            let mut state = self.inner.state.lock();
            state.status = WorkerPoolStatus::Stopped;
            let discarded: Vec<Job> = state.queue.drain(..).collect();
            let in_flight = state.workers.saturating_sub(state.idle);
            state.workers = 0;
            state.idle = 0;
            (discarded, in_flight)
        };

        let aborted = discarded.len() + in_flight;
        drop(discarded);
        self.inner.workers.lock().abort_all();
        self.inner
            .counters
            .aborted
            .fetch_add(aborted as u64, Ordering::Relaxed);

        info!(drained, aborted, "Worker pool stopped");
        ShutdownReport { drained, aborted }
    }
}

async fn run_worker(inner: Arc<PoolInner>) {
    debug!(pool = %inner.config.name, "Worker started");

    loop {
        let step = {
            let mut state = inner.state.lock();
            match state.queue.pop_front() {
                Some(job) => NextStep::Run(job),
                None if state.status != WorkerPoolStatus::Running => {
                    state.workers = state.workers.saturating_sub(1);
                    NextStep::Exit
                }
                None => {
                    state.idle += 1;
                    NextStep::Wait
                }
            }
        };

        match step {
            NextStep::Run(job) => job.await,
            NextStep::Exit => {
                debug!(pool = %inner.config.name, "Worker exiting");
                return;
            }
            NextStep::Wait => {
                let woken =
                    tokio::time::timeout(inner.config.keep_alive, inner.work_available.notified())
                        .await
                        .is_ok();

                let mut state = inner.state.lock();
                state.idle = state.idle.saturating_sub(1);
                if !woken
                    && state.queue.is_empty()
                    && state.workers > inner.config.min_concurrency
                {
                    state.workers -= 1;
                    drop(state);
                    debug!(pool = %inner.config.name, "Idle worker retired");
                    return;
                }
            }
        }
    }
}

//! Composable handle to the outcome of pooled work
//!
//! An [`AsyncResult`] starts `Pending` and moves at most once to `Completed`
//! or `Failed`. Later completion attempts are ignored and report `false`.
//! Handles are cheap to clone; every clone observes the same state.

use std::future::Future;
use std::sync::Arc;

use expense_core::TaskError;
use tokio::sync::watch;

use crate::pool::WorkerPool;

/// Snapshot of an [`AsyncResult`]
#[derive(Debug, Clone, PartialEq)]
pub enum ResultState<T> {
    Pending,
    Completed(T),
    Failed(TaskError),
}

impl<T> ResultState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// `None` while pending
    pub fn into_result(self) -> Option<Result<T, TaskError>> {
        match self {
            Self::Pending => None,
            Self::Completed(value) => Some(Ok(value)),
            Self::Failed(err) => Some(Err(err)),
        }
    }
}

/// Handle to a value or classified failure produced by pooled work
pub struct AsyncResult<T> {
    state: Arc<watch::Sender<ResultState<T>>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.borrow() {
            ResultState::Pending => "pending",
            ResultState::Completed(_) => "completed",
            ResultState::Failed(_) => "failed",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

impl<T> AsyncResult<T> {
    /// A result nobody has completed yet
    pub fn pending() -> Self {
        let (tx, _rx) = watch::channel(ResultState::Pending);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn completed(value: T) -> Self {
        let result = Self::pending();
        result.complete(value);
        result
    }

    pub fn failed(err: TaskError) -> Self {
        let result = Self::pending();
        result.fail(err);
        result
    }

    pub fn from_result(outcome: Result<T, TaskError>) -> Self {
        let result = Self::pending();
        result.settle(outcome);
        result
    }

    /// Move to a terminal state; `false` if the result was already terminal
    pub fn settle(&self, outcome: Result<T, TaskError>) -> bool {
        self.state.send_if_modified(move |state| {
            if state.is_terminal() {
                return false;
            }
            *state = match outcome {
                Ok(value) => ResultState::Completed(value),
                Err(err) => ResultState::Failed(err),
            };
            true
        })
    }

    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn fail(&self, err: TaskError) -> bool {
        self.settle(Err(err))
    }

    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }
}

impl<T> AsyncResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn state(&self) -> ResultState<T> {
        self.state.borrow().clone()
    }

    /// Non-blocking peek; `None` while pending
    pub fn try_get(&self) -> Option<Result<T, TaskError>> {
        self.state().into_result()
    }

    /// Suspend until the result is terminal
    ///
    /// Only suspends the calling task; never parks a thread.
    pub async fn wait(&self) -> Result<T, TaskError> {
        let mut rx = self.state.subscribe();
        let outcome = match rx.wait_for(ResultState::is_terminal).await {
            Ok(state) => state.clone().into_result(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(TaskError::Aborted(
                "result channel closed before completion".to_string(),
            ))
        })
    }

    /// Apply a cheap, non-blocking function to the completed value
    ///
    /// Failures pass through unchanged. Runs inline when the result is
    /// already terminal, otherwise on a lightweight forwarding task.
    pub fn map<U, F>(&self, f: F) -> AsyncResult<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, TaskError> + Send + 'static,
    {
        if let Some(outcome) = self.try_get() {
            return AsyncResult::from_result(outcome.and_then(f));
        }

        let downstream = AsyncResult::pending();
        let upstream = self.clone();
        let out = downstream.clone();
        tokio::spawn(async move {
            out.settle(upstream.wait().await.and_then(f));
        });
        downstream
    }

    /// Dispatch a dependent stage onto `pool` once this result completes
    ///
    /// The continuation is submitted only after the upstream value exists, so
    /// no pool worker ever waits on another pool's queue. An upstream failure
    /// short-circuits: `f` is never called and the failure is propagated.
    pub fn and_then<U, F, Fut>(&self, pool: &WorkerPool, f: F) -> AsyncResult<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, TaskError>> + Send + 'static,
    {
        let downstream = AsyncResult::pending();
        let upstream = self.clone();
        let out = downstream.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            match upstream.wait().await {
                Ok(value) => pool.submit_into(out, move || f(value)).await,
                Err(err) => {
                    out.fail(err);
                }
            }
        });
        downstream
    }

    /// Observe the terminal outcome without affecting it
    ///
    /// Used for fire-and-forget work: the caller drops its handle and the
    /// observer still sees success or failure.
    pub fn on_settled<F>(&self, f: F)
    where
        F: FnOnce(Result<T, TaskError>) + Send + 'static,
    {
        let upstream = self.clone();
        tokio::spawn(async move {
            f(upstream.wait().await);
        });
    }

    /// Observe only a failure; successes are ignored
    pub fn inspect_failure<F>(&self, f: F)
    where
        F: FnOnce(&TaskError) + Send + 'static,
    {
        self.on_settled(move |outcome| {
            if let Err(err) = &outcome {
                f(err);
            }
        });
    }

    /// Join many results into one
    ///
    /// The joined result completes only when every input is terminal and
    /// carries each input's outcome in input order. It never fails itself.
    pub fn join_all(results: Vec<AsyncResult<T>>) -> AsyncResult<Vec<Result<T, TaskError>>> {
        if results.iter().all(AsyncResult::is_terminal) {
            let outcomes = results
                .iter()
                .filter_map(AsyncResult::try_get)
                .collect::<Vec<_>>();
            return AsyncResult::completed(outcomes);
        }

        let joined = AsyncResult::pending();
        let out = joined.clone();
        tokio::spawn(async move {
            let outcomes = futures::future::join_all(results.iter().map(AsyncResult::wait)).await;
            out.complete(outcomes);
        });
        joined
    }
}

/// Fails the wrapped result with `Aborted` if dropped before settling
///
/// Travels inside every queued job so that jobs discarded at shutdown, or
/// cancelled mid-flight, still resolve their result.
pub(crate) struct SettleOnDrop<T> {
    result: Option<AsyncResult<T>>,
    pool: String,
}

impl<T> SettleOnDrop<T> {
    pub(crate) fn new(result: AsyncResult<T>, pool: &str) -> Self {
        Self {
            result: Some(result),
            pool: pool.to_string(),
        }
    }

    pub(crate) fn settle(mut self, outcome: Result<T, TaskError>) {
        if let Some(result) = self.result.take() {
            result.settle(outcome);
        }
    }
}

impl<T> Drop for SettleOnDrop<T> {
    fn drop(&mut self) {
        if let Some(result) = self.result.take() {
            result.fail(TaskError::Aborted(format!(
                "task on pool '{}' was cancelled before completing",
                self.pool
            )));
        }
    }
}

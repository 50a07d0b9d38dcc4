//! Best-effort reconciliation with an external system after writes
//!
//! The sync task's result is discarded by the caller but handed to a
//! [`BestEffortSink`], which logs failures and keeps the recent outcomes so
//! they can be inspected without affecting the caller's result.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use expense_core::TaskError;
use expense_executor::AsyncResult;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, warn};

pub const SYNC_SERVICE: &str = "reconciliation-sync";

/// Outcomes kept by a sink before the oldest are dropped
const MAX_RECORDS: usize = 1024;

/// Target of the post-write sync
#[async_trait]
pub trait ReconciliationSync: Send + Sync {
    async fn sync_user(&self, user_id: i64) -> Result<(), TaskError>;
}

/// Sync target used when none is configured
pub struct NoopReconciliationSync;

#[async_trait]
impl ReconciliationSync for NoopReconciliationSync {
    async fn sync_user(&self, user_id: i64) -> Result<(), TaskError> {
        debug!(user_id, "No sync target configured, skipping");
        Ok(())
    }
}

/// Posts `{"userId": ..}` to a webhook
pub struct WebhookReconciliationSync {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookReconciliationSync {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ReconciliationSync for WebhookReconciliationSync {
    async fn sync_user(&self, user_id: i64) -> Result<(), TaskError> {
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&json!({ "userId": user_id }))
            .send()
            .await
            .map_err(|e| TaskError::external(SYNC_SERVICE, e.to_string(), true))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(TaskError::external(
            SYNC_SERVICE,
            format!("webhook returned {status}"),
            status.is_server_error(),
        ))
    }
}

/// One observed sync outcome
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub user_id: i64,
    pub outcome: Result<(), TaskError>,
}

/// Observer for fire-and-forget sync tasks
#[derive(Clone, Default)]
pub struct BestEffortSink {
    records: Arc<Mutex<VecDeque<SyncRecord>>>,
    recorded: Arc<Notify>,
}

impl BestEffortSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of `result` once it settles
    pub fn observe(&self, user_id: i64, result: &AsyncResult<()>) {
        let sink = self.clone();
        result.on_settled(move |outcome| sink.record(user_id, outcome));
    }

    fn record(&self, user_id: i64, outcome: Result<(), TaskError>) {
        match &outcome {
            Ok(()) => debug!(user_id, "Best-effort sync completed"),
            Err(e) => warn!(user_id, error = %e, "Best-effort sync failed"),
        }

        {
            let mut records = self.records.lock();
            if records.len() == MAX_RECORDS {
                records.pop_front();
            }
            records.push_back(SyncRecord { user_id, outcome });
        }
        self.recorded.notify_waiters();
    }

    pub fn records(&self) -> Vec<SyncRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn failures(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.outcome.is_err())
            .count()
    }

    /// Wait until at least `count` outcomes have been recorded
    pub async fn wait_for(&self, count: usize) {
        loop {
            let recorded = self.recorded.notified();
            if self.records.lock().len() >= count {
                return;
            }
            recorded.await;
        }
    }
}

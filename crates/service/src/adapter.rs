//! User validation against the remote user service
//!
//! Calls run on the external pool with a fixed timeout, and every result is
//! classified into an [`ExternalCallOutcome`]. The adapter never retries;
//! callers decide based on the `retriable` flag.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use expense_core::{TaskError, UserRecord};
use expense_executor::{AsyncResult, WorkerPool};
use tracing::{debug, error, warn};

use crate::user_client::{DirectoryError, UserDirectory};

/// Service name carried by external failures
pub const USER_SERVICE: &str = "user-service";

pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Classified result of a user lookup
///
/// `NotFound` is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalCallOutcome {
    Found(UserRecord),
    NotFound,
    ServiceFailure { retriable: bool, cause: String },
}

impl ExternalCallOutcome {
    /// Turn the outcome into the user or the failure a caller surfaces
    pub fn into_user(self, key: impl std::fmt::Display) -> Result<UserRecord, TaskError> {
        match self {
            Self::Found(user) => Ok(user),
            Self::NotFound => Err(TaskError::not_found("User", key)),
            Self::ServiceFailure { retriable, cause } => {
                Err(TaskError::external(USER_SERVICE, cause, retriable))
            }
        }
    }
}

/// Time-bounded, classified access to the user directory
#[derive(Clone)]
pub struct UserValidationAdapter {
    directory: Arc<dyn UserDirectory>,
    pool: WorkerPool,
    timeout: Duration,
}

impl UserValidationAdapter {
    /// `pool` should be the external pool
    pub fn new(directory: Arc<dyn UserDirectory>, pool: WorkerPool) -> Self {
        Self {
            directory,
            pool,
            timeout: DEFAULT_VALIDATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn validate_user(&self, user_id: i64) -> AsyncResult<ExternalCallOutcome> {
        let directory = Arc::clone(&self.directory);
        let timeout = self.timeout;
        self.pool
            .submit(move || async move {
                debug!(user_id, "Validating user");
                let lookup = directory.get_user_by_id(user_id);
                Ok(classify(timeout, &user_id.to_string(), lookup).await)
            })
            .await
    }

    pub async fn validate_username(&self, username: &str) -> AsyncResult<ExternalCallOutcome> {
        let directory = Arc::clone(&self.directory);
        let timeout = self.timeout;
        let username = username.to_string();
        self.pool
            .submit(move || async move {
                debug!(%username, "Validating username");
                let lookup = directory.get_user_by_username(&username);
                Ok(classify(timeout, &username, lookup).await)
            })
            .await
    }
}

async fn classify<F>(timeout: Duration, key: &str, lookup: F) -> ExternalCallOutcome
where
    F: Future<Output = Result<UserRecord, DirectoryError>>,
{
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(user)) => ExternalCallOutcome::Found(user),
        Ok(Err(DirectoryError::Status { status, body })) if (400..500).contains(&status) => {
            warn!(key, status, %body, "User service rejected lookup, treating as not found");
            ExternalCallOutcome::NotFound
        }
        Ok(Err(DirectoryError::Status { status, body })) => {
            error!(key, status, %body, "User service returned an error");
            ExternalCallOutcome::ServiceFailure {
                retriable: true,
                cause: format!("user service returned {status}"),
            }
        }
        Ok(Err(DirectoryError::Transport(message))) => {
            error!(key, error = %message, "Failed to communicate with user service");
            ExternalCallOutcome::ServiceFailure {
                retriable: true,
                cause: format!("communication error: {message}"),
            }
        }
        Ok(Err(DirectoryError::InvalidUrl(message))) => {
            error!(key, error = %message, "User service url is unusable");
            ExternalCallOutcome::ServiceFailure {
                retriable: false,
                cause: format!("invalid user service url: {message}"),
            }
        }
        Ok(Err(DirectoryError::Malformed(message))) => {
            error!(key, error = %message, "User service response could not be parsed");
            ExternalCallOutcome::ServiceFailure {
                retriable: false,
                cause: format!("malformed response: {message}"),
            }
        }
        Err(_) => {
            error!(key, timeout_ms = timeout.as_millis() as u64, "User service call timed out");
            ExternalCallOutcome::ServiceFailure {
                retriable: true,
                cause: format!("timed out after {}ms", timeout.as_millis()),
            }
        }
    }
}

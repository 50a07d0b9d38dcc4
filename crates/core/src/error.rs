//! Failure taxonomy for work dispatched through worker pools
//!
//! Every async result in the service fails with a [`TaskError`]. The
//! coarse [`ErrorKind`] is what batch runs record per user and what callers
//! branch on when deciding whether to retry.

use serde::{Deserialize, Serialize};

/// Coarse classification of a [`TaskError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input violates a business rule
    Validation,
    /// Referenced entity is absent
    NotFound,
    /// Remote collaborator unreachable or failing
    ExternalService,
    /// Storage failure
    DataAccess,
    /// Worker pool overloaded or shutting down
    Rejected,
    /// Task cancelled before it produced a result
    Aborted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::ExternalService => write!(f, "external_service"),
            Self::DataAccess => write!(f, "data_access"),
            Self::Rejected => write!(f, "rejected"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// A single business-rule violation
///
/// `index` is set when the violation belongs to one item of a bulk request
/// (0-based position in the submitted sequence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub index: Option<usize>,
    pub message: String,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            index: None,
            message: message.into(),
        }
    }

    pub fn at(index: usize, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(index) => write!(f, "[{}] {}", index, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Typed failure of a unit of work
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// Caller input violates one or more business rules (never retried)
    #[error("validation failed: {}", join_violations(.0))]
    Validation(Vec<Violation>),

    /// Referenced entity does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    /// Remote collaborator failed
    #[error("external service {service} error: {message}")]
    ExternalService {
        service: String,
        message: String,
        retriable: bool,
    },

    /// Storage failure
    #[error("data access error: {0}")]
    DataAccess(String),

    /// Worker pool refused the submission
    #[error("worker pool '{pool}' rejected the task: {reason}")]
    Rejected { pool: String, reason: String },

    /// Task was cancelled before completing
    #[error("task aborted: {0}")]
    Aborted(String),
}

impl TaskError {
    /// Single violation not tied to a bulk item
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![Violation::new(message)])
    }

    pub fn not_found(entity: impl Into<String>, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>, retriable: bool) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
            retriable,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ExternalService { .. } => ErrorKind::ExternalService,
            Self::DataAccess(_) => ErrorKind::DataAccess,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }

    /// Whether a caller may reasonably retry the operation
    ///
    /// Rejections are retriable after backoff; external failures carry their
    /// own classification. Everything else is terminal for this layer.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ExternalService { retriable, .. } => *retriable,
            Self::Rejected { .. } => true,
            _ => false,
        }
    }

    /// Violations carried by a validation failure (empty for other kinds)
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation(violations) => violations,
            _ => &[],
        }
    }
}

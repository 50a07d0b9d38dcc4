//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a pool does with a submission when every worker is busy and the
/// queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadPolicy {
    /// Fail the submission immediately with a rejection
    Reject,
    /// Run the task on the submitting task's context
    CallerRuns,
}

/// Worker pool configuration
///
/// Immutable once the pool is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Pool name, unique within a registry
    pub name: String,

    /// Workers kept alive even when idle
    pub min_concurrency: usize,

    /// Maximum tasks executing at once
    pub max_concurrency: usize,

    /// Tasks allowed to wait for a worker
    pub queue_capacity: usize,

    /// How long a worker above `min_concurrency` stays idle before retiring
    #[serde(with = "duration_millis")]
    pub keep_alive: Duration,

    pub overload_policy: OverloadPolicy,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            min_concurrency: 1,
            max_concurrency: 10,
            queue_capacity: 100,
            keep_alive: Duration::from_secs(60),
            overload_policy: OverloadPolicy::CallerRuns,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Simple reads and writes
    pub fn general() -> Self {
        Self::new("general")
            .with_concurrency(5, 20)
            .with_queue_capacity(100)
            .with_keep_alive(Duration::from_secs(60))
            .with_drain_timeout(Duration::from_secs(30))
    }

    /// Report generation; low concurrency so it cannot starve CRUD work
    pub fn heavy() -> Self {
        Self::new("heavy")
            .with_concurrency(2, 10)
            .with_queue_capacity(50)
            .with_keep_alive(Duration::from_secs(120))
            .with_drain_timeout(Duration::from_secs(60))
    }

    /// Outbound calls to remote collaborators
    pub fn external() -> Self {
        Self::new("external")
            .with_concurrency(3, 15)
            .with_queue_capacity(200)
            .with_keep_alive(Duration::from_secs(30))
            .with_drain_timeout(Duration::from_secs(45))
    }

    pub fn with_concurrency(mut self, min: usize, max: usize) -> Self {
        self.min_concurrency = min;
        self.max_concurrency = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_overload_policy(mut self, policy: OverloadPolicy) -> Self {
        self.overload_policy = policy;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PoolConfigError> {
        if self.name.trim().is_empty() {
            return Err(PoolConfigError::EmptyName);
        }
        if self.max_concurrency == 0 {
            return Err(PoolConfigError::ZeroConcurrency(self.name.clone()));
        }
        if self.min_concurrency > self.max_concurrency {
            return Err(PoolConfigError::MinExceedsMax {
                pool: self.name.clone(),
                min: self.min_concurrency,
                max: self.max_concurrency,
            });
        }
        Ok(())
    }
}

/// Invalid pool configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolConfigError {
    #[error("pool name must not be empty")]
    EmptyName,

    #[error("pool '{0}': max_concurrency must be at least 1")]
    ZeroConcurrency(String),

    #[error("pool '{pool}': min_concurrency {min} exceeds max_concurrency {max}")]
    MinExceedsMax { pool: String, min: usize, max: usize },

    #[error("duplicate pool name: {0}")]
    DuplicateName(String),
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

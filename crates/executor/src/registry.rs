//! The process-wide set of named pools

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::{PoolConfigError, WorkerPoolConfig};
use crate::pool::{PoolStats, ShutdownReport, WorkerPool};

/// Configuration for the three pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolsConfig {
    pub general: WorkerPoolConfig,
    pub heavy: WorkerPoolConfig,
    pub external: WorkerPoolConfig,
}

impl Default for WorkerPoolsConfig {
    fn default() -> Self {
        Self {
            general: WorkerPoolConfig::general(),
            heavy: WorkerPoolConfig::heavy(),
            external: WorkerPoolConfig::external(),
        }
    }
}

/// Registry of the general, heavy and external pools
///
/// Built once at startup and cloned into every component that dispatches work.
#[derive(Debug, Clone)]
pub struct WorkerPools {
    general: WorkerPool,
    heavy: WorkerPool,
    external: WorkerPool,
}

impl WorkerPools {
    pub fn new(config: WorkerPoolsConfig) -> Result<Self, PoolConfigError> {
        {
            let mut names = HashSet::new();
            for pool in [&config.general, &config.heavy, &config.external] {
                if !names.insert(pool.name.as_str()) {
                    return Err(PoolConfigError::DuplicateName(pool.name.clone()));
                }
            }
        }

        Ok(Self {
            general: WorkerPool::new(config.general)?,
            heavy: WorkerPool::new(config.heavy)?,
            external: WorkerPool::new(config.external)?,
        })
    }

    /// Simple reads and writes
    pub fn general(&self) -> &WorkerPool {
        &self.general
    }

    /// Report generation
    pub fn heavy(&self) -> &WorkerPool {
        &self.heavy
    }

    /// Outbound calls to remote collaborators
    pub fn external(&self) -> &WorkerPool {
        &self.external
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerPool> {
        [&self.general, &self.heavy, &self.external].into_iter()
    }

    pub fn stats(&self) -> Vec<(String, PoolStats)> {
        self.iter()
            .map(|pool| (pool.name().to_string(), pool.stats()))
            .collect()
    }

    /// Drain and stop all pools concurrently
    pub async fn shutdown(&self) -> Vec<(String, ShutdownReport)> {
        let (general, heavy, external) = tokio::join!(
            self.general.shutdown(),
            self.heavy.shutdown(),
            self.external.shutdown()
        );

        vec![
            (self.general.name().to_string(), general),
            (self.heavy.name().to_string(), heavy),
            (self.external.name().to_string(), external),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPoolStatus;

    #[test]
    fn test_default_registry() {
        let pools = WorkerPools::new(WorkerPoolsConfig::default()).unwrap();
        assert_eq!(pools.general().name(), "general");
        assert_eq!(pools.heavy().name(), "heavy");
        assert_eq!(pools.external().name(), "external");
        assert_eq!(pools.heavy().config().max_concurrency, 10);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut config = WorkerPoolsConfig::default();
        config.heavy.name = "general".to_string();
        assert_eq!(
            WorkerPools::new(config).unwrap_err(),
            PoolConfigError::DuplicateName("general".into())
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_pool() {
        let pools = WorkerPools::new(WorkerPoolsConfig::default()).unwrap();
        let result = pools.heavy().submit(|| async { Ok(1) }).await;
        assert_eq!(result.wait().await, Ok(1));

        let reports = pools.shutdown().await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|(_, report)| report.drained));
        assert!(pools
            .iter()
            .all(|pool| pool.status() == WorkerPoolStatus::Stopped));
    }
}

//! Worker pools and composable async results
//!
//! Tasks are submitted to one of a small set of named, bounded pools and
//! report through an [`AsyncResult`]. Dependent work is chained with
//! [`AsyncResult::and_then`], which redispatches the continuation to its
//! target pool instead of parking a worker on another pool's queue.

pub mod async_result;
pub mod config;
pub mod pool;
pub mod registry;

pub use async_result::{AsyncResult, ResultState};
pub use config::{OverloadPolicy, PoolConfigError, WorkerPoolConfig};
pub use pool::{PoolStats, ShutdownReport, WorkerPool, WorkerPoolStatus};
pub use registry::{WorkerPools, WorkerPoolsConfig};

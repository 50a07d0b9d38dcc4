pub mod adapter;
pub mod config;
pub mod orchestrator;
pub mod scheduler;
pub mod sync;
pub mod user_client;

// Re-export main types
pub use adapter::{ExternalCallOutcome, UserValidationAdapter, USER_SERVICE};
pub use config::{ConfigError, ReportScheduleConfig, ServiceConfig};
pub use orchestrator::ExpenseOrchestrator;
pub use scheduler::{BatchReportScheduler, BatchRun, BatchStatus, SchedulerPhase, UserOutcome};
pub use sync::{
    BestEffortSink, NoopReconciliationSync, ReconciliationSync, SyncRecord,
    WebhookReconciliationSync,
};
pub use user_client::{DirectoryError, HttpUserDirectory, UserDirectory};

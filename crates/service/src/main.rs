use std::sync::Arc;

use anyhow::{Context, Result};
use expense_core::telemetry::{init_telemetry, TelemetryConfig};
use expense_executor::WorkerPools;
use expense_service::{
    BatchReportScheduler, ExpenseOrchestrator, HttpUserDirectory, NoopReconciliationSync,
    ReconciliationSync, ServiceConfig, UserValidationAdapter, WebhookReconciliationSync,
};
use expense_storage::{ExpenseRepository, InMemoryExpenseRepository, PostgresExpenseRepository};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG or LOG_LEVEL: log filter (default: "expense_service=debug")
    // LOG_FORMAT=json: JSON lines
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "expense" {
        telemetry_config.service_name = "expense-service".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("expense_service=debug,expense_executor=info".to_string());
    }
    init_telemetry(&telemetry_config);

    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    let pools = WorkerPools::new(config.pools.clone()).context("Invalid worker pool configuration")?;

    let repository: Arc<dyn ExpenseRepository> = match &config.database_url {
        Some(url) => {
            let store = PostgresExpenseRepository::connect(url, config.database_max_connections)
                .await
                .context("Failed to connect to database")?;
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Using PostgreSQL expense store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory expense store");
            Arc::new(InMemoryExpenseRepository::new())
        }
    };

    let users = UserValidationAdapter::new(
        Arc::new(HttpUserDirectory::new(&config.user_service_url)),
        pools.external().clone(),
    )
    .with_timeout(config.user_validation_timeout);

    let sync: Arc<dyn ReconciliationSync> = match &config.sync_webhook_url {
        Some(url) => Arc::new(WebhookReconciliationSync::new(url.clone())),
        None => Arc::new(NoopReconciliationSync),
    };

    let orchestrator = ExpenseOrchestrator::new(pools.clone(), repository, users, sync);
    let scheduler = Arc::new(
        BatchReportScheduler::new(orchestrator, config.report.clone())
            .context("Invalid report schedule")?,
    );

    tracing::info!(
        user_service = %config.user_service_url,
        report_cron = %config.report.cron,
        report_timezone = %config.report.timezone,
        "expense-service started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = Arc::clone(&scheduler).start(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    shutdown_tx.send_replace(true);
    if let Err(e) = scheduler_handle.await {
        tracing::error!(error = %e, "Report scheduler task failed");
    }

    for (pool, stats) in pools.stats() {
        tracing::info!(
            pool = %pool,
            submitted = stats.submitted,
            completed = stats.completed,
            failed = stats.failed,
            rejected = stats.rejected,
            ran_on_caller = stats.ran_on_caller,
            "Worker pool totals"
        );
    }
    for (pool, report) in pools.shutdown().await {
        tracing::info!(
            pool = %pool,
            drained = report.drained,
            aborted = report.aborted,
            "Worker pool stopped"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

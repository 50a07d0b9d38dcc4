// Service configuration
//
// Everything is read once from the environment at startup. Unset variables
// fall back to defaults; set but unparsable variables are errors.

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use cron::Schedule;
use expense_executor::{PoolConfigError, WorkerPoolConfig, WorkerPoolsConfig};
use thiserror::Error;

use crate::adapter::DEFAULT_VALIDATION_TIMEOUT;

pub const DEFAULT_REPORT_CRON: &str = "0 0 2 * * *";
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_USER_SERVICE_URL: &str = "http://localhost:8081";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("invalid report schedule '{expression}': {reason}")]
    Schedule { expression: String, reason: String },

    #[error("unknown report timezone '{0}'")]
    Timezone(String),

    #[error(transparent)]
    Pools(#[from] PoolConfigError),
}

/// When and how the daily report batch runs
#[derive(Debug, Clone, PartialEq)]
pub struct ReportScheduleConfig {
    /// Six-field cron expression (seconds first)
    pub cron: String,
    pub timezone: Tz,
    /// Upper bound on one batch run, dispatch and collection included
    pub run_timeout: Duration,
}

impl ReportScheduleConfig {
    /// Checked constructor; fails on an unparsable cron expression
    pub fn new(cron: &str, timezone: Tz, run_timeout: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            cron: cron.to_string(),
            timezone,
            run_timeout,
        };
        config.schedule()?;
        Ok(config)
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        Schedule::from_str(&self.cron).map_err(|e| ConfigError::Schedule {
            expression: self.cron.clone(),
            reason: e.to_string(),
        })
    }
}

impl Default for ReportScheduleConfig {
    fn default() -> Self {
        Self {
            cron: DEFAULT_REPORT_CRON.to_string(),
            timezone: Tz::UTC,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// Full configuration of the service binary
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// PostgreSQL URL; `None` runs on the in-memory store
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub user_service_url: String,
    pub user_validation_timeout: Duration,
    /// Reconciliation webhook; `None` disables sync
    pub sync_webhook_url: Option<String>,
    pub report: ReportScheduleConfig,
    pub pools: WorkerPoolsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            user_service_url: DEFAULT_USER_SERVICE_URL.to_string(),
            user_validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
            sync_webhook_url: None,
            report: ReportScheduleConfig::default(),
            pools: WorkerPoolsConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from environment variables
    ///
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` (default 10)
    /// - `USER_SERVICE_URL`, `USER_VALIDATION_TIMEOUT_SECS` (default 10)
    /// - `SYNC_WEBHOOK_URL`
    /// - `REPORT_CRON` (default `0 0 2 * * *`), `REPORT_TIMEZONE` (default UTC),
    ///   `REPORT_RUN_TIMEOUT_SECS` (default 600)
    /// - `{GENERAL,HEAVY,EXTERNAL}_POOL_{MIN,MAX,QUEUE}`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let defaults = Self::default();

        let timezone = match vars.get("REPORT_TIMEZONE") {
            Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::Timezone(name))?,
            None => defaults.report.timezone,
        };
        let report = ReportScheduleConfig::new(
            &vars
                .get("REPORT_CRON")
                .unwrap_or_else(|| DEFAULT_REPORT_CRON.to_string()),
            timezone,
            vars.secs("REPORT_RUN_TIMEOUT_SECS")?
                .unwrap_or(defaults.report.run_timeout),
        )?;

        let pools = WorkerPoolsConfig {
            general: pool_overrides(&vars, "GENERAL", defaults.pools.general)?,
            heavy: pool_overrides(&vars, "HEAVY", defaults.pools.heavy)?,
            external: pool_overrides(&vars, "EXTERNAL", defaults.pools.external)?,
        };
        for pool in [&pools.general, &pools.heavy, &pools.external] {
            pool.validate()?;
        }

        Ok(Self {
            database_url: vars.get("DATABASE_URL"),
            database_max_connections: vars
                .parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database_max_connections),
            user_service_url: vars
                .get("USER_SERVICE_URL")
                .unwrap_or(defaults.user_service_url),
            user_validation_timeout: vars
                .secs("USER_VALIDATION_TIMEOUT_SECS")?
                .unwrap_or(defaults.user_validation_timeout),
            sync_webhook_url: vars.get("SYNC_WEBHOOK_URL"),
            report,
            pools,
        })
    }
}

fn pool_overrides(
    vars: &Vars<'_>,
    prefix: &str,
    base: WorkerPoolConfig,
) -> Result<WorkerPoolConfig, ConfigError> {
    let min = vars
        .parse(&format!("{prefix}_POOL_MIN"))?
        .unwrap_or(base.min_concurrency);
    let max = vars
        .parse(&format!("{prefix}_POOL_MAX"))?
        .unwrap_or(base.max_concurrency);
    let queue = vars
        .parse(&format!("{prefix}_POOL_QUEUE"))?
        .unwrap_or(base.queue_capacity);
    Ok(base.with_concurrency(min, max).with_queue_capacity(queue))
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    /// Non-empty value of `var`
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, var: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(var)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|e: T::Err| ConfigError::InvalidValue {
                        var: var.to_string(),
                        reason: e.to_string(),
                        value,
                    })
            })
            .transpose()
    }

    fn secs(&self, var: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(var)?.map(Duration::from_secs))
    }
}

/// Configuration management for the susu engine
///
/// This module loads configuration from environment variables and provides
/// a type-safe configuration struct. Business-policy numbers (fees, retry
/// caps, delays) are deliberately configuration rather than constants.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `FEE_RATE`: Processing fee rate applied to the contribution (default: 0.01)
/// - `FEE_SURCHARGE`: Fixed surcharge added to every charge (default: 0.30)
/// - `FEE_CAP`: Upper bound on the total fee (default: 5.00)
/// - `FEE_RETRY_SURCHARGE`: Extra surcharge once a payment is retried (default: 1.00)
/// - `PAYMENT_MAX_RETRIES`: Failed-collection retries before the group pauses (default: 3)
/// - `PAYMENT_RETRY_DELAY_HOURS`: Delay before an automatic retry fires (default: 48)
/// - `NOTIFY_WEBHOOK_URL`: Notification service endpoint (optional; logs only when unset)
/// - `NOTIFY_TIMEOUT_SECS`: Soft timeout for notification dispatch (default: 3)
/// - `WORKER_POLL_INTERVAL_SECS`: Job queue poll interval (default: 1)
/// - `WORKER_MAX_CONCURRENT_JOBS`: Concurrent job handler limit (default: 10)
/// - `WORKER_JOB_MAX_ATTEMPTS`: Job-level retries for transient failures (default: 3)
/// - `SWEEP_INTERVAL_SECS`: Recovery sweeper period (default: 300)
///
/// # Example
///
/// ```no_run
/// use susu_shared::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Retry cap: {}", config.retry.max_retries);
/// # Ok(())
/// # }
/// ```
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Fee policy
    pub fees: FeeConfig,

    /// Payment retry policy
    pub retry: RetryConfig,

    /// Notification dispatch configuration
    pub notify: NotifyConfig,

    /// Worker loop tuning
    pub worker: WorkerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// Fee policy for collection charges
///
/// The total fee for a charge is `min(rate * amount + surcharge, cap)`,
/// with `retry_surcharge` added on top once a payment has already been
/// retried. The cap bounds the member's worst-case cost per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Fee rate applied to the contribution amount
    pub rate: Decimal,

    /// Fixed surcharge added to every charge
    pub surcharge: Decimal,

    /// Upper bound on the base fee
    pub cap: Decimal,

    /// Extra surcharge applied from the first retry onward
    pub retry_surcharge: Decimal,
}

/// Payment retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed collections per payment before the group is paused
    pub max_retries: i32,

    /// Hours to wait before an automatically scheduled retry
    pub retry_delay_hours: i64,
}

/// Notification dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Notification service webhook endpoint (None = log-only dispatch)
    pub webhook_url: Option<String>,

    /// Soft timeout for a single dispatch; on expiry the engine proceeds
    /// as if the notification was delivered
    pub timeout_secs: u64,
}

/// Worker loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Job queue poll interval in seconds
    pub poll_interval_secs: u64,

    /// Maximum jobs handled concurrently
    pub max_concurrent_jobs: usize,

    /// Attempts a job gets before it is marked failed for good
    pub job_max_attempts: i32,

    /// Recovery sweeper period in seconds
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or any variable
    /// fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        Ok(Self {
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10u32)?,
            },
            fees: FeeConfig {
                rate: parse_decimal_var("FEE_RATE", "0.01")?,
                surcharge: parse_decimal_var("FEE_SURCHARGE", "0.30")?,
                cap: parse_decimal_var("FEE_CAP", "5.00")?,
                retry_surcharge: parse_decimal_var("FEE_RETRY_SURCHARGE", "1.00")?,
            },
            retry: RetryConfig {
                max_retries: parse_var("PAYMENT_MAX_RETRIES", 3i32)?,
                retry_delay_hours: parse_var("PAYMENT_RETRY_DELAY_HOURS", 48i64)?,
            },
            notify: NotifyConfig {
                webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
                timeout_secs: parse_var("NOTIFY_TIMEOUT_SECS", 3u64)?,
            },
            worker: WorkerConfig {
                poll_interval_secs: parse_var("WORKER_POLL_INTERVAL_SECS", 1u64)?,
                max_concurrent_jobs: parse_var("WORKER_MAX_CONCURRENT_JOBS", 10usize)?,
                job_max_attempts: parse_var("WORKER_JOB_MAX_ATTEMPTS", 3i32)?,
                sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", 300u64)?,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig::default(),
            fees: FeeConfig::default(),
            retry: RetryConfig::default(),
            notify: NotifyConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: String::new(),
            max_connections: 10,
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig {
            rate: Decimal::new(1, 2),             // 0.01
            surcharge: Decimal::new(30, 2),       // 0.30
            cap: Decimal::new(500, 2),            // 5.00
            retry_surcharge: Decimal::new(100, 2), // 1.00
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            retry_delay_hours: 48,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            webhook_url: None,
            timeout_secs: 3,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval_secs: 1,
            max_concurrent_jobs: 10,
            job_max_attempts: 3,
            sweep_interval_secs: 300,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        Err(_) => Ok(default),
    }
}

fn parse_decimal_var(name: &str, default: &str) -> anyhow::Result<Decimal> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_config_default() {
        let fees = FeeConfig::default();
        assert_eq!(fees.rate, dec!(0.01));
        assert_eq!(fees.surcharge, dec!(0.30));
        assert_eq!(fees.cap, dec!(5.00));
        assert_eq!(fees.retry_surcharge, dec!(1.00));
    }

    #[test]
    fn test_retry_config_default() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.retry_delay_hours, 48);
    }

    #[test]
    fn test_worker_config_default() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.poll_interval_secs, 1);
        assert_eq!(worker.max_concurrent_jobs, 10);
        assert_eq!(worker.job_max_attempts, 3);
    }

    #[test]
    fn test_notify_config_default() {
        let notify = NotifyConfig::default();
        assert!(notify.webhook_url.is_none());
        assert_eq!(notify.timeout_secs, 3);
    }
}

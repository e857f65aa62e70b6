use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;

use crate::response::RESPONSE_DESTINATION;
use crate::scheduler::DispatchConfig;

/// Upper bound for the retention and pending TTL settings (ten years).
pub const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Process configuration, read from flags with environment fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "job-coordinator",
    version,
    about = "Dispatches scrape jobs on an interval and reconciles their responses"
)]
pub struct Config {
    /// Redis address used to mirror job snapshots
    #[arg(short = 'r', long = "redis", env = "REDIS_URL")]
    pub store_url: String,

    /// NATS address used to dispatch jobs and receive responses
    #[arg(short = 'q', long = "queue", env = "NATS_URL")]
    pub queue_url: String,

    /// Seconds between dispatch ticks
    #[arg(long, env = "DISPATCH_INTERVAL_SECS", default_value_t = 30 * 60)]
    pub interval_secs: u64,

    /// Job types dispatched on every tick
    #[arg(
        long,
        env = "JOB_TYPES",
        value_delimiter = ',',
        default_value = "PP,News"
    )]
    pub job_types: Vec<String>,

    /// Subject the response consumer listens on
    #[arg(long, env = "RESPONSE_SUBJECT", default_value = RESPONSE_DESTINATION)]
    pub response_subject: String,

    /// Seconds a finished job stays in memory (0 keeps jobs forever)
    #[arg(long, env = "JOB_RETENTION_SECS", default_value_t = 24 * 60 * 60)]
    pub retention_secs: u64,

    /// Seconds a job may stay created or queued without finishing (0 keeps jobs forever)
    #[arg(long, env = "JOB_PENDING_TTL_SECS", default_value_t = 24 * 60 * 60)]
    pub pending_ttl_secs: u64,
}

impl Config {
    /// Load `.env` if present, then parse the command line.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.store_url.trim().is_empty(), "Redis address must be set");
        ensure!(!self.queue_url.trim().is_empty(), "NATS address must be set");
        ensure!(self.interval_secs > 0, "dispatch interval must be positive");
        ensure!(
            self.job_types.iter().any(|t| !t.trim().is_empty()),
            "at least one job type must be configured"
        );
        ensure!(
            self.retention_secs <= MAX_RETENTION_SECS,
            "retention must not exceed {MAX_RETENTION_SECS} seconds"
        );
        ensure!(
            self.pending_ttl_secs <= MAX_RETENTION_SECS,
            "pending TTL must not exceed {MAX_RETENTION_SECS} seconds"
        );
        Ok(())
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            interval: Duration::from_secs(self.interval_secs),
            job_types: self
                .job_types
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            retention: (self.retention_secs > 0).then(|| Duration::from_secs(self.retention_secs)),
            pending_ttl: (self.pending_ttl_secs > 0)
                .then(|| Duration::from_secs(self.pending_ttl_secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("job-coordinator").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["-r", "redis://localhost:6379", "-q", "nats://localhost:4222"]);

        assert!(config.validate().is_ok());
        let dispatch = config.dispatch();
        assert_eq!(dispatch.interval, Duration::from_secs(1800));
        assert_eq!(dispatch.job_types, vec!["PP", "News"]);
        assert_eq!(dispatch.retention, Some(Duration::from_secs(86400)));
        assert_eq!(dispatch.pending_ttl, Some(Duration::from_secs(86400)));
        assert_eq!(config.response_subject, "job-responses");
    }

    #[test]
    fn test_job_types_and_retention() {
        let config = parse(&[
            "--redis",
            "redis://r",
            "--queue",
            "nats://q",
            "--job-types",
            "News, Weather",
            "--retention-secs",
            "0",
            "--pending-ttl-secs",
            "0",
        ]);

        let dispatch = config.dispatch();
        assert_eq!(dispatch.job_types, vec!["News", "Weather"]);
        assert_eq!(dispatch.retention, None);
        assert_eq!(dispatch.pending_ttl, None);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = parse(&["-r", "redis://r", "-q", "nats://q", "--interval-secs", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_blank_address() {
        let config = parse(&["-r", " ", "-q", "nats://q"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_retention() {
        let config = parse(&[
            "-r",
            "redis://r",
            "-q",
            "nats://q",
            "--retention-secs",
            "10000000000000",
        ]);
        assert!(config.validate().is_err());

        let config = parse(&[
            "-r",
            "redis://r",
            "-q",
            "nats://q",
            "--pending-ttl-secs",
            "10000000000000",
        ]);
        assert!(config.validate().is_err());
    }
}

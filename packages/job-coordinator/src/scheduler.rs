//! Periodic generation loop.
//!
//! On every tick the loop evicts expired jobs, then generates and queues one
//! job per configured type.
//!
//! ```text
//! DispatchLoop (every interval)
//!     │
//!     ├─► evict_finished(retention)
//!     ├─► evict_abandoned(pending_ttl)
//!     └─► for each job type
//!             ├─► generate_job(type)   error → loop stops (fatal)
//!             └─► queue_job(id)        error → recorded, siblings continue
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use crate::job::Job;
use crate::service::Service;

/// A queue failure for one job during a tick.
#[derive(Debug)]
pub struct DispatchFailure {
    pub job_type: String,
    pub error: CoordinatorError,
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Jobs published during this tick.
    pub queued: Vec<Job>,
    /// Jobs that were generated but could not be queued.
    pub failures: Vec<DispatchFailure>,
    /// Finished jobs evicted before dispatching.
    pub evicted: usize,
    /// Jobs evicted because they never finished within the pending TTL.
    pub abandoned: usize,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Settings for [`DispatchLoop`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Time between ticks. The first tick fires immediately.
    pub interval: Duration,
    /// One job of each type is dispatched per tick.
    pub job_types: Vec<String>,
    /// How long finished jobs stay in the table. `None` keeps them forever.
    pub retention: Option<Duration>,
    /// How long a job may stay `Created` or `Queued`. `None` keeps it forever.
    pub pending_ttl: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            job_types: vec!["PP".to_string(), "News".to_string()],
            retention: Some(Duration::from_secs(24 * 60 * 60)),
            pending_ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// Long-running service that generates and dispatches jobs on an interval.
pub struct DispatchLoop {
    coordinator: Arc<Coordinator>,
    config: DispatchConfig,
}

impl DispatchLoop {
    pub fn new(coordinator: Arc<Coordinator>, config: DispatchConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run a single tick.
    ///
    /// Queue failures are isolated per job and collected in the report.
    /// A generation failure aborts the tick and is returned.
    pub async fn tick(&self) -> Result<TickReport, CoordinatorError> {
        let mut report = TickReport::default();

        // Out-of-range durations saturate to "keep forever".
        if let Some(Ok(retention)) = self.config.retention.map(chrono::Duration::from_std) {
            report.evicted = self.coordinator.evict_finished(retention);
        }
        if let Some(Ok(ttl)) = self.config.pending_ttl.map(chrono::Duration::from_std) {
            report.abandoned = self.coordinator.evict_abandoned(ttl);
        }

        for job_type in &self.config.job_types {
            let job = self.coordinator.generate_job(job_type)?;

            match self.coordinator.queue_job(job.id()).await {
                Ok(job) => report.queued.push(job),
                Err(e) => {
                    warn!(job_id = %job.id(), job_type = %job_type, error = %e, "failed to queue job");
                    report.failures.push(DispatchFailure {
                        job_type: job_type.clone(),
                        error: e,
                    });
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl Service for DispatchLoop {
    fn name(&self) -> &'static str {
        "dispatch-loop"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            job_types = ?self.config.job_types,
            "dispatch loop starting"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = match self.tick().await {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "job generation failed, stopping dispatch loop");
                    return Err(e.into());
                }
            };

            info!(
                queued = report.queued.len(),
                failed = report.failures.len(),
                evicted = report.evicted,
                abandoned = report.abandoned,
                table_size = self.coordinator.len(),
                "dispatch tick complete"
            );
        }

        info!("dispatch loop stopped");
        Ok(())
    }
}

//! Job scheduler
//!
//! Polls the job store on a fixed interval. Due jobs are grouped by tracker
//! name: a group runs its jobs one after another, groups run concurrently.
//! Every job runs under a timeout, its own when the row carries one and the
//! configured default otherwise. A timeout counts as a transient failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use eyre::Result;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::db::{self, JobRecord};
use crate::jobs::{JobContext, JobOutcome, JobRegistry};
use crate::metrics;
use crate::retry::BackoffPolicy;
use crate::types::JobStatus;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub batch_size: u32,
    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            job_timeout: Duration::from_secs(30),
            batch_size: 100,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Counts for one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub completed: usize,
    pub not_ready: usize,
    pub retried: usize,
    pub failed: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::NotReady => self.not_ready += 1,
            JobOutcome::Retry(_) => self.retried += 1,
            JobOutcome::Failed(_) => self.failed += 1,
        }
    }

    fn merge(&mut self, other: TickSummary) {
        self.due += other.due;
        self.completed += other.completed;
        self.not_ready += other.not_ready;
        self.retried += other.retried;
        self.failed += other.failed;
    }
}

pub struct Scheduler {
    db: SqlitePool,
    registry: Arc<JobRegistry>,
    ctx: Arc<JobContext>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        db: SqlitePool,
        registry: JobRegistry,
        ctx: Arc<JobContext>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            registry: Arc::new(registry),
            ctx,
            config,
        }
    }

    /// Poll until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut cycle_count = 0u64;

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            job_timeout_ms = self.config.job_timeout.as_millis() as u64,
            validator = %self.ctx.validator,
            "Job scheduler starting poll loop"
        );

        loop {
            cycle_count += 1;

            tokio::select! {
                result = self.tick() => {
                    match result {
                        Ok(summary) => {
                            metrics::record_successful_poll();
                            if summary.due > 0 || cycle_count % 60 == 1 {
                                info!(
                                    cycle = cycle_count,
                                    due = summary.due,
                                    completed = summary.completed,
                                    not_ready = summary.not_ready,
                                    retried = summary.retried,
                                    failed = summary.failed,
                                    "Job scheduler tick"
                                );
                            }
                        }
                        Err(e) => error!(error = %e, "Job scheduler tick failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping job scheduler");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping job scheduler");
                    return Ok(());
                }
            }
        }
    }

    /// Run every due job once.
    pub async fn tick(&self) -> Result<TickSummary> {
        let due = db::list_due_jobs(&self.db, db::now_millis(), self.config.batch_size).await?;
        let mut summary = TickSummary {
            due: due.len(),
            ..Default::default()
        };

        let mut groups: BTreeMap<String, Vec<JobRecord>> = BTreeMap::new();
        for record in due {
            groups.entry(record.tracker_name.clone()).or_default().push(record);
        }

        let mut set = JoinSet::new();
        for (tracker, records) in groups {
            let db = self.db.clone();
            let registry = self.registry.clone();
            let ctx = self.ctx.clone();
            let config = self.config.clone();
            set.spawn(async move {
                let mut group = TickSummary::default();
                for record in records {
                    let outcome = run_job(&registry, &ctx, &config, &record).await;
                    if let Err(e) = apply_outcome(&db, &config.backoff, &record, &outcome).await {
                        error!(job_id = %record.id, tracker = %tracker, error = %e, "Failed to store job outcome");
                    }
                    group.record(&outcome);
                }
                group
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(group) => summary.merge(group),
                Err(e) => error!(error = %e, "Job group task panicked"),
            }
        }

        metrics::set_jobs_pending(
            db::count_jobs_by_status(&self.db, JobStatus::New).await?,
            db::count_jobs_by_status(&self.db, JobStatus::InProgress).await?,
        );
        Ok(summary)
    }
}

async fn run_job(
    registry: &JobRegistry,
    ctx: &JobContext,
    config: &SchedulerConfig,
    record: &JobRecord,
) -> JobOutcome {
    let job = match record.job() {
        Ok(job) => job,
        Err(e) => return JobOutcome::Failed(e.to_string()),
    };
    let Some(handler) = registry.get(job.kind()) else {
        return JobOutcome::Failed(format!("no handler registered for {}", job.kind()));
    };

    let timeout = record.timeout().unwrap_or(config.job_timeout);
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, handler.run(ctx, &job)).await {
        Ok(result) => JobOutcome::from(result),
        Err(_) => JobOutcome::Retry(format!("timed out after {}ms", timeout.as_millis())),
    };
    metrics::record_job(
        job.kind().as_str(),
        outcome.as_str(),
        started.elapsed().as_secs_f64(),
    );
    outcome
}

async fn apply_outcome(
    db: &SqlitePool,
    backoff: &BackoffPolicy,
    record: &JobRecord,
    outcome: &JobOutcome,
) -> Result<()> {
    match outcome {
        JobOutcome::Completed => {
            debug!(job_id = %record.id, "Job completed");
            db::mark_job_completed(db, &record.id).await
        }
        JobOutcome::NotReady => Ok(()),
        JobOutcome::Retry(reason) => {
            let attempts = record.attempts + 1;
            let failures = u32::try_from(record.attempts).unwrap_or(u32::MAX);
            let next = backoff.next_attempt_at(failures, Utc::now());
            warn!(
                job_id = %record.id,
                attempts,
                next_attempt_at = %next,
                error = %reason,
                "Job hit a transient failure, retrying with backoff"
            );
            db::reschedule_job(db, &record.id, attempts, next.timestamp_millis(), reason).await
        }
        JobOutcome::Failed(reason) => {
            error!(job_id = %record.id, error = %reason, "Job failed permanently");
            db::mark_job_failed(db, &record.id, reason).await
        }
    }
}

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use custody::Job;
use eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::JobStatus;

// Timestamps are unix milliseconds so due-time comparisons stay numeric in SQLite.

/// A persisted job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobRecord {
    /// `<kind>:<tracker>:<round>`
    pub id: String,
    pub kind: String,
    pub tracker_name: String,
    pub round: i64,
    /// JSON encoded [`Job`]
    pub payload: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    /// Overrides the scheduler's job timeout when set
    pub timeout_ms: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobRecord {
    pub fn job(&self) -> Result<Job> {
        serde_json::from_str(&self.payload)
            .wrap_err_with(|| format!("Failed to decode payload of job {}", self.id))
    }

    pub fn next_attempt_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.next_attempt_at).single()
    }

    /// Run timeout stored with the job. Non-positive values are ignored.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .and_then(|ms| u64::try_from(ms).ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// For inserting new jobs
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: String,
    pub kind: String,
    pub tracker_name: String,
    pub round: i64,
    pub payload: String,
    pub timeout_ms: Option<i64>,
}

impl NewJob {
    pub fn from_job(job: &Job) -> Result<Self> {
        let round = i64::try_from(job.round())
            .map_err(|_| eyre!("job round {} does not fit the job store", job.round()))?;
        Ok(Self {
            id: job.id(),
            kind: job.kind().to_string(),
            tracker_name: job.tracker_name().to_string(),
            round,
            payload: serde_json::to_string(job).wrap_err("Failed to encode job payload")?,
            timeout_ms: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX));
        self
    }
}

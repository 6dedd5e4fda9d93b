//! Job Store
//!
//! Durable, node-local record of the background work handlers asked for.
//! Job ids are deterministic, so saving the same job twice is a no-op.

use std::str::FromStr;

use chrono::Utc;
use eyre::{Result, WrapErr};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, error};

pub mod models;

pub use models::*;

use crate::types::JobStatus;

const JOB_COLUMNS: &str = "id, kind, tracker_name, round, payload, status, attempts, \
                           next_attempt_at, last_error, timeout_ms, created_at, updated_at";

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Create a database connection pool
///
/// In-memory databases live as long as their connection, so they get a
/// single connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .wrap_err("Invalid DATABASE_URL")?
        .create_if_missing(true);

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    pool_options
        .connect_with(options)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Fresh migrated in-memory store.
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = create_pool("sqlite::memory:").await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Insert a job unless one with the same id exists. Returns whether a row
/// was inserted.
pub async fn save_job(pool: &SqlitePool, job: &NewJob) -> Result<bool> {
    let now = now_millis();
    let result = sqlx::query(
        r#"
        INSERT INTO jobs (id, kind, tracker_name, round, payload, status, attempts,
            next_attempt_at, last_error, timeout_ms, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'new', 0, ?, NULL, ?, ?, ?)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&job.id)
    .bind(&job.kind)
    .bind(&job.tracker_name)
    .bind(job.round)
    .bind(&job.payload)
    .bind(now)
    .bind(job.timeout_ms)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to save job {}", job.id))?;

    let inserted = result.rows_affected() == 1;
    if !inserted {
        debug!(job_id = %job.id, "Job already stored");
    }
    Ok(inserted)
}

/// Open jobs whose next attempt is due, oldest first
pub async fn list_due_jobs(pool: &SqlitePool, now: i64, limit: u32) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query_as::<_, JobRecord>(&format!(
        "SELECT {} FROM jobs \
         WHERE status IN ('new', 'in_progress') AND next_attempt_at <= ? \
         ORDER BY created_at, id LIMIT ?",
        JOB_COLUMNS
    ))
    .bind(now)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await
    .map_err(|e| {
        error!("SQL error listing due jobs: {:?}", e);
        e
    })
    .wrap_err("Failed to list due jobs")?;

    Ok(rows)
}

pub async fn get_job(pool: &SqlitePool, id: &str) -> Result<Option<JobRecord>> {
    let row = sqlx::query_as::<_, JobRecord>(&format!(
        "SELECT {} FROM jobs WHERE id = ?",
        JOB_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .wrap_err_with(|| format!("Failed to get job {}", id))?;

    Ok(row)
}

pub async fn mark_job_completed(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query(r#"UPDATE jobs SET status = ?, last_error = NULL, updated_at = ? WHERE id = ?"#)
        .bind(JobStatus::Completed)
        .bind(now_millis())
        .bind(id)
        .execute(pool)
        .await
        .wrap_err("Failed to mark job completed")?;
    Ok(())
}

pub async fn mark_job_failed(pool: &SqlitePool, id: &str, error: &str) -> Result<()> {
    sqlx::query(r#"UPDATE jobs SET status = ?, last_error = ?, updated_at = ? WHERE id = ?"#)
        .bind(JobStatus::Failed)
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(pool)
        .await
        .wrap_err("Failed to mark job failed")?;
    Ok(())
}

/// Record a transient failure and push the next attempt out.
pub async fn reschedule_job(
    pool: &SqlitePool,
    id: &str,
    attempts: i64,
    next_attempt_at: i64,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?, attempts = ?, next_attempt_at = ?, last_error = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(JobStatus::InProgress)
    .bind(attempts)
    .bind(next_attempt_at)
    .bind(error)
    .bind(now_millis())
    .bind(id)
    .execute(pool)
    .await
    .wrap_err("Failed to reschedule job")?;
    Ok(())
}

pub async fn count_jobs_by_status(pool: &SqlitePool, status: JobStatus) -> Result<i64> {
    let row = sqlx::query_as::<_, (i64,)>(r#"SELECT COUNT(*) FROM jobs WHERE status = ?"#)
        .bind(status)
        .fetch_one(pool)
        .await
        .wrap_err("Failed to count jobs")?;
    Ok(row.0)
}

/// Open jobs across both open statuses
pub async fn count_open_jobs(pool: &SqlitePool) -> Result<i64> {
    Ok(count_jobs_by_status(pool, JobStatus::New).await?
        + count_jobs_by_status(pool, JobStatus::InProgress).await?)
}

use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{JobKind, ScheduledJob},
    traits::ExchangeError,
};

/// Schedules a job, idempotently: if a job with this key already exists (executed or not), it is returned untouched.
/// This is what makes deadline re-scheduling safe — the same trade can never accumulate duplicate checks.
pub async fn idempotent_schedule(
    job_key: &str,
    trade_id: i64,
    kind: JobKind,
    due_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ScheduledJob, ExchangeError> {
    if let Some(existing) = fetch_job_by_key(job_key, conn).await? {
        trace!("⏰️ Job {job_key} already scheduled");
        return Ok(existing);
    }
    let job = sqlx::query_as(
        "INSERT INTO scheduled_jobs (job_key, trade_id, kind, due_at) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(job_key)
    .bind(trade_id)
    .bind(kind)
    .bind(due_at)
    .fetch_one(conn)
    .await?;
    trace!("⏰️ Job {job_key} scheduled for {due_at}");
    Ok(job)
}

pub async fn fetch_job_by_key(job_key: &str, conn: &mut SqliteConnection) -> Result<Option<ScheduledJob>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM scheduled_jobs WHERE job_key = $1").bind(job_key).fetch_optional(conn).await
}

/// Claims up to `limit` due jobs by stamping `executed_at` where it was still null, returning the claimed rows.
/// The stamp is the exactly-once guard: a job delivered twice finds `executed_at` already set the second time and
/// claims nothing.
pub async fn claim_due(
    now: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<ScheduledJob>, ExchangeError> {
    let jobs = sqlx::query_as(
        r#"
            UPDATE scheduled_jobs SET executed_at = $1
            WHERE id IN (
                SELECT id FROM scheduled_jobs
                WHERE executed_at IS NULL AND unixepoch(due_at) <= unixepoch($1)
                ORDER BY due_at ASC
                LIMIT $2
            )
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(jobs)
}

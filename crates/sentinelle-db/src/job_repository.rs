use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sentinelle_core::error::AppError;
use sentinelle_core::job::{Backoff, Enqueued, Job, JobPayload, JobState, NewJob, QueueName};
use sentinelle_core::job_queue::JobQueue;

/// States that hold a dedup key.
const LIVE_STATES: &str = "('waiting', 'active', 'stalled')";

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
///
/// All six queues share the `jobs` table; a partial unique index on
/// `(queue, dedup_key)` over the live states makes enqueue idempotent.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: Pool<Postgres>,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_live(&self, queue: QueueName, dedup_key: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT * FROM jobs WHERE queue = $1 AND dedup_key = $2 AND state IN {LIVE_STATES}"
        ))
        .bind(queue.as_str())
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    queue: String,
    payload: Json<JobPayload>,
    state: String,
    attempts: i32,
    max_attempts: i32,
    backoff_kind: String,
    backoff_ms: i64,
    run_at: DateTime<Utc>,
    dedup_key: Option<String>,
    worker_id: Option<String>,
    heartbeat_at: Option<DateTime<Utc>>,
    stalled_count: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            queue: row.queue.parse().map_err(AppError::DatabaseError)?,
            payload: row.payload.0,
            state: row.state.parse().map_err(AppError::DatabaseError)?,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            backoff: Backoff::from_parts(&row.backoff_kind, row.backoff_ms)
                .map_err(AppError::DatabaseError)?,
            run_at: row.run_at,
            dedup_key: row.dedup_key,
            worker_id: row.worker_id,
            heartbeat_at: row.heartbeat_at,
            stalled_count: row.stalled_count.max(0) as u32,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: NewJob) -> Result<Enqueued, AppError> {
        // A live duplicate can finish between the insert and the lookup, so
        // retry a couple of times before giving up.
        for _ in 0..3 {
            let inserted = sqlx::query_as::<_, JobRow>(&format!(
                r#"
                INSERT INTO jobs (queue, payload, max_attempts, backoff_kind, backoff_ms, run_at, dedup_key)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (queue, dedup_key)
                    WHERE dedup_key IS NOT NULL AND state IN {LIVE_STATES}
                DO NOTHING
                RETURNING *
                "#
            ))
            .bind(job.queue.as_str())
            .bind(Json(&job.payload))
            .bind(job.max_attempts as i32)
            .bind(job.backoff.kind())
            .bind(job.backoff.base_ms())
            .bind(job.run_at)
            .bind(job.dedup_key.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            if let Some(row) = inserted {
                return Ok(Enqueued {
                    job: row.try_into()?,
                    deduplicated: false,
                });
            }

            if let Some(key) = &job.dedup_key
                && let Some(existing) = self.find_live(job.queue, key).await?
            {
                return Ok(Enqueued {
                    job: existing,
                    deduplicated: true,
                });
            }
        }

        Err(AppError::DatabaseError(format!(
            "could not enqueue {} job: dedup key kept changing state",
            job.queue
        )))
    }

    async fn claim_job(&self, queue: QueueName, worker_id: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'active', attempts = attempts + 1, worker_id = $2,
                heartbeat_at = NOW(), started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $1
                  AND state IN ('waiting', 'stalled')
                  AND run_at <= NOW()
                ORDER BY run_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(queue.as_str())
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE jobs SET heartbeat_at = NOW()
            WHERE id = $1 AND worker_id = $2 AND state = 'active'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn complete_job(&self, job_id: Uuid, worker_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', finished_at = NOW(), updated_at = NOW(),
                error_message = NULL, worker_id = NULL
            WHERE id = $1 AND state = 'active' AND worker_id = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        // With a retry time the job goes back to waiting, otherwise it is
        // permanently failed.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET
                state = CASE WHEN $3::timestamptz IS NOT NULL THEN 'waiting' ELSE 'failed' END,
                run_at = COALESCE($3, run_at),
                finished_at = CASE WHEN $3::timestamptz IS NOT NULL THEN NULL ELSE NOW() END,
                error_message = $2,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state = 'active' AND worker_id = $4
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(retry_at)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn defer_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        run_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting', run_at = $3, attempts = GREATEST(attempts - 1, 0),
                worker_id = NULL, heartbeat_at = NULL, updated_at = NOW()
            WHERE id = $1 AND state = 'active' AND worker_id = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'cancelled', finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND state = 'waiting'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn retry_failed(&self, job_id: Uuid) -> Result<bool, AppError> {
        // Skipped when a live job already holds the same dedup key.
        let result = sqlx::query(&format!(
            r#"
            UPDATE jobs AS j
            SET state = 'waiting', attempts = 0, run_at = NOW(), finished_at = NULL,
                updated_at = NOW()
            WHERE j.id = $1 AND j.state = 'failed'
              AND NOT EXISTS (
                  SELECT 1 FROM jobs AS live
                  WHERE live.queue = j.queue
                    AND live.dedup_key = j.dedup_key
                    AND live.state IN {LIVE_STATES}
              )
            "#
        ))
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn recover_stalled(
        &self,
        queue: QueueName,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET
                state = CASE WHEN attempts < max_attempts THEN 'waiting' ELSE 'failed' END,
                error_message = CASE WHEN attempts < max_attempts THEN error_message ELSE 'job stalled' END,
                finished_at = CASE WHEN attempts < max_attempts THEN NULL ELSE NOW() END,
                stalled_count = stalled_count + 1,
                run_at = NOW(),
                worker_id = NULL,
                updated_at = NOW()
            WHERE queue = $1
              AND state = 'active'
              AND (heartbeat_at IS NULL OR heartbeat_at < $2)
            RETURNING id
            "#,
        )
        .bind(queue.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if !ids.is_empty() {
            tracing::warn!(%queue, count = ids.len(), "Recovered stalled jobs");
        }
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting', worker_id = NULL, started_at = NULL,
                attempts = GREATEST(attempts - 1, 0), updated_at = NOW()
            WHERE worker_id = $1 AND state = 'active'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(r#"SELECT * FROM jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(
        &self,
        queue: Option<QueueName>,
        state: Option<JobState>,
        limit: usize,
    ) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE ($1::varchar IS NULL OR queue = $1)
              AND ($2::varchar IS NULL OR state = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(queue.map(|q| q.as_str()))
        .bind(state.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn count_by_state(&self, queue: QueueName, state: JobState) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM jobs WHERE queue = $1 AND state = $2"#)
                .bind(queue.as_str())
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE state IN ('completed', 'failed', 'cancelled') AND finished_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

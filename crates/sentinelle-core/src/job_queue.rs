use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Enqueued, Job, JobState, NewJob, QueueName};

/// Durable, multi-queue job store behind the fabric.
///
/// Implementations must claim atomically (`SELECT FOR UPDATE SKIP LOCKED`
/// or equivalent) so that one job is never active on two workers, and must
/// keep at most one non-terminal job per `(queue, dedup_key)`.
pub trait JobQueue: Send + Sync + Clone {
    /// Insert a job, or return the existing non-terminal job with the same
    /// dedup key.
    fn enqueue(&self, job: NewJob) -> impl Future<Output = Result<Enqueued, AppError>> + Send;

    /// Atomically claim the next runnable job of `queue`, incrementing its
    /// attempt counter.
    ///
    /// Returns `None` if no jobs are available.
    fn claim_job(
        &self,
        queue: QueueName,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Refresh the heartbeat of an active job held by `worker_id`.
    fn heartbeat(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Mark an active job held by `worker_id` as completed.
    ///
    /// Returns false when the job is no longer active on that worker (it
    /// was recovered as stalled and possibly re-claimed), in which case
    /// nothing changes.
    fn complete_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Record a failed attempt of an active job held by `worker_id`. If
    /// `retry_at` is provided the job goes back to `waiting`; otherwise it
    /// is marked permanently `failed`.
    ///
    /// Returns false, changing nothing, when `worker_id` no longer holds the
    /// job.
    fn fail_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Put an active job held by `worker_id` back to `waiting` until
    /// `run_at`, returning the attempt it was claimed with.
    ///
    /// Returns false when `worker_id` no longer holds the job.
    fn defer_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        run_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Cancel a waiting job. Returns false if the job was not waiting.
    fn cancel_job(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Move a failed job back to `waiting` with a fresh attempt budget.
    fn retry_failed(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Return active jobs of `queue` whose heartbeat is older than `cutoff`
    /// to `waiting` (or `failed` when their attempts are exhausted).
    fn recover_stalled(
        &self,
        queue: QueueName,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Uuid>, AppError>> + Send;

    /// Release all jobs held by a specific worker (for graceful shutdown).
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn get_job(&self, job_id: Uuid) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    fn list_jobs(
        &self,
        queue: Option<QueueName>,
        state: Option<JobState>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    fn count_by_state(
        &self,
        queue: QueueName,
        state: JobState,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Delete terminal jobs that finished before `cutoff`.
    fn purge_finished(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

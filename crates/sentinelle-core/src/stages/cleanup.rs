use chrono::{DateTime, TimeDelta, Utc};

use crate::error::AppError;
use crate::job::{Job, JobPayload, QueueName};
use crate::job_queue::JobQueue;
use crate::models::CleanupTarget;
use crate::traits::{AlertStore, MentionStore, ReportStore};
use crate::worker::JobHandler;

/// Deletes records past their retention period.
///
/// Records exactly at the cutoff are kept. Alerts are only deleted once
/// resolved; the `logs` target purges finished job records.
#[derive(Clone)]
pub struct CleanupStage<Q, M, A, R>
where
    Q: JobQueue,
    M: MentionStore,
    A: AlertStore,
    R: ReportStore,
{
    queue: Q,
    mentions: M,
    alerts: A,
    reports: R,
}

impl<Q, M, A, R> CleanupStage<Q, M, A, R>
where
    Q: JobQueue + 'static,
    M: MentionStore + 'static,
    A: AlertStore + 'static,
    R: ReportStore + 'static,
{
    pub fn new(queue: Q, mentions: M, alerts: A, reports: R) -> Self {
        Self {
            queue,
            mentions,
            alerts,
            reports,
        }
    }

    /// Delete `target` records older than `now - retention_days`. Returns
    /// the number of deleted records.
    pub async fn run(
        &self,
        target: CleanupTarget,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        if retention_days == 0 {
            return Err(AppError::InvalidPayload(format!(
                "retention for {target} must be at least one day"
            )));
        }
        let cutoff = TimeDelta::try_days(i64::from(retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
            .ok_or_else(|| {
                AppError::InvalidPayload(format!(
                    "retention of {retention_days} days for {target} is out of range"
                ))
            })?;

        let deleted = match target {
            CleanupTarget::Mentions => self.mentions.delete_older_than(cutoff).await?,
            CleanupTarget::Alerts => self.alerts.delete_resolved_older_than(cutoff).await?,
            CleanupTarget::Reports => self.reports.delete_older_than(cutoff).await?,
            CleanupTarget::Logs => self.queue.purge_finished(cutoff).await?,
        };

        tracing::info!(%target, retention_days, %cutoff, deleted, "Cleanup finished");
        Ok(deleted)
    }
}

impl<Q, M, A, R> JobHandler for CleanupStage<Q, M, A, R>
where
    Q: JobQueue + 'static,
    M: MentionStore + 'static,
    A: AlertStore + 'static,
    R: ReportStore + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        match &job.payload {
            JobPayload::Cleanup {
                target,
                retention_days,
            } => self
                .run(*target, *retention_days, Utc::now())
                .await
                .map(|_| ()),
            _ => Err(super::unexpected_payload(QueueName::Cleanup, job)),
        }
    }
}

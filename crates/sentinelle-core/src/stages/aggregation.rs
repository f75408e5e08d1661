use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobPayload, QueueName};
use crate::models::{AggregateStat, Period};
use crate::stats::compute_stats;
use crate::traits::{MentionStore, StatsStore};
use crate::worker::JobHandler;

/// Computes per-organization statistics over a daily, weekly or monthly window.
#[derive(Clone)]
pub struct AggregationStage<M: MentionStore, T: StatsStore> {
    mentions: M,
    stats: T,
}

impl<M: MentionStore + 'static, T: StatsStore + 'static> AggregationStage<M, T> {
    pub fn new(mentions: M, stats: T) -> Self {
        Self { mentions, stats }
    }

    /// Recompute and overwrite the aggregate for `(organization, date, period)`.
    pub async fn aggregate(
        &self,
        organization_id: Uuid,
        date: NaiveDate,
        period: Period,
    ) -> Result<AggregateStat, AppError> {
        let window = period.window(date)?;
        let mentions = self
            .mentions
            .query_by_org_and_window(organization_id, None, &window)
            .await?;

        let stat = AggregateStat {
            organization_id,
            date,
            period,
            window,
            stats: compute_stats(&mentions),
            computed_at: Utc::now(),
        };
        self.stats.upsert_aggregate(&stat).await?;

        tracing::info!(
            %organization_id,
            %date,
            %period,
            total = stat.stats.total_mentions,
            "Aggregate computed"
        );
        Ok(stat)
    }
}

impl<M: MentionStore + 'static, T: StatsStore + 'static> JobHandler for AggregationStage<M, T> {
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        match &job.payload {
            JobPayload::Aggregate {
                organization_id,
                date,
                period,
            } => self
                .aggregate(*organization_id, *date, *period)
                .await
                .map(|_| ()),
            _ => Err(super::unexpected_payload(QueueName::Aggregation, job)),
        }
    }
}

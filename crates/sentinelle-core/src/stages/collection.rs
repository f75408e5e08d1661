use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use uuid::Uuid;

use crate::error::AppError;
use crate::fabric::Fabric;
use crate::guard::DispatchGuard;
use crate::job::{EnqueueOptions, Job, JobPayload, QueueName};
use crate::job_queue::JobQueue;
use crate::models::{CollectedItem, CollectionOutcome, NewMention, Source, SourceType};
use crate::traits::{Collector, MentionStore, SourceRegistry};
use crate::worker::JobHandler;

/// Per-source-type caps on concurrent collections, inside the queue-wide limit.
///
/// A job whose type is saturated is handed back to the queue instead of
/// waiting, so it never holds a queue slot other source types could use.
#[derive(Debug, Clone)]
pub struct SourceTypeLimits {
    permits: HashMap<SourceType, Arc<Semaphore>>,
    retry_after: Duration,
}

impl Default for SourceTypeLimits {
    fn default() -> Self {
        Self::new(3)
            .with_limit(SourceType::Reddit, 2)
            .with_limit(SourceType::News, 4)
            .with_limit(SourceType::Rss, 4)
    }
}

impl SourceTypeLimits {
    pub fn new(default_limit: usize) -> Self {
        let permits = SourceType::ALL
            .into_iter()
            .map(|t| (t, Arc::new(Semaphore::new(default_limit.max(1)))))
            .collect();
        Self {
            permits,
            retry_after: Duration::from_secs(5),
        }
    }

    pub fn with_limit(mut self, source_type: SourceType, limit: usize) -> Self {
        self.permits
            .insert(source_type, Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    /// Delay before a throttled collection is offered again.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    fn try_acquire(&self, source_type: SourceType) -> Result<Option<OwnedSemaphorePermit>, AppError> {
        let Some(sem) = self.permits.get(&source_type) else {
            return Ok(None);
        };
        match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(TryAcquireError::NoPermits) => Err(AppError::Throttled {
                scope: format!("{source_type} collections"),
                retry_after_secs: self.retry_after.as_secs().max(1),
            }),
            Err(TryAcquireError::Closed) => {
                Err(AppError::Generic("collection limiter closed".into()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionSettings {
    /// Upper bound on one collector call.
    pub timeout: Duration,
    /// Consecutive failures after which a source is deactivated.
    pub max_consecutive_errors: u32,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_consecutive_errors: 5,
        }
    }
}

/// What one collection run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub skipped: bool,
    pub fetched: usize,
    pub created: usize,
    pub analysis_enqueued: usize,
}

/// Fetches new items for a source, stores them as unanalyzed mentions and
/// queues their analysis.
#[derive(Clone)]
pub struct CollectionStage<Q, S, M, C>
where
    Q: JobQueue,
    S: SourceRegistry,
    M: MentionStore,
    C: Collector,
{
    fabric: Fabric<Q>,
    sources: S,
    mentions: M,
    collector: C,
    guard: Arc<DispatchGuard>,
    limits: SourceTypeLimits,
    settings: CollectionSettings,
}

impl<Q, S, M, C> CollectionStage<Q, S, M, C>
where
    Q: JobQueue + 'static,
    S: SourceRegistry + 'static,
    M: MentionStore + 'static,
    C: Collector + 'static,
{
    pub fn new(
        fabric: Fabric<Q>,
        sources: S,
        mentions: M,
        collector: C,
        guard: DispatchGuard,
        settings: CollectionSettings,
    ) -> Self {
        Self {
            fabric,
            sources,
            mentions,
            collector,
            guard: Arc::new(guard),
            limits: SourceTypeLimits::default(),
            settings,
        }
    }

    pub fn with_limits(mut self, limits: SourceTypeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Collect one source.
    ///
    /// Guard rejections are recorded on the source, deactivate it, and fail
    /// with [`AppError::PolicyViolation`]. Every attempt that reaches the
    /// collector updates the source's bookkeeping, whatever its outcome.
    pub async fn collect(&self, source_id: Uuid) -> Result<CollectionReport, AppError> {
        let source = self
            .sources
            .get_source(source_id)
            .await?
            .ok_or_else(|| AppError::not_found("source", source_id))?;

        if !source.active {
            tracing::info!(%source_id, "Source inactive, skipping collection");
            return Ok(CollectionReport {
                skipped: true,
                ..Default::default()
            });
        }

        let decision = self
            .guard
            .validate(source.source_type, source.url.as_deref());
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "rejected by dispatch guard".to_string());
            tracing::warn!(%source_id, source_type = %source.source_type, %reason, "Collection refused");
            self.sources.record_rejection(source_id, &reason).await?;
            return Err(AppError::PolicyViolation(reason));
        }

        let _permit = self.limits.try_acquire(source.source_type)?;

        let fetched = match tokio::time::timeout(
            self.settings.timeout,
            self.collector.collect(&source),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.settings.timeout.as_secs())),
        };

        let result = match fetched {
            Ok(items) => self.store_items(&source, items).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => CollectionOutcome::Success,
            Err(e) => CollectionOutcome::Failure {
                error: e.to_string(),
            },
        };
        self.record_outcome(&source, &outcome).await?;

        let report = result?;
        tracing::info!(
            %source_id,
            fetched = report.fetched,
            created = report.created,
            "Source collected"
        );
        Ok(report)
    }

    async fn store_items(
        &self,
        source: &Source,
        items: Vec<CollectedItem>,
    ) -> Result<CollectionReport, AppError> {
        let collected_at = Utc::now();
        let mut report = CollectionReport {
            fetched: items.len(),
            ..Default::default()
        };

        for item in items.iter().filter(|i| !i.content.trim().is_empty()) {
            let mention = NewMention::from_item(source, item, collected_at);
            let upsert = self.mentions.upsert_if_absent(&mention).await?;
            if !upsert.created {
                continue;
            }
            report.created += 1;

            let enqueued = self
                .fabric
                .enqueue(
                    JobPayload::Analyze {
                        mention_id: upsert.id,
                        organization_id: source.organization_id,
                        text: mention.content,
                    },
                    EnqueueOptions::default(),
                )
                .await?;
            if !enqueued.deduplicated {
                report.analysis_enqueued += 1;
            }
        }

        Ok(report)
    }

    async fn record_outcome(
        &self,
        source: &Source,
        outcome: &CollectionOutcome,
    ) -> Result<(), AppError> {
        let status = self
            .sources
            .mark_collected(
                source.id,
                source.last_collected_at,
                outcome,
                Utc::now(),
                self.settings.max_consecutive_errors,
            )
            .await?;

        match status {
            None => {
                tracing::debug!(source_id = %source.id, "Source updated concurrently, bookkeeping skipped");
            }
            Some(status) if !status.active => {
                tracing::warn!(
                    source_id = %source.id,
                    error_count = status.error_count,
                    "Source deactivated after consecutive collection errors"
                );
            }
            Some(_) => {}
        }
        Ok(())
    }
}

impl<Q, S, M, C> JobHandler for CollectionStage<Q, S, M, C>
where
    Q: JobQueue + 'static,
    S: SourceRegistry + 'static,
    M: MentionStore + 'static,
    C: Collector + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        match &job.payload {
            JobPayload::Collect { source_id } => self.collect(*source_id).await.map(|_| ()),
            _ => Err(super::unexpected_payload(QueueName::Collection, job)),
        }
    }
}

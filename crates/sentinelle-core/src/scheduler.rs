use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Utc, Weekday};
use rand::Rng;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::RetentionConfig;
use crate::error::AppError;
use crate::fabric::Fabric;
use crate::job::{EnqueueOptions, JobPayload, QueueName};
use crate::job_queue::JobQueue;
use crate::models::{CleanupTarget, Period};
use crate::selector::DuePolicy;
use crate::traits::{ReportStore, SourceRegistry};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between collection passes.
    pub interval: Duration,
    /// Time between maintenance passes (aggregation, cleanup, pending reports).
    pub maintenance_interval: Duration,
    pub due_policy: DuePolicy,
    pub due_batch_limit: usize,
    /// Each collection job is delayed by a random amount up to this, so a
    /// pass does not hit every collector at the same instant.
    pub max_jitter: Duration,
    /// Sources with at least this many consecutive errors are not scheduled.
    pub max_error_count: u32,
    pub report_batch_limit: usize,
    pub retention: RetentionConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            maintenance_interval: Duration::from_secs(24 * 60 * 60),
            due_policy: DuePolicy::default(),
            due_batch_limit: 500,
            max_jitter: Duration::from_secs(30),
            max_error_count: 5,
            report_batch_limit: 100,
            retention: RetentionConfig::default(),
        }
    }
}

/// Outcome of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub scheduled: usize,
    /// Already queued, or no longer due when re-checked.
    pub skipped: usize,
    /// Held back because the source reached the error threshold.
    pub gated: usize,
    pub errors: usize,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub aggregations: usize,
    pub cleanups: usize,
    pub reports: usize,
    pub errors: usize,
}

/// Periodically turns due sources into collection jobs and schedules the
/// maintenance stages.
#[derive(Clone)]
pub struct Scheduler<Q, S, R>
where
    Q: JobQueue,
    S: SourceRegistry,
    R: ReportStore,
{
    fabric: Fabric<Q>,
    sources: S,
    reports: R,
    config: SchedulerConfig,
}

impl<Q, S, R> Scheduler<Q, S, R>
where
    Q: JobQueue + 'static,
    S: SourceRegistry,
    R: ReportStore,
{
    pub fn new(fabric: Fabric<Q>, sources: S, reports: R, config: SchedulerConfig) -> Self {
        Self {
            fabric,
            sources,
            reports,
            config,
        }
    }

    /// Enqueue one collection job per due source, each with a random delay
    /// of at most `max_jitter`.
    ///
    /// Sources at the error threshold are reported to operators and left
    /// alone. Enqueue failures are counted and logged; they never abort the
    /// pass.
    pub async fn run_collection_pass(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SchedulerReport, AppError> {
        let due = self
            .sources
            .list_due_sources(now, &self.config.due_policy, self.config.due_batch_limit)
            .await?;

        let mut report = SchedulerReport::default();
        for source in &due {
            if !self.config.due_policy.is_due(source, now) {
                report.skipped += 1;
                continue;
            }
            if source.error_count >= self.config.max_error_count {
                tracing::warn!(
                    source_id = %source.id,
                    brand_id = %source.brand_id,
                    error_count = source.error_count,
                    threshold = self.config.max_error_count,
                    "Source reached the error threshold, collection not scheduled"
                );
                report.gated += 1;
                continue;
            }

            match self
                .fabric
                .enqueue(
                    JobPayload::Collect {
                        source_id: source.id,
                    },
                    EnqueueOptions::default().with_delay(self.jitter()),
                )
                .await
            {
                Ok(enqueued) if enqueued.deduplicated => report.skipped += 1,
                Ok(_) => report.scheduled += 1,
                Err(e) => {
                    tracing::warn!(source_id = %source.id, error = %e, "Failed to schedule collection");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            due = due.len(),
            scheduled = report.scheduled,
            skipped = report.skipped,
            gated = report.gated,
            errors = report.errors,
            "Collection pass finished"
        );
        Ok(report)
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Queue aggregation of the previous day (plus the previous week on
    /// Mondays and the previous month on the 1st), one cleanup per target,
    /// and every pending report.
    pub async fn run_maintenance_pass(
        &self,
        now: DateTime<Utc>,
    ) -> Result<MaintenanceReport, AppError> {
        let mut report = MaintenanceReport::default();
        let today = now.date_naive();
        let yesterday = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| AppError::Generic(format!("no day before {today}")))?;

        let mut periods = vec![Period::Daily];
        if today.weekday() == Weekday::Mon {
            periods.push(Period::Weekly);
        }
        if today.day() == 1 {
            periods.push(Period::Monthly);
        }

        let mut payloads = Vec::new();
        for organization_id in self.sources.active_organizations().await? {
            for period in &periods {
                payloads.push(JobPayload::Aggregate {
                    organization_id,
                    date: yesterday,
                    period: *period,
                });
            }
        }
        for target in CleanupTarget::ALL {
            payloads.push(JobPayload::Cleanup {
                target,
                retention_days: self.config.retention.days_for(target),
            });
        }
        for report_id in self
            .reports
            .pending_reports(self.config.report_batch_limit)
            .await?
        {
            payloads.push(JobPayload::GenerateReport { report_id });
        }

        for payload in payloads {
            let kind = payload.queue();
            match self.fabric.enqueue(payload, EnqueueOptions::default()).await {
                Ok(enqueued) if enqueued.deduplicated => {}
                Ok(_) => match kind {
                    QueueName::Aggregation => report.aggregations += 1,
                    QueueName::Cleanup => report.cleanups += 1,
                    _ => report.reports += 1,
                },
                Err(e) => {
                    tracing::warn!(queue = %kind, error = %e, "Failed to schedule maintenance job");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            aggregations = report.aggregations,
            cleanups = report.cleanups,
            reports = report.reports,
            errors = report.errors,
            "Maintenance pass finished"
        );
        Ok(report)
    }

    /// Run both loops until cancellation. The first passes fire immediately.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<(), AppError> {
        let mut collection = tokio::time::interval(self.config.interval);
        collection.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut maintenance = tokio::time::interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = collection.tick() => {
                    if let Err(e) = self.run_collection_pass(Utc::now()).await {
                        tracing::error!(error = %e, "Collection pass failed");
                    }
                }
                _ = maintenance.tick() => {
                    if let Err(e) = self.run_maintenance_pass(Utc::now()).await {
                        tracing::error!(error = %e, "Maintenance pass failed");
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

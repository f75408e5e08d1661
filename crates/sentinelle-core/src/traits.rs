use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AggregateStat, Alert, AlertSeverity, AnalysisResult, CollectedItem, CollectionOutcome,
    Mention, NewAlert, NewMention, Recipient, Report, ReportResult, Source, SourceStatus,
    TimeWindow, UpsertOutcome,
};
use crate::selector::DuePolicy;

/// Access to configured sources and their collection bookkeeping.
pub trait SourceRegistry: Send + Sync + Clone {
    /// Active sources whose effective interval has elapsed at `now`.
    fn list_due_sources(
        &self,
        now: DateTime<Utc>,
        policy: &DuePolicy,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;

    fn get_source(
        &self,
        source_id: Uuid,
    ) -> impl Future<Output = Result<Option<Source>, AppError>> + Send;

    /// Record the outcome of a collection attempt.
    ///
    /// The update only applies if `last_collected_at` still equals
    /// `expected_last`; a concurrent writer makes this return `None`.
    /// Failures increment the error count and deactivate the source once it
    /// reaches `deactivate_after`; success resets the count.
    fn mark_collected(
        &self,
        source_id: Uuid,
        expected_last: Option<DateTime<Utc>>,
        outcome: &CollectionOutcome,
        at: DateTime<Utc>,
        deactivate_after: u32,
    ) -> impl Future<Output = Result<Option<SourceStatus>, AppError>> + Send;

    /// Store a dispatch-guard rejection and deactivate the source.
    fn record_rejection(
        &self,
        source_id: Uuid,
        reason: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Organizations owning at least one active source.
    fn active_organizations(&self) -> impl Future<Output = Result<Vec<Uuid>, AppError>> + Send;
}

/// Persists collected mentions and their analysis.
pub trait MentionStore: Send + Sync + Clone {
    /// Insert unless `(source_id, external_id)` already exists.
    fn upsert_if_absent(
        &self,
        mention: &NewMention,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;

    fn get_mention(
        &self,
        mention_id: Uuid,
    ) -> impl Future<Output = Result<Option<Mention>, AppError>> + Send;

    /// Write analysis fields. Returns false if the mention was already analyzed.
    fn update_analysis(
        &self,
        mention_id: Uuid,
        result: &AnalysisResult,
        analyzed_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Mentions of an organization published inside `window`, optionally
    /// restricted to one brand.
    fn query_by_org_and_window(
        &self,
        organization_id: Uuid,
        brand_id: Option<Uuid>,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Vec<Mention>, AppError>> + Send;

    /// Delete mentions published strictly before `cutoff`, except those
    /// that still have an unresolved alert.
    fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

pub trait AlertStore: Send + Sync + Clone {
    /// Create the alert for `(mention_id, kind)` or return the existing one.
    fn create_if_absent(
        &self,
        alert: &NewAlert,
    ) -> impl Future<Output = Result<Alert, AppError>> + Send;

    fn mark_notified(
        &self,
        alert_id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Who should hear about an alert of `severity` in this organization.
    fn recipients(
        &self,
        organization_id: Uuid,
        severity: AlertSeverity,
    ) -> impl Future<Output = Result<Vec<Recipient>, AppError>> + Send;

    fn count_in_window(
        &self,
        organization_id: Uuid,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Delete resolved alerts created strictly before `cutoff`.
    fn delete_resolved_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

pub trait StatsStore: Send + Sync + Clone {
    /// Insert or replace the snapshot for `(organization, date, period)`.
    fn upsert_aggregate(
        &self,
        stat: &AggregateStat,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

pub trait ReportStore: Send + Sync + Clone {
    fn load_report(
        &self,
        report_id: Uuid,
    ) -> impl Future<Output = Result<Option<Report>, AppError>> + Send;

    fn mark_processing(&self, report_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    fn save_report_result(
        &self,
        report_id: Uuid,
        result: &ReportResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Ids of reports still waiting for generation.
    fn pending_reports(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Uuid>, AppError>> + Send;

    /// Delete reports created strictly before `cutoff`.
    fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Fetches raw items for a source from the scraping backend.
pub trait Collector: Send + Sync + Clone {
    fn collect(
        &self,
        source: &Source,
    ) -> impl Future<Output = Result<Vec<CollectedItem>, AppError>> + Send;
}

/// Scores a piece of text for sentiment, emotions and virality.
pub trait AnalysisProvider: Send + Sync + Clone {
    fn analyze(&self, text: &str) -> impl Future<Output = Result<AnalysisResult, AppError>> + Send;
}

/// Delivers alert notifications.
pub trait NotificationSink: Send + Sync + Clone {
    fn notify(
        &self,
        recipient: &Recipient,
        message: &str,
        data: &serde_json::Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

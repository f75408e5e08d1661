use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobPayload, QueueName};
use crate::models::{Report, ReportResult, ReportStatus};
use crate::stats::compute_stats;
use crate::traits::{AlertStore, MentionStore, ReportStore};
use crate::worker::JobHandler;

/// Generates the statistics of a user-requested report.
#[derive(Clone)]
pub struct ReportingStage<R: ReportStore, M: MentionStore, A: AlertStore> {
    reports: R,
    mentions: M,
    alerts: A,
}

impl<R, M, A> ReportingStage<R, M, A>
where
    R: ReportStore + 'static,
    M: MentionStore + 'static,
    A: AlertStore + 'static,
{
    pub fn new(reports: R, mentions: M, alerts: A) -> Self {
        Self {
            reports,
            mentions,
            alerts,
        }
    }

    /// Generate a report. `final_attempt` tells whether a failure here is the
    /// last one the queue will allow; the report is then marked failed.
    pub async fn generate(&self, report_id: Uuid, final_attempt: bool) -> Result<ReportStatus, AppError> {
        let report = self
            .reports
            .load_report(report_id)
            .await?
            .ok_or_else(|| AppError::not_found("report", report_id))?;

        if report.status == ReportStatus::Completed {
            tracing::debug!(%report_id, "Report already completed");
            return Ok(ReportStatus::Completed);
        }

        if report.window.end <= report.window.start {
            let err = AppError::InvalidPayload(format!(
                "report window is empty: {} to {}",
                report.window.start, report.window.end
            ));
            self.mark_failed(report_id, &err).await?;
            return Err(err);
        }

        self.reports.mark_processing(report_id).await?;

        match self.build(&report).await {
            Ok(result) => {
                self.reports.save_report_result(report_id, &result).await?;
                tracing::info!(%report_id, output = ?result.output_ref, "Report generated");
                Ok(ReportStatus::Completed)
            }
            Err(e) => {
                if final_attempt || !e.is_retryable() {
                    self.mark_failed(report_id, &e).await?;
                }
                Err(e)
            }
        }
    }

    async fn build(&self, report: &Report) -> Result<ReportResult, AppError> {
        let mentions = self
            .mentions
            .query_by_org_and_window(report.organization_id, report.brand_id, &report.window)
            .await?;
        let alert_count = self
            .alerts
            .count_in_window(report.organization_id, &report.window)
            .await?;

        let mut stats = compute_stats(&mentions);
        stats.alert_count = Some(alert_count);

        Ok(ReportResult {
            status: ReportStatus::Completed,
            stats: Some(stats),
            output_ref: Some(format!(
                "reports/{}/{}.json",
                report.organization_id, report.id
            )),
            error_message: None,
            generated_at: Utc::now(),
        })
    }

    async fn mark_failed(&self, report_id: Uuid, error: &AppError) -> Result<(), AppError> {
        tracing::error!(%report_id, %error, "Report generation failed");
        let result = ReportResult {
            status: ReportStatus::Failed,
            stats: None,
            output_ref: None,
            error_message: Some(error.to_string()),
            generated_at: Utc::now(),
        };
        self.reports.save_report_result(report_id, &result).await
    }
}

impl<R, M, A> JobHandler for ReportingStage<R, M, A>
where
    R: ReportStore + 'static,
    M: MentionStore + 'static,
    A: AlertStore + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        match &job.payload {
            JobPayload::GenerateReport { report_id } => self
                .generate(*report_id, job.is_final_attempt())
                .await
                .map(|_| ()),
            _ => Err(super::unexpected_payload(QueueName::Reporting, job)),
        }
    }
}

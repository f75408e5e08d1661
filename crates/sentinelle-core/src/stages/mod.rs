//! Pipeline stage handlers, one per queue.

pub mod aggregation;
pub mod alerting;
pub mod analysis;
pub mod cleanup;
pub mod collection;
pub mod reporting;

use crate::error::AppError;
use crate::job::{Job, QueueName};

pub use aggregation::AggregationStage;
pub use alerting::AlertingStage;
pub use analysis::{AlertDecision, AlertThresholds, AnalysisStage, evaluate_alert};
pub use cleanup::CleanupStage;
pub use collection::{CollectionReport, CollectionSettings, CollectionStage, SourceTypeLimits};
pub use reporting::ReportingStage;

/// Error for a job whose payload belongs to another queue.
fn unexpected_payload(stage: QueueName, job: &Job) -> AppError {
    AppError::InvalidPayload(format!(
        "{} stage received a {} job ({})",
        stage,
        job.payload.queue(),
        job.id
    ))
}

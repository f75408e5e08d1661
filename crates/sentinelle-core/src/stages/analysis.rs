use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::AppError;
use crate::fabric::Fabric;
use crate::job::{EnqueueOptions, Job, JobPayload, QueueName};
use crate::job_queue::JobQueue;
use crate::models::{AlertKind, AlertSeverity, Mention, Sentiment};
use crate::traits::{AnalysisProvider, MentionStore};
use crate::worker::JobHandler;

/// Virality levels that raise alerts.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    /// Above this, a mention is a viral risk.
    pub virality: f64,
    /// Above this, the viral risk is critical.
    pub critical_virality: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            virality: 0.7,
            critical_virality: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertDecision {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
}

/// Decide whether an analyzed mention warrants an alert.
pub fn evaluate_alert(
    sentiment: Sentiment,
    virality: f64,
    thresholds: &AlertThresholds,
) -> Option<AlertDecision> {
    if virality > thresholds.virality {
        let severity = if virality > thresholds.critical_virality {
            AlertSeverity::Critical
        } else {
            AlertSeverity::High
        };
        return Some(AlertDecision {
            kind: AlertKind::ViralRisk,
            severity,
            message: format!("Mention at viral risk ({sentiment} sentiment, virality {virality:.2})"),
        });
    }

    (sentiment == Sentiment::Negative).then(|| AlertDecision {
        kind: AlertKind::NegativeSentiment,
        severity: AlertSeverity::Medium,
        message: format!("Negative mention detected (virality {virality:.2})"),
    })
}

/// Scores a mention through the analysis provider and queues an alert when
/// the result crosses a threshold.
#[derive(Clone)]
pub struct AnalysisStage<Q, M, P>
where
    Q: JobQueue,
    M: MentionStore,
    P: AnalysisProvider,
{
    fabric: Fabric<Q>,
    mentions: M,
    provider: P,
    breaker: CircuitBreaker,
    timeout: Duration,
    thresholds: AlertThresholds,
}

impl<Q, M, P> AnalysisStage<Q, M, P>
where
    Q: JobQueue + 'static,
    M: MentionStore + 'static,
    P: AnalysisProvider + 'static,
{
    pub fn new(
        fabric: Fabric<Q>,
        mentions: M,
        provider: P,
        breaker: CircuitBreaker,
        timeout: Duration,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            fabric,
            mentions,
            provider,
            breaker,
            timeout,
            thresholds,
        }
    }

    /// Analyze one mention. Returns the alert decision, if any.
    ///
    /// An already analyzed mention is not sent to the provider again; its
    /// stored scores are re-evaluated so that an alert lost between the
    /// analysis write and the enqueue is still produced.
    pub async fn analyze(
        &self,
        mention_id: Uuid,
        text: &str,
    ) -> Result<Option<AlertDecision>, AppError> {
        let mention = self
            .mentions
            .get_mention(mention_id)
            .await?
            .ok_or_else(|| AppError::not_found("mention", mention_id))?;

        if mention.is_analyzed() {
            tracing::debug!(%mention_id, "Mention already analyzed");
            return self.raise_alert(&mention).await;
        }

        let text = if text.trim().is_empty() {
            mention.content.as_str()
        } else {
            text
        };

        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(timeout, self.provider.analyze(text)).await {
                    Ok(r) => r,
                    Err(_) => Err(AppError::Timeout(timeout.as_secs())),
                }
            })
            .await?;

        let analyzed_at = Utc::now();
        if !self
            .mentions
            .update_analysis(mention_id, &result, analyzed_at)
            .await?
        {
            tracing::debug!(%mention_id, "Analysis already recorded by another attempt");
            return Ok(None);
        }

        tracing::info!(
            %mention_id,
            sentiment = %result.sentiment,
            virality = result.virality_score,
            "Mention analyzed"
        );

        let analyzed = Mention {
            sentiment: Some(result.sentiment),
            sentiment_score: Some(result.score),
            emotions: result.emotions,
            virality_score: Some(result.virality_score),
            analyzed_at: Some(analyzed_at),
            ..mention
        };
        self.raise_alert(&analyzed).await
    }

    async fn raise_alert(&self, mention: &Mention) -> Result<Option<AlertDecision>, AppError> {
        let Some(sentiment) = mention.sentiment else {
            return Ok(None);
        };
        let virality = mention.virality_score.unwrap_or_default();
        let Some(decision) = evaluate_alert(sentiment, virality, &self.thresholds) else {
            return Ok(None);
        };

        self.fabric
            .enqueue(
                JobPayload::Alert {
                    mention_id: mention.id,
                    organization_id: mention.organization_id,
                    kind: decision.kind,
                    severity: decision.severity,
                    message: decision.message.clone(),
                },
                EnqueueOptions::default(),
            )
            .await?;
        Ok(Some(decision))
    }
}

impl<Q, M, P> JobHandler for AnalysisStage<Q, M, P>
where
    Q: JobQueue + 'static,
    M: MentionStore + 'static,
    P: AnalysisProvider + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        match &job.payload {
            JobPayload::Analyze {
                mention_id, text, ..
            } => self.analyze(*mention_id, text).await.map(|_| ()),
            _ => Err(super::unexpected_payload(QueueName::Analysis, job)),
        }
    }
}

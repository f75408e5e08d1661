use chrono::Utc;

use crate::error::AppError;
use crate::job::{Job, JobPayload, QueueName};
use crate::models::{Alert, NewAlert};
use crate::traits::{AlertStore, NotificationSink};
use crate::worker::JobHandler;

/// Creates the alert for a mention and notifies its recipients.
///
/// Alert creation is idempotent per (mention, kind). Notification is
/// at-least-once: a failed delivery fails the job, and the retry notifies
/// every recipient again until the alert is stamped as notified.
#[derive(Clone)]
pub struct AlertingStage<A: AlertStore, N: NotificationSink> {
    alerts: A,
    sink: N,
}

impl<A: AlertStore + 'static, N: NotificationSink + 'static> AlertingStage<A, N> {
    pub fn new(alerts: A, sink: N) -> Self {
        Self { alerts, sink }
    }

    pub async fn raise(&self, new_alert: &NewAlert) -> Result<Alert, AppError> {
        let alert = self.alerts.create_if_absent(new_alert).await?;

        if alert.notified_at.is_some() {
            tracing::debug!(alert_id = %alert.id, "Alert already notified");
            return Ok(alert);
        }

        let recipients = self
            .alerts
            .recipients(alert.organization_id, alert.severity)
            .await?;
        let context = serde_json::json!({
            "alert_id": alert.id,
            "mention_id": alert.mention_id,
            "organization_id": alert.organization_id,
            "kind": alert.kind,
            "severity": alert.severity,
        });

        let mut failures = Vec::new();
        for recipient in &recipients {
            if let Err(e) = self.sink.notify(recipient, &alert.message, &context).await {
                tracing::warn!(
                    alert_id = %alert.id,
                    channel = recipient.channel.as_str(),
                    error = %e,
                    "Notification failed"
                );
                failures.push(e.to_string());
            }
        }

        if !failures.is_empty() {
            return Err(AppError::NotificationError(format!(
                "{} of {} notifications failed: {}",
                failures.len(),
                recipients.len(),
                failures.join("; ")
            )));
        }

        let now = Utc::now();
        self.alerts.mark_notified(alert.id, now).await?;
        tracing::info!(
            alert_id = %alert.id,
            severity = %alert.severity,
            recipients = recipients.len(),
            "Alert raised"
        );

        Ok(Alert {
            notified_at: Some(now),
            ..alert
        })
    }
}

impl<A: AlertStore + 'static, N: NotificationSink + 'static> JobHandler for AlertingStage<A, N> {
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        match &job.payload {
            JobPayload::Alert {
                mention_id,
                organization_id,
                kind,
                severity,
                message,
            } => {
                let new_alert = NewAlert {
                    mention_id: *mention_id,
                    organization_id: *organization_id,
                    kind: *kind,
                    severity: *severity,
                    message: message.clone(),
                };
                self.raise(&new_alert).await.map(|_| ())
            }
            _ => Err(super::unexpected_payload(QueueName::Alerting, job)),
        }
    }
}

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sentinelle_core::error::AppError;
use sentinelle_core::models::{Alert, AlertSeverity, NewAlert, Recipient, TimeWindow};
use sentinelle_core::traits::AlertStore;

/// Alerts and their recipients.
#[derive(Clone)]
pub struct AlertRepository {
    pool: Pool<Postgres>,
}

impl AlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a recipient for alerts of `min_severity` and above.
    pub async fn add_recipient(
        &self,
        organization_id: Uuid,
        recipient: &Recipient,
        min_severity: AlertSeverity,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO alert_recipients (organization_id, channel, target, min_severity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (organization_id, channel, target)
            DO UPDATE SET min_severity = EXCLUDED.min_severity
            "#,
        )
        .bind(organization_id)
        .bind(recipient.channel.as_str())
        .bind(&recipient.target)
        .bind(min_severity.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Mark an alert resolved so retention cleanup may remove it.
    pub async fn resolve(&self, alert_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE alerts SET resolved = TRUE WHERE id = $1")
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("alert", alert_id));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    mention_id: Uuid,
    organization_id: Uuid,
    kind: String,
    severity: String,
    message: String,
    created_at: DateTime<Utc>,
    resolved: bool,
    notified_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = AppError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: row.id,
            mention_id: row.mention_id,
            organization_id: row.organization_id,
            kind: row.kind.parse().map_err(AppError::DatabaseError)?,
            severity: row.severity.parse().map_err(AppError::DatabaseError)?,
            message: row.message,
            created_at: row.created_at,
            resolved: row.resolved,
            notified_at: row.notified_at,
        })
    }
}

impl AlertStore for AlertRepository {
    async fn create_if_absent(&self, alert: &NewAlert) -> Result<Alert, AppError> {
        let inserted = sqlx::query_as::<_, AlertRow>(
            r#"
            INSERT INTO alerts (mention_id, organization_id, kind, severity, message)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (mention_id, kind) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(alert.mention_id)
        .bind(alert.organization_id)
        .bind(alert.kind.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let row = match inserted {
            Some(row) => row,
            None => sqlx::query_as::<_, AlertRow>(
                "SELECT * FROM alerts WHERE mention_id = $1 AND kind = $2",
            )
            .bind(alert.mention_id)
            .bind(alert.kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?,
        };

        row.try_into()
    }

    async fn mark_notified(&self, alert_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE alerts SET notified_at = $2 WHERE id = $1")
            .bind(alert_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn recipients(
        &self,
        organization_id: Uuid,
        severity: AlertSeverity,
    ) -> Result<Vec<Recipient>, AppError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT channel, target FROM alert_recipients
            WHERE organization_id = $1
              AND array_position(ARRAY['low', 'medium', 'high', 'critical']::text[], min_severity::text)
                  <= array_position(ARRAY['low', 'medium', 'high', 'critical']::text[], $2::text)
            ORDER BY channel, target
            "#,
        )
        .bind(organization_id)
        .bind(severity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|(channel, target)| {
                Ok(Recipient {
                    channel: channel.parse().map_err(AppError::DatabaseError)?,
                    target,
                })
            })
            .collect()
    }

    async fn count_in_window(
        &self,
        organization_id: Uuid,
        window: &TimeWindow,
    ) -> Result<u64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM alerts
            WHERE organization_id = $1 AND created_at >= $2 AND created_at < $3
            "#,
        )
        .bind(organization_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count.max(0) as u64)
    }

    async fn delete_resolved_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM alerts WHERE resolved AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

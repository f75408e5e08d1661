use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sentinelle_core::error::AppError;
use sentinelle_core::models::{Period, Report, ReportResult, StatsSnapshot, TimeWindow};
use sentinelle_core::traits::ReportStore;

/// User-requested reports.
#[derive(Clone)]
pub struct ReportRepository {
    pool: Pool<Postgres>,
}

impl ReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending report over `window`.
    pub async fn create_report(
        &self,
        organization_id: Uuid,
        brand_id: Option<Uuid>,
        period: Period,
        window: TimeWindow,
    ) -> Result<Report, AppError> {
        let row = sqlx::query_as::<_, ReportRow>(
            r#"
            INSERT INTO reports (organization_id, brand_id, period, window_start, window_end)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(brand_id)
        .bind(period.as_str())
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    organization_id: Uuid,
    brand_id: Option<Uuid>,
    period: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    status: String,
    stats: Option<Json<StatsSnapshot>>,
    output_ref: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    generated_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReportRow> for Report {
    type Error = AppError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Report {
            id: row.id,
            organization_id: row.organization_id,
            brand_id: row.brand_id,
            period: row.period.parse().map_err(AppError::DatabaseError)?,
            window: TimeWindow {
                start: row.window_start,
                end: row.window_end,
            },
            status: row.status.parse().map_err(AppError::DatabaseError)?,
            stats: row.stats.map(|s| s.0),
            output_ref: row.output_ref,
            error_message: row.error_message,
            created_at: row.created_at,
            generated_at: row.generated_at,
        })
    }
}

impl ReportStore for ReportRepository {
    async fn load_report(&self, report_id: Uuid) -> Result<Option<Report>, AppError> {
        let row = sqlx::query_as::<_, ReportRow>("SELECT * FROM reports WHERE id = $1")
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Report::try_from).transpose()
    }

    async fn mark_processing(&self, report_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE reports SET status = 'processing' WHERE id = $1 AND status <> 'completed'",
        )
        .bind(report_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn save_report_result(
        &self,
        report_id: Uuid,
        result: &ReportResult,
    ) -> Result<(), AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE reports
            SET status = $2, stats = $3, output_ref = $4, error_message = $5, generated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(report_id)
        .bind(result.status.as_str())
        .bind(result.stats.as_ref().map(Json))
        .bind(result.output_ref.as_deref())
        .bind(result.error_message.as_deref())
        .bind(result.generated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::not_found("report", report_id));
        }
        Ok(())
    }

    async fn pending_reports(&self, limit: usize) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM reports WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM reports WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

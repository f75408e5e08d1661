use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sentinelle_core::error::AppError;
use sentinelle_core::models::{AggregateStat, Period, StatsSnapshot, TimeWindow};
use sentinelle_core::traits::StatsStore;

/// Aggregated statistics, one row per (organization, date, period).
#[derive(Clone)]
pub struct StatsRepository {
    pool: Pool<Postgres>,
}

impl StatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_aggregate(
        &self,
        organization_id: Uuid,
        date: NaiveDate,
        period: Period,
    ) -> Result<Option<AggregateStat>, AppError> {
        let row = sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT * FROM aggregate_stats
            WHERE organization_id = $1 AND date = $2 AND period = $3
            "#,
        )
        .bind(organization_id)
        .bind(date)
        .bind(period.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(AggregateStat::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct AggregateRow {
    organization_id: Uuid,
    date: NaiveDate,
    period: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    stats: Json<StatsSnapshot>,
    computed_at: DateTime<Utc>,
}

impl TryFrom<AggregateRow> for AggregateStat {
    type Error = AppError;

    fn try_from(row: AggregateRow) -> Result<Self, Self::Error> {
        Ok(AggregateStat {
            organization_id: row.organization_id,
            date: row.date,
            period: row.period.parse().map_err(AppError::DatabaseError)?,
            window: TimeWindow {
                start: row.window_start,
                end: row.window_end,
            },
            stats: row.stats.0,
            computed_at: row.computed_at,
        })
    }
}

impl StatsStore for StatsRepository {
    async fn upsert_aggregate(&self, stat: &AggregateStat) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO aggregate_stats (organization_id, date, period, window_start, window_end,
                                         stats, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (organization_id, date, period) DO UPDATE
            SET window_start = EXCLUDED.window_start,
                window_end = EXCLUDED.window_end,
                stats = EXCLUDED.stats,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(stat.organization_id)
        .bind(stat.date)
        .bind(stat.period.as_str())
        .bind(stat.window.start)
        .bind(stat.window.end)
        .bind(Json(&stat.stats))
        .bind(stat.computed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

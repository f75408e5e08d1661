use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sentinelle_core::error::AppError;
use sentinelle_core::models::{CollectionOutcome, Source, SourceStatus};
use sentinelle_core::selector::DuePolicy;
use sentinelle_core::traits::SourceRegistry;

/// Source registry over the `sources` table.
///
/// Bookkeeping updates are compare-and-set on `last_collected_at`, so two
/// overlapping collections of one source never both write.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a source as-is (ids included).
    pub async fn insert(&self, source: &Source) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, organization_id, brand_id, name, source_type, url, active,
                                 collection_interval_secs, last_collected_at, error_count, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(source.id)
        .bind(source.organization_id)
        .bind(source.brand_id)
        .bind(&source.name)
        .bind(source.source_type.as_str())
        .bind(source.url.as_deref())
        .bind(source.active)
        .bind(source.collection_interval.map(|i| i.num_seconds()))
        .bind(source.last_collected_at)
        .bind(source.error_count as i32)
        .bind(source.last_error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn exists(&self, source_id: Uuid) -> Result<bool, AppError> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM sources WHERE id = $1)")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(exists)
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    organization_id: Uuid,
    brand_id: Uuid,
    name: String,
    source_type: String,
    url: Option<String>,
    active: bool,
    collection_interval_secs: Option<i64>,
    last_collected_at: Option<DateTime<Utc>>,
    error_count: i32,
    last_error: Option<String>,
}

impl TryFrom<SourceRow> for Source {
    type Error = AppError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        Ok(Source {
            id: row.id,
            organization_id: row.organization_id,
            brand_id: row.brand_id,
            name: row.name,
            source_type: row.source_type.parse().map_err(AppError::DatabaseError)?,
            url: row.url,
            active: row.active,
            collection_interval: row.collection_interval_secs.map(TimeDelta::seconds),
            last_collected_at: row.last_collected_at,
            error_count: row.error_count.max(0) as u32,
            last_error: row.last_error,
        })
    }
}

const SOURCE_COLUMNS: &str = "id, organization_id, brand_id, name, source_type, url, active, \
     collection_interval_secs, last_collected_at, error_count, last_error";

impl SourceRegistry for SourceRepository {
    async fn list_due_sources(
        &self,
        now: DateTime<Utc>,
        policy: &DuePolicy,
        limit: usize,
    ) -> Result<Vec<Source>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            r#"
            SELECT {SOURCE_COLUMNS} FROM sources
            WHERE active
              AND (
                  last_collected_at IS NULL
                  OR last_collected_at
                     + GREATEST(COALESCE(collection_interval_secs, $2), $3)::double precision
                       * INTERVAL '1 second'
                     <= $1
              )
            ORDER BY last_collected_at ASC NULLS FIRST, id
            LIMIT $4
            "#
        ))
        .bind(now)
        .bind(policy.default_interval.num_seconds())
        .bind(policy.min_interval.num_seconds())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Source::try_from).collect()
    }

    async fn get_source(&self, source_id: Uuid) -> Result<Option<Source>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = $1"
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Source::try_from).transpose()
    }

    async fn mark_collected(
        &self,
        source_id: Uuid,
        expected_last: Option<DateTime<Utc>>,
        outcome: &CollectionOutcome,
        at: DateTime<Utc>,
        deactivate_after: u32,
    ) -> Result<Option<SourceStatus>, AppError> {
        let (success, error) = match outcome {
            CollectionOutcome::Success => (true, None),
            CollectionOutcome::Failure { error } => (false, Some(error.as_str())),
        };

        let row: Option<(i32, bool)> = sqlx::query_as(
            r#"
            UPDATE sources
            SET last_collected_at = $3,
                error_count = CASE WHEN $4 THEN 0 ELSE error_count + 1 END,
                last_error = $5,
                active = CASE WHEN $4 THEN active ELSE active AND error_count + 1 < $6 END,
                updated_at = NOW()
            WHERE id = $1 AND last_collected_at IS NOT DISTINCT FROM $2
            RETURNING error_count, active
            "#,
        )
        .bind(source_id)
        .bind(expected_last)
        .bind(at)
        .bind(success)
        .bind(error)
        .bind(deactivate_after as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        match row {
            Some((error_count, active)) => Ok(Some(SourceStatus {
                error_count: error_count.max(0) as u32,
                active,
            })),
            None if self.exists(source_id).await? => Ok(None),
            None => Err(AppError::not_found("source", source_id)),
        }
    }

    async fn record_rejection(&self, source_id: Uuid, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sources SET active = FALSE, last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(source_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("source", source_id));
        }
        Ok(())
    }

    async fn active_organizations(&self) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT organization_id FROM sources WHERE active ORDER BY organization_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

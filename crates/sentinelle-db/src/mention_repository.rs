use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sentinelle_core::error::AppError;
use sentinelle_core::models::{AnalysisResult, Mention, NewMention, TimeWindow, UpsertOutcome};
use sentinelle_core::traits::MentionStore;

/// Mention store over the `mentions` table.
///
/// `(source_id, external_id)` is a unique constraint, so concurrent
/// collections of the same item insert it once.
#[derive(Clone)]
pub struct MentionRepository {
    pool: Pool<Postgres>,
}

impl MentionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MentionRow {
    id: Uuid,
    source_id: Uuid,
    brand_id: Uuid,
    organization_id: Uuid,
    external_id: String,
    content: String,
    author: Option<String>,
    url: Option<String>,
    published_at: DateTime<Utc>,
    collected_at: DateTime<Utc>,
    sentiment: Option<String>,
    sentiment_score: Option<f64>,
    emotions: Vec<String>,
    virality_score: Option<f64>,
    analyzed_at: Option<DateTime<Utc>>,
}

impl TryFrom<MentionRow> for Mention {
    type Error = AppError;

    fn try_from(row: MentionRow) -> Result<Self, Self::Error> {
        Ok(Mention {
            id: row.id,
            source_id: row.source_id,
            brand_id: row.brand_id,
            organization_id: row.organization_id,
            external_id: row.external_id,
            content: row.content,
            author: row.author,
            url: row.url,
            published_at: row.published_at,
            collected_at: row.collected_at,
            sentiment: row
                .sentiment
                .map(|s| s.parse())
                .transpose()
                .map_err(AppError::DatabaseError)?,
            sentiment_score: row.sentiment_score,
            emotions: row.emotions,
            virality_score: row.virality_score,
            analyzed_at: row.analyzed_at,
        })
    }
}

impl MentionStore for MentionRepository {
    async fn upsert_if_absent(&self, mention: &NewMention) -> Result<UpsertOutcome, AppError> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO mentions (source_id, brand_id, organization_id, external_id, content,
                                  author, url, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_id, external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(mention.source_id)
        .bind(mention.brand_id)
        .bind(mention.organization_id)
        .bind(&mention.external_id)
        .bind(&mention.content)
        .bind(mention.author.as_deref())
        .bind(mention.url.as_deref())
        .bind(mention.published_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if let Some((id,)) = inserted {
            return Ok(UpsertOutcome { created: true, id });
        }

        let (id,): (Uuid,) =
            sqlx::query_as("SELECT id FROM mentions WHERE source_id = $1 AND external_id = $2")
                .bind(mention.source_id)
                .bind(&mention.external_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(UpsertOutcome { created: false, id })
    }

    async fn get_mention(&self, mention_id: Uuid) -> Result<Option<Mention>, AppError> {
        let row = sqlx::query_as::<_, MentionRow>("SELECT * FROM mentions WHERE id = $1")
            .bind(mention_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Mention::try_from).transpose()
    }

    async fn update_analysis(
        &self,
        mention_id: Uuid,
        result: &AnalysisResult,
        analyzed_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE mentions
            SET sentiment = $2, sentiment_score = $3, emotions = $4,
                virality_score = $5, analyzed_at = $6
            WHERE id = $1 AND analyzed_at IS NULL
            "#,
        )
        .bind(mention_id)
        .bind(result.sentiment.as_str())
        .bind(result.score)
        .bind(&result.emotions)
        .bind(result.virality_score)
        .bind(analyzed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_mention(mention_id).await? {
            Some(_) => Ok(false),
            None => Err(AppError::not_found("mention", mention_id)),
        }
    }

    async fn query_by_org_and_window(
        &self,
        organization_id: Uuid,
        brand_id: Option<Uuid>,
        window: &TimeWindow,
    ) -> Result<Vec<Mention>, AppError> {
        let rows = sqlx::query_as::<_, MentionRow>(
            r#"
            SELECT * FROM mentions
            WHERE organization_id = $1
              AND ($2::uuid IS NULL OR brand_id = $2)
              AND published_at >= $3 AND published_at < $4
            ORDER BY published_at ASC
            "#,
        )
        .bind(organization_id)
        .bind(brand_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Mention::try_from).collect()
    }

    /// Mentions that still carry an unresolved alert are kept. Resolved
    /// alerts go with their expired mention.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r#"
            DELETE FROM alerts AS a
            USING mentions AS m
            WHERE a.mention_id = m.id
              AND m.published_at < $1
              AND NOT EXISTS (
                  SELECT 1 FROM alerts AS open
                  WHERE open.mention_id = m.id AND NOT open.resolved
              )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            DELETE FROM mentions AS m
            WHERE m.published_at < $1
              AND NOT EXISTS (SELECT 1 FROM alerts AS a WHERE a.mention_id = m.id)
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

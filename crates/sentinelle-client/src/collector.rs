use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use sentinelle_core::error::AppError;
use sentinelle_core::models::{CollectedItem, Source, SourceType};
use sentinelle_core::traits::Collector;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http::{build_client, check_status, map_send_error, trim_base};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Collector backed by the scraper service.
///
/// Each source type is posted to its own endpoint (`/scrape/<kind>`), with
/// `/scrape/generic` for the types the service has no dedicated scraper for.
#[derive(Clone)]
pub struct HttpCollector {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpCollector {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
            timeout_secs: timeout.as_secs(),
        })
    }
}

pub fn endpoint_for(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::GoogleReviews => "/scrape/google-reviews",
        SourceType::Trustpilot => "/scrape/trustpilot",
        SourceType::Tripadvisor => "/scrape/tripadvisor",
        SourceType::Twitter => "/scrape/twitter",
        SourceType::Reddit => "/scrape/reddit",
        SourceType::News => "/scrape/news",
        SourceType::Rss => "/scrape/rss",
        SourceType::Youtube => "/scrape/youtube",
        _ => "/scrape/generic",
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    source_id: Uuid,
    brand_id: Uuid,
    source_type: SourceType,
    name: &'a str,
    url: Option<&'a str>,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    data: Vec<ScrapedItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapedItem {
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

impl From<ScrapedItem> for CollectedItem {
    fn from(item: ScrapedItem) -> Self {
        Self {
            external_id: item.external_id,
            content: item.content,
            author: item.author,
            url: item.url,
            published_at: item.published_at,
        }
    }
}

impl Collector for HttpCollector {
    async fn collect(&self, source: &Source) -> Result<Vec<CollectedItem>, AppError> {
        let url = format!("{}{}", self.base_url, endpoint_for(source.source_type));
        let request = ScrapeRequest {
            source_id: source.id,
            brand_id: source.brand_id,
            source_type: source.source_type,
            name: &source.name,
            url: source.url.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;
        let response = check_status(response, "scraper").await?;

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse scraper response: {e}")))?;

        tracing::debug!(
            source_id = %source.id,
            source_type = %source.source_type,
            items = body.data.len(),
            "Scraper returned items"
        );
        Ok(body.data.into_iter().map(CollectedItem::from).collect())
    }
}

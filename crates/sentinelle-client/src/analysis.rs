use std::time::Duration;

use reqwest::Client;
use sentinelle_core::error::AppError;
use sentinelle_core::models::{AnalysisResult, Sentiment};
use sentinelle_core::traits::AnalysisProvider;
use serde::{Deserialize, Serialize};

use crate::http::{build_client, check_status, map_send_error, trim_base};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sentiment and virality scoring through the AI service (`POST /analyze`).
#[derive(Clone)]
pub struct HttpAnalysisProvider {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpAnalysisProvider {
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

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    sentiment: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    emotions: Vec<String>,
    #[serde(default, alias = "virality_score")]
    virality_score: f64,
}

impl TryFrom<AnalyzeResponse> for AnalysisResult {
    type Error = AppError;

    fn try_from(raw: AnalyzeResponse) -> Result<Self, Self::Error> {
        let sentiment: Sentiment = raw.sentiment.parse().map_err(|e: String| {
            AppError::ProviderError {
                message: e,
                status_code: 200,
                retryable: false,
            }
        })?;
        Ok(Self {
            sentiment,
            score: raw.score.clamp(-1.0, 1.0),
            emotions: raw.emotions,
            virality_score: raw.virality_score.clamp(0.0, 1.0),
        })
    }
}

impl AnalysisProvider for HttpAnalysisProvider {
    async fn analyze(&self, text: &str) -> Result<AnalysisResult, AppError> {
        let url = format!("{}/analyze", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;
        let response = check_status(response, "ai service").await?;

        let raw: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse analysis response: {e}")))?;
        AnalysisResult::try_from(raw)
    }
}

use std::time::Duration;

use reqwest::{Client, Response};
use sentinelle_core::error::AppError;
use serde::Deserialize;

const USER_AGENT: &str = "Sentinelle/0.1";

pub(crate) fn build_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

pub(crate) fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

#[derive(Deserialize)]
struct ServiceError {
    #[serde(alias = "detail", alias = "error")]
    message: String,
}

/// Turn a non-2xx response into an error. 429 maps to `RateLimitExceeded`,
/// 5xx is retryable and everything else is not.
pub(crate) async fn check_status(response: Response, service: &str) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let status_code = status.as_u16();
    if status_code == 429 {
        return Err(AppError::RateLimitExceeded);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ServiceError>(&body)
        .map(|e| e.message)
        .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

    Err(AppError::ProviderError {
        message: format!("{service}: {message}"),
        status_code,
        retryable: status_code >= 500 || status_code == 408,
    })
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

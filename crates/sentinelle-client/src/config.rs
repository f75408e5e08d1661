use sentinelle_core::AppError;

/// Endpoints of the external services the pipeline talks to.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub scraper_url: String,
    pub ai_url: String,
    pub notify_url: Option<String>,
    pub notify_token: Option<String>,
}

impl ServiceConfig {
    /// Read configuration from environment variables.
    ///
    /// - `SCRAPER_SERVICE_URL` (defaults to `http://localhost:8001`)
    /// - `AI_SERVICE_URL` (defaults to `http://localhost:8000`)
    /// - `NOTIFY_GATEWAY_URL` (optional, notifications are only logged without it)
    /// - `NOTIFY_GATEWAY_TOKEN` (optional)
    pub fn from_env() -> Result<Self, AppError> {
        let scraper_url = url_var("SCRAPER_SERVICE_URL")?
            .unwrap_or_else(|| "http://localhost:8001".into());
        let ai_url = url_var("AI_SERVICE_URL")?.unwrap_or_else(|| "http://localhost:8000".into());

        Ok(Self {
            scraper_url,
            ai_url,
            notify_url: url_var("NOTIFY_GATEWAY_URL")?,
            notify_token: std::env::var("NOTIFY_GATEWAY_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        })
    }
}

fn url_var(key: &str) -> Result<Option<String>, AppError> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => {
            url::Url::parse(raw.trim())
                .map_err(|e| AppError::ConfigError(format!("Invalid {key} '{raw}': {e}")))?;
            Ok(Some(raw.trim().to_string()))
        }
    }
}

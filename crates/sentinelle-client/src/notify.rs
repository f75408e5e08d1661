use std::time::Duration;

use reqwest::Client;
use sentinelle_core::error::AppError;
use sentinelle_core::models::{NotificationChannel, Recipient};
use sentinelle_core::traits::NotificationSink;
use serde::Serialize;

use crate::http::{build_client, check_status, map_send_error, trim_base};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Delivers notifications through the notification gateway (`POST /notify`).
#[derive(Clone)]
pub struct HttpNotificationSink {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout_secs: u64,
}

impl HttpNotificationSink {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            base_url: trim_base(base_url),
            token,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        })
    }
}

#[derive(Serialize)]
struct NotifyRequest<'a> {
    channel: NotificationChannel,
    target: &'a str,
    message: &'a str,
    context: &'a serde_json::Value,
}

impl NotificationSink for HttpNotificationSink {
    async fn notify(
        &self,
        recipient: &Recipient,
        message: &str,
        data: &serde_json::Value,
    ) -> Result<(), AppError> {
        let url = format!("{}/notify", self.base_url);
        let mut request = self.client.post(&url).json(&NotifyRequest {
            channel: recipient.channel,
            target: &recipient.target,
            message,
            context: data,
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            AppError::NotificationError(map_send_error(e, self.timeout_secs).to_string())
        })?;
        check_status(response, "notification gateway")
            .await
            .map_err(|e| AppError::NotificationError(e.to_string()))?;
        Ok(())
    }
}

/// Sink that only logs; used when no gateway is configured.
#[derive(Clone, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    async fn notify(
        &self,
        recipient: &Recipient,
        message: &str,
        data: &serde_json::Value,
    ) -> Result<(), AppError> {
        tracing::info!(
            channel = %recipient.channel,
            target = %recipient.target,
            context = %data,
            "{message}"
        );
        Ok(())
    }
}

/// Runtime choice between the gateway and the log-only sink.
#[derive(Clone)]
pub enum Notifier {
    Gateway(HttpNotificationSink),
    Log(TracingNotificationSink),
}

impl Notifier {
    /// Gateway when a URL is configured, log-only otherwise.
    pub fn from_parts(url: Option<&str>, token: Option<String>) -> Result<Self, AppError> {
        match url {
            Some(url) if !url.trim().is_empty() => {
                Ok(Self::Gateway(HttpNotificationSink::new(url, token)?))
            }
            _ => Ok(Self::Log(TracingNotificationSink)),
        }
    }
}

impl NotificationSink for Notifier {
    async fn notify(
        &self,
        recipient: &Recipient,
        message: &str,
        data: &serde_json::Value,
    ) -> Result<(), AppError> {
        match self {
            Self::Gateway(sink) => sink.notify(recipient, message, data).await,
            Self::Log(sink) => sink.notify(recipient, message, data).await,
        }
    }
}

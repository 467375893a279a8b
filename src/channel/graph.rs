//! Graph API client for the WhatsApp Cloud API
//!
//! Posts rendered messages to `/{phone_number_id}/messages` and classifies
//! error bodies into [`DeliveryError`] variants.

use super::wire::WireMessage;
use super::{DeliveryClient, DeliveryError};
use crate::config::Settings;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Longest error text kept from an API response
const MAX_ERROR_TEXT: usize = 500;

/// Error envelope returned by the Graph API
#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_data: Option<GraphErrorData>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorData {
    #[serde(default)]
    details: Option<String>,
}

/// WhatsApp Cloud API client
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: HttpClient,
    api_base: String,
    version: String,
    token: String,
    rate_limit_codes: Vec<i64>,
}

impl GraphClient {
    /// Build a client from settings
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: create_http_client(Duration::from_secs(settings.http_timeout_secs)),
            api_base: settings.graph_api_base.trim_end_matches('/').to_string(),
            version: settings.whatsapp_version.clone(),
            token: settings.whatsapp_token.clone(),
            rate_limit_codes: settings.rate_limit_codes(),
        }
    }

    /// Endpoint for sending from `channel_id`
    #[must_use]
    pub fn messages_url(&self, channel_id: &str) -> String {
        format!("{}/{}/{channel_id}/messages", self.api_base, self.version)
    }
}

/// Creates an HTTP client with a request timeout.
///
/// Falls back to a default client if the builder fails.
#[must_use]
pub fn create_http_client(timeout: Duration) -> HttpClient {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

#[async_trait::async_trait]
impl DeliveryClient for GraphClient {
    async fn send(&self, channel_id: &str, message: &WireMessage) -> Result<(), DeliveryError> {
        let body = serde_json::to_value(message).map_err(|e| DeliveryError::Json(e.to_string()))?;
        trace!(payload = %body, "Posting message");

        let response = self
            .http
            .post(self.messages_url(channel_id))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(classify_error(
            status.as_u16(),
            &error_text,
            &self.rate_limit_codes,
        ))
    }

    async fn probe_size(&self, url: &str) -> Result<Option<u64>, DeliveryError> {
        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_error(status.as_u16(), "", &[]));
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        debug!(url, ?size, "Probed media size");
        Ok(size)
    }
}

/// Maps a failed response to a [`DeliveryError`].
///
/// A Cloud API error code from `rate_limit_codes`, or HTTP 429, means the
/// recipient is rate limited. Other statuses below 500 are rejections.
#[must_use]
pub fn classify_error(status: u16, error_text: &str, rate_limit_codes: &[i64]) -> DeliveryError {
    let parsed = serde_json::from_str::<GraphErrorEnvelope>(error_text)
        .ok()
        .map(|envelope| envelope.error);
    let code = parsed.as_ref().and_then(|e| e.code);
    let message = parsed
        .as_ref()
        .and_then(|e| {
            let details = e.error_data.as_ref().and_then(|d| d.details.as_deref());
            match (e.message.as_deref(), details) {
                (Some(message), Some(details)) => Some(format!("{message} ({details})")),
                (Some(message), None) => Some(message.to_string()),
                (None, details) => details.map(str::to_string),
            }
        })
        .unwrap_or_else(|| clean_error_text(status, error_text));

    let rate_limited = status == 429 || code.is_some_and(|c| rate_limit_codes.contains(&c));
    if rate_limited {
        DeliveryError::RateLimited { code, message }
    } else if status >= 500 {
        DeliveryError::Server { status, message }
    } else {
        DeliveryError::ClientRejected {
            status,
            code,
            message,
        }
    }
}

fn clean_error_text(status: u16, error_text: &str) -> String {
    let trimmed = error_text.trim_start();
    // Proxies answer with HTML error pages
    if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") || trimmed.starts_with("<HTML") {
        return format!("HTTP {status} (server returned HTML error page)");
    }
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }
    if trimmed.chars().count() > MAX_ERROR_TEXT {
        let truncated: String = trimmed.chars().take(MAX_ERROR_TEXT).collect();
        format!("{truncated}... (truncated)")
    } else {
        trimmed.to_string()
    }
}

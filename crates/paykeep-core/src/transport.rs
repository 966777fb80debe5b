//! HTTP transport for the sync API
//!
//! The orchestrator and poller talk to the server only through the
//! [`SyncTransport`] trait; [`HttpTransport`] is the production reqwest
//! implementation carrying the bearer credential and device identity.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::SyncLogEntry;
use crate::wire::{
    AckRequest, LogsResponse, PullResponse, PushRequest, PushResponse, SimpleResponse,
    StatusResponse,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The four network operations of one sync cycle.
///
/// A trait rather than a concrete client so the orchestrator and poller can
/// be exercised against a scripted transport in tests.
pub trait SyncTransport: Send + Sync {
    /// Offer the local dirty set to the reconciliation service.
    fn push(&self, request: &PushRequest) -> impl Future<Output = Result<PushResponse>> + Send;

    /// Fetch server-side deltas strictly after `since`.
    fn pull(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<PullResponse>> + Send;

    /// Ask the server for the authoritative sync mode.
    fn status(&self) -> impl Future<Output = Result<StatusResponse>> + Send;

    /// Acknowledge adoption of a new watermark.
    fn acknowledge(
        &self,
        last_sync_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<SimpleResponse>> + Send;
}

/// Bearer-credentialed reqwest client for the `/sync` API.
#[derive(Clone)]
pub struct HttpTransport {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(Error::InvalidInput(
                "bearer token must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            endpoint,
            token,
            client,
        })
    }

    /// Fetch the server-side sync log (not part of the cycle; ops surface).
    pub async fn fetch_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let response: LogsResponse = self
            .get_json("/sync/logs", &[("limit", limit.to_string())])
            .await?;
        Ok(response.data)
    }

    /// Force the server-reported mode back to ONLINE.
    pub async fn emergency_reset(&self) -> Result<SimpleResponse> {
        self.post_json("/sync/reset", &serde_json::json!({})).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{path}", self.endpoint))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(parse_api_error(status, &body)));
        }
        Ok(response.json::<T>().await?)
    }
}

impl SyncTransport for HttpTransport {
    fn push(&self, request: &PushRequest) -> impl Future<Output = Result<PushResponse>> + Send {
        self.post_json("/sync/push", request)
    }

    fn pull(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<PullResponse>> + Send {
        let mut query = vec![("deviceId", device_id.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        async move { self.get_json("/sync/pull", &query).await }
    }

    fn status(&self) -> impl Future<Output = Result<StatusResponse>> + Send {
        self.get_json("/sync/status", &[])
    }

    fn acknowledge(
        &self,
        last_sync_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<SimpleResponse>> + Send {
        async move {
            self.post_json("/sync/status", &AckRequest { last_sync_time })
                .await
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput(
            "endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
    }

    #[test]
    fn normalize_endpoint_trims_trailing_slash() {
        assert_eq!(
            normalize_endpoint("https://sync.example.com/".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn transport_debug_redacts_token() {
        let transport = HttpTransport::new("https://sync.example.com", "secret-token").unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(HttpTransport::new("https://sync.example.com", "  ").is_err());
    }

    #[test]
    fn api_error_prefers_structured_message() {
        let parsed = parse_api_error(
            StatusCode::UNAUTHORIZED,
            r#"{"error":"Unauthorized: bad token"}"#,
        );
        assert_eq!(parsed, "Unauthorized: bad token (401)");

        let fallback = parse_api_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(fallback, "HTTP 502");
    }
}

//! Thin HTTP client for the upstream social-media aggregator.
//!
//! Issues exactly one request per call, attaches the bearer credential and a
//! correlation id, measures latency, and classifies failures into the five
//! error kinds the retry layer and breaker consume.

use std::time::Duration;

use async_trait::async_trait;
use metrics::histogram;
use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SocialConfig;
use crate::telemetry::current_trace_id;

/// Upstream call failure classification.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No response received (connect error, timeout, deadline exceeded).
    #[error("upstream network error: {0}")]
    Network(String),
    /// Response status >= 500.
    #[error("upstream server error (status {status})")]
    Server { status: u16, body: String },
    /// Response status 429.
    #[error("upstream throttled the request")]
    Throttled { body: String },
    /// Response status 4xx other than 429; not worth retrying.
    #[error("upstream rejected the request (status {status})")]
    Client { status: u16, body: String },
    /// Response body could not be parsed.
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Network, server, and throttle failures may resolve on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::Server { .. } | GatewayError::Throttled { .. }
        )
    }
}

/// One request to the aggregator. Cloneable so the retry engine can replay it.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path relative to the aggregator base URL; may carry a query string.
    pub path: String,
    pub body: Option<JsonValue>,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Seam between the social gateway and the wire. Tests substitute a scripted
/// implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: UpstreamRequest) -> Result<JsonValue, GatewayError>;
}

/// Production transport over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &SocialConfig) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(&config.api_url)?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: UpstreamRequest) -> Result<JsonValue, GatewayError> {
        let correlation_id = current_trace_id()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|err| GatewayError::Network(format!("invalid request path: {err}")))?;

        debug!(
            correlation_id = %correlation_id,
            method = %request.method,
            path = %request.path,
            "upstream request started"
        );
        let started = std::time::Instant::now();

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .bearer_auth(&self.api_key)
            .header("x-request-id", &correlation_id);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        // The hard per-request deadline; exceeding it is a NETWORK failure.
        let response = match tokio::time::timeout(self.request_timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(
                    correlation_id = %correlation_id,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "upstream request failed without a response"
                );
                return Err(GatewayError::Network(err.to_string()));
            }
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "upstream request exceeded the per-request deadline"
                );
                return Err(GatewayError::Network(format!(
                    "request deadline of {}ms exceeded",
                    self.request_timeout.as_millis()
                )));
            }
        };

        let status = response.status();
        let elapsed = started.elapsed();
        histogram!("upstream_request_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
        info!(
            correlation_id = %correlation_id,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            path = %request.path,
            "upstream request finished"
        );

        let body = response
            .text()
            .await
            .map_err(|err| GatewayError::Network(err.to_string()))?;

        classify_response(status, body)
    }
}

fn classify_response(status: StatusCode, body: String) -> Result<JsonValue, GatewayError> {
    if status.as_u16() >= 500 {
        return Err(GatewayError::Server {
            status: status.as_u16(),
            body,
        });
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Throttled { body });
    }
    if status.is_client_error() {
        return Err(GatewayError::Client {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|err| GatewayError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::Network("timeout".into()).is_retryable());
        assert!(GatewayError::Server { status: 502, body: String::new() }.is_retryable());
        assert!(GatewayError::Throttled { body: String::new() }.is_retryable());
        assert!(!GatewayError::Client { status: 404, body: String::new() }.is_retryable());
        assert!(!GatewayError::Decode("bad json".into()).is_retryable());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_response(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            Err(GatewayError::Server { status: 500, .. })
        ));
        assert!(matches!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, String::new()),
            Err(GatewayError::Throttled { .. })
        ));
        assert!(matches!(
            classify_response(StatusCode::FORBIDDEN, String::new()),
            Err(GatewayError::Client { status: 403, .. })
        ));
        assert!(matches!(
            classify_response(StatusCode::OK, "not json".to_string()),
            Err(GatewayError::Decode(_))
        ));

        let parsed = classify_response(StatusCode::OK, r#"{"history":[]}"#.to_string()).unwrap();
        assert!(parsed.get("history").is_some());
    }
}

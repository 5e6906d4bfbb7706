//! HTTP transport for webhook delivery with configurable timeouts.
//!
//! Handles request construction, response reading and retry-after
//! extraction. Status classification happens in the engine.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use fanout_core::{Clock, RealClock};
use reqwest::{header::HeaderMap, Response};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    transport::{extract_retry_after, DeliveryRequest, Transport, TransportResponse},
};

/// Response bodies above this size are truncated.
const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Kept prefix when a response body is truncated.
const TRUNCATED_BODY_SIZE: usize = 1024;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a single request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: concat!("fanout/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// reqwest-backed transport.
///
/// Uses one pooled client for all endpoints so concurrent deliveries share
/// connections to the same host. HTTP-date retry-after values are measured
/// against the transport's clock.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl HttpTransport {
    /// Creates a new transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built from the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(RealClock::new()))
    }

    /// Creates a new transport that reads the time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built from the provided settings.
    pub fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Creates a new transport with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Sends one attempt and reads the response.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the request exceeds the configured timeout
    /// - `Transport` for connection and other request failures
    pub async fn send(&self, request: &DeliveryRequest) -> Result<TransportResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "http_post",
            job_id = %request.job_id,
            endpoint = %request.endpoint.masked(),
            payload_index = request.payload_index,
            attempt = request.attempt_number
        );

        async move {
            let payload = &request.payload;
            let mut http_request = self
                .client
                .post(request.endpoint.url().clone())
                .body(payload.body.clone())
                .header("content-type", &payload.content_type);

            for (key, value) in &payload.headers {
                if !is_managed_header(key) {
                    http_request = http_request.header(key, value);
                }
            }

            http_request = http_request
                .header("X-Fanout-Job-Id", request.job_id.to_string())
                .header("X-Fanout-Payload-Index", request.payload_index.to_string())
                .header("X-Fanout-Attempt", request.attempt_number.to_string());

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(
                        duration_ms = start_time.elapsed().as_millis(),
                        "request failed: {e}"
                    );

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::transport(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::transport(e.to_string()));
                },
            };

            let parsed =
                read_response(response, start_time.elapsed(), self.clock.as_ref()).await;
            tracing::debug!(
                status = parsed.status_code,
                duration_ms = parsed.duration.as_millis(),
                "received response"
            );

            Ok(parsed)
        }
        .instrument(span)
        .await
    }
}

impl Transport for HttpTransport {
    fn post<'a>(
        &'a self,
        request: &'a DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>> {
        Box::pin(self.send(request))
    }
}

async fn read_response(
    response: Response,
    duration: Duration,
    clock: &dyn Clock,
) -> TransportResponse {
    let status_code = response.status().as_u16();
    let headers = extract_headers(response.headers());

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to read response body: {e}");
            bytes::Bytes::new()
        },
    };

    // Read before truncation so a large body keeps its retry_after field.
    let retry_after = if status_code == 429 {
        extract_retry_after(&headers, &bytes, clock.now_system())
    } else {
        None
    };

    let body = if bytes.len() > MAX_RESPONSE_BODY_SIZE {
        let truncated = String::from_utf8_lossy(&bytes[..TRUNCATED_BODY_SIZE]);
        format!("{truncated}... (truncated)")
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    TransportResponse { status_code, headers, body, duration, retry_after }
}

/// Copies a reqwest header map into lowercase-keyed strings.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|v| (key.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Headers the transport owns; payload headers with these names are dropped.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_ascii_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    ) || lowercase.starts_with("x-fanout-")
}

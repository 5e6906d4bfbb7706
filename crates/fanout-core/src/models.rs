//! Core domain models for fan-out delivery.
//!
//! Defines validated endpoints, payloads, job identifiers, and the records
//! produced for every delivery attempt. Results are serializable so callers
//! can persist or print a finished report.

use std::{collections::HashMap, fmt, str::FromStr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Strongly-typed delivery job identifier.
///
/// Every fan-out run gets a fresh ID that is attached to each outbound
/// request so receivers can correlate deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A validated webhook destination.
///
/// Only absolute `http`/`https` URLs with a host are accepted. Endpoints are
/// ordered and hashable so they can key result maps.
///
/// # Example
///
/// ```
/// use fanout_core::Endpoint;
///
/// let endpoint = Endpoint::parse("https://hooks.example.com/notify").unwrap();
/// assert_eq!(endpoint.host(), Some("hooks.example.com"));
///
/// assert!(Endpoint::parse("ftp://files.example.com").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(Url);

impl Endpoint {
    /// Parses and validates an endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the input is not an absolute
    /// `http`/`https` URL with a host.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CoreError::validation("endpoint URL is empty"));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| CoreError::validation(format!("invalid endpoint URL '{trimmed}': {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::validation(format!(
                "unsupported endpoint scheme '{}', expected http or https",
                url.scheme()
            )));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(CoreError::validation(format!("endpoint URL '{trimmed}' has no host")));
        }

        Ok(Self(url))
    }

    /// Returns the underlying URL.
    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the endpoint host.
    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }

    /// Returns the URL with its path and query hidden, for logging.
    ///
    /// Webhook URLs usually embed their credentials in the path, so only the
    /// origin is safe to write to logs.
    pub fn masked(&self) -> String {
        let origin = self.0.origin().ascii_serialization();
        if self.0.path() == "/" && self.0.query().is_none() {
            origin
        } else {
            format!("{origin}/***")
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0.into()
    }
}

/// A payload delivered to every endpoint of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Request body.
    pub body: Bytes,
    /// Content type of the body.
    pub content_type: String,
    /// Extra request headers sent with this payload.
    pub headers: HashMap<String, String>,
}

impl Payload {
    /// Creates a payload from raw bytes and a content type.
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self { body: body.into(), content_type: content_type.into(), headers: HashMap::new() }
    }

    /// Creates a JSON payload by serializing `value`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if the value cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| CoreError::validation(format!("payload is not serializable: {e}")))?;
        Ok(Self::new(body, "application/json"))
    }

    /// Creates a plain text payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text.into(), "text/plain; charset=utf-8")
    }

    /// Adds a request header to this payload.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns the body size in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns true if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Classification of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Endpoint accepted the payload.
    Accepted,
    /// Endpoint signalled a rate limit; the attempt will be retried.
    RateLimited {
        /// Server-supplied wait in milliseconds, if one was provided
        retry_after_ms: Option<u64>,
    },
    /// Endpoint answered with a non-success status.
    Rejected,
    /// Request never produced a response.
    Transport {
        /// Transport failure description
        message: String,
    },
}

/// Record of one attempt to deliver a payload to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Attempt number, starting at 1.
    pub attempt_number: u32,
    /// HTTP status, if a response was received.
    pub status_code: Option<u16>,
    /// How the attempt was classified.
    pub outcome: AttemptOutcome,
    /// Request duration in milliseconds.
    pub duration_ms: u64,
}

/// Final outcome of delivering one payload to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Payload was accepted by the endpoint.
    Delivered,
    /// Attempt budget exhausted or a terminal condition was hit.
    Failed,
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of delivering one payload to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Position of the payload in the job.
    pub payload_index: usize,
    /// Final outcome.
    pub outcome: DeliveryOutcome,
    /// Status of the last response received, if any.
    pub last_status: Option<u16>,
    /// Failure reason when the outcome is `Failed`.
    pub error: Option<String>,
    /// Every attempt in order.
    pub attempts: Vec<AttemptRecord>,
}

impl DeliveryResult {
    /// Creates a delivered result from its attempt log.
    pub fn delivered(payload_index: usize, attempts: Vec<AttemptRecord>) -> Self {
        let last_status = last_status(&attempts);
        Self { payload_index, outcome: DeliveryOutcome::Delivered, last_status, error: None, attempts }
    }

    /// Creates a failed result from its attempt log and reason.
    pub fn failed(
        payload_index: usize,
        attempts: Vec<AttemptRecord>,
        error: impl Into<String>,
    ) -> Self {
        let last_status = last_status(&attempts);
        Self {
            payload_index,
            outcome: DeliveryOutcome::Failed,
            last_status,
            error: Some(error.into()),
            attempts,
        }
    }

    /// Returns true if the payload was delivered.
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }

    /// Number of attempts made.
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Number of retries, i.e. attempts after the first.
    pub fn retries(&self) -> u32 {
        self.attempt_count().saturating_sub(1)
    }

    /// Number of attempts answered with a rate limit.
    pub fn rate_limited_count(&self) -> u32 {
        let count = self
            .attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::RateLimited { .. }))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Returns true if any attempt was rate limited and retried.
    pub fn was_rate_limited(&self) -> bool {
        self.rate_limited_count() > 0
    }
}

fn last_status(attempts: &[AttemptRecord]) -> Option<u16> {
    attempts.iter().rev().find_map(|a| a.status_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(number: u32, status: Option<u16>, outcome: AttemptOutcome) -> AttemptRecord {
        AttemptRecord { attempt_number: number, status_code: status, outcome, duration_ms: 5 }
    }

    #[test]
    fn endpoint_accepts_http_and_https() {
        assert!(Endpoint::parse("https://hooks.example.com/a/b").is_ok());
        assert!(Endpoint::parse("http://127.0.0.1:8080/hook").is_ok());
        assert!(Endpoint::parse("  https://padded.example.com  ").is_ok());
    }

    #[test]
    fn endpoint_rejects_malformed_input() {
        for input in ["", "   ", "not a url", "ftp://files.example.com", "mailto:ops@example.com"] {
            let result = Endpoint::parse(input);
            assert!(
                matches!(result, Err(CoreError::Validation { .. })),
                "expected validation error for {input:?}"
            );
        }
    }

    #[test]
    fn endpoint_masks_path_for_logging() {
        let endpoint = Endpoint::parse("https://hooks.example.com/api/webhooks/123/secret").unwrap();
        assert_eq!(endpoint.masked(), "https://hooks.example.com/***");

        let bare = Endpoint::parse("https://hooks.example.com").unwrap();
        assert_eq!(bare.masked(), "https://hooks.example.com");
    }

    #[test]
    fn endpoint_serde_validates() {
        let endpoint: Endpoint = serde_json::from_str("\"https://a.example.com/x\"").unwrap();
        assert_eq!(endpoint.as_str(), "https://a.example.com/x");

        let invalid: std::result::Result<Endpoint, _> = serde_json::from_str("\"gopher://x\"");
        assert!(invalid.is_err());
    }

    #[test]
    fn json_payload_sets_content_type() {
        let payload = Payload::json(&serde_json::json!({"content": "deploy finished"})).unwrap();
        assert_eq!(payload.content_type, "application/json");
        assert_eq!(payload.body.as_ref(), br#"{"content":"deploy finished"}"#);

        let text = Payload::text("hello").with_header("X-Trace", "abc");
        assert_eq!(text.len(), 5);
        assert_eq!(text.headers.get("X-Trace").map(String::as_str), Some("abc"));
    }

    #[test]
    fn result_counts_retries_and_rate_limits() {
        let result = DeliveryResult::delivered(0, vec![
            attempt(1, Some(429), AttemptOutcome::RateLimited { retry_after_ms: Some(2000) }),
            attempt(2, Some(500), AttemptOutcome::Rejected),
            attempt(3, Some(204), AttemptOutcome::Accepted),
        ]);

        assert!(result.is_delivered());
        assert_eq!(result.attempt_count(), 3);
        assert_eq!(result.retries(), 2);
        assert_eq!(result.rate_limited_count(), 1);
        assert!(result.was_rate_limited());
        assert_eq!(result.last_status, Some(204));
    }

    #[test]
    fn failed_result_keeps_last_known_status() {
        let result = DeliveryResult::failed(
            1,
            vec![
                attempt(1, Some(503), AttemptOutcome::Rejected),
                attempt(2, None, AttemptOutcome::Transport { message: "reset".into() }),
            ],
            "delivery failed after 2 attempts",
        );

        assert_eq!(result.outcome, DeliveryOutcome::Failed);
        assert_eq!(result.last_status, Some(503));
        assert_eq!(result.error.as_deref(), Some("delivery failed after 2 attempts"));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Masked endpoints never reveal path or query content.
            #[test]
            fn masked_hides_path_and_query(
                host in "[a-z]{1,12}\\.example\\.com",
                path in "[a-zA-Z0-9]{1,16}(/[a-zA-Z0-9_-]{1,16}){0,3}",
                query in proptest::option::of("[a-z]{1,8}=[a-z0-9]{1,8}"),
            ) {
                let raw = match &query {
                    Some(q) => format!("https://{host}/{path}?{q}"),
                    None => format!("https://{host}/{path}"),
                };
                let endpoint = Endpoint::parse(&raw).unwrap();
                let masked = endpoint.masked();

                prop_assert_eq!(masked, format!("https://{host}/***"));
            }

            /// Parsing the display form yields the same endpoint.
            #[test]
            fn display_reparses_to_same_endpoint(
                scheme in prop_oneof![Just("http"), Just("https")],
                host in "[a-z]{1,12}\\.example\\.org",
                port in proptest::option::of(1024u16..65535),
                path in "(/[a-z0-9]{1,10}){0,3}",
            ) {
                let raw = match port {
                    Some(port) => format!("{scheme}://{host}:{port}{path}"),
                    None => format!("{scheme}://{host}{path}"),
                };
                let endpoint = Endpoint::parse(&raw).unwrap();
                let reparsed = Endpoint::parse(&endpoint.to_string()).unwrap();

                prop_assert_eq!(endpoint, reparsed);
            }
        }
    }
}

//! Transport seam between the engine and the network.
//!
//! The engine only needs one operation: post a payload to an endpoint and
//! get back a status, headers, body and any retry-after guidance. The
//! production implementation is [`crate::client::HttpTransport`]; tests plug
//! in scripted transports.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use fanout_core::{Endpoint, JobId, Payload};

use crate::error::Result;

/// One outbound attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Job this attempt belongs to.
    pub job_id: JobId,
    /// Destination.
    pub endpoint: Endpoint,
    /// Position of the payload in the job.
    pub payload_index: usize,
    /// Attempt number for this payload on this endpoint (1-based).
    pub attempt_number: u32,
    /// Payload to send.
    pub payload: Arc<Payload>,
}

/// Response to one outbound attempt.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// Response body (size limited).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Server-supplied retry-after, if any was present and parseable.
    pub retry_after: Option<Duration>,
}

/// Sends delivery attempts.
///
/// Implementations return `Ok` for every received response regardless of
/// status; classification is the engine's job. `Err` is reserved for
/// failures where no response arrived.
pub trait Transport: Send + Sync + std::fmt::Debug + 'static {
    /// Posts the request's payload to its endpoint.
    fn post<'a>(
        &'a self,
        request: &'a DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn post<'a>(
        &'a self,
        request: &'a DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse>> + Send + 'a>> {
        (**self).post(request)
    }
}

/// Extracts retry-after guidance from a rate-limited response.
///
/// Sources, in order: the `Retry-After` header (seconds or HTTP-date), the
/// `X-RateLimit-Reset-After` header (seconds), and a JSON body field
/// `retry_after` (seconds). Header names must be lowercase. Fractional
/// seconds are accepted everywhere. HTTP-dates are measured from `now`.
pub fn extract_retry_after<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
    body: &[u8],
    now: SystemTime,
) -> Option<Duration> {
    if let Some(value) = headers.get("retry-after") {
        let now = DateTime::<Utc>::from(now);
        if let Some(delay) = parse_seconds(value).or_else(|| parse_http_date(value, now)) {
            return Some(delay);
        }
    }

    if let Some(delay) = headers.get("x-ratelimit-reset-after").and_then(|v| parse_seconds(v)) {
        return Some(delay);
    }

    retry_after_from_body(body)
}

fn parse_seconds(value: &str) -> Option<Duration> {
    let seconds = value.trim().parse::<f64>().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}

fn parse_http_date(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let at = DateTime::parse_from_rfc2822(value.trim()).ok()?.with_timezone(&Utc);
    Some(at.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO))
}

fn retry_after_from_body(body: &[u8]) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let seconds = value.get("retry_after")?.as_f64()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480)
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn retry_after_header_in_seconds() {
        let h = headers(&[("retry-after", "120")]);
        assert_eq!(extract_retry_after(&h, b"", now()), Some(Duration::from_secs(120)));

        let h = headers(&[("retry-after", "1.5")]);
        assert_eq!(extract_retry_after(&h, b"", now()), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn retry_after_http_date() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(
            parse_http_date("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_http_date("Wed, 21 Oct 2015 07:27:00 GMT", now), Some(Duration::ZERO));
        assert_eq!(parse_http_date("soon", now), None);
    }

    #[test]
    fn retry_after_http_date_measured_from_given_time() {
        // 1_445_412_480 is Wed, 21 Oct 2015 07:28:00 GMT.
        let h = headers(&[("retry-after", "Wed, 21 Oct 2015 07:29:30 GMT")]);
        assert_eq!(extract_retry_after(&h, b"", now()), Some(Duration::from_secs(90)));

        let later = now() + Duration::from_secs(60);
        assert_eq!(extract_retry_after(&h, b"", later), Some(Duration::from_secs(30)));
    }

    #[test]
    fn reset_after_header_used_when_retry_after_missing() {
        let h = headers(&[("x-ratelimit-reset-after", "0.25")]);
        assert_eq!(extract_retry_after(&h, b"", now()), Some(Duration::from_millis(250)));
    }

    #[test]
    fn retry_after_from_json_body() {
        let body = br#"{"message": "You are being rate limited.", "retry_after": 0.75, "global": false}"#;
        assert_eq!(extract_retry_after(&HashMap::new(), body, now()), Some(Duration::from_millis(750)));
    }

    #[test]
    fn header_takes_priority_over_body() {
        let h = headers(&[("retry-after", "3")]);
        let body = br#"{"retry_after": 10}"#;
        assert_eq!(extract_retry_after(&h, body, now()), Some(Duration::from_secs(3)));
    }

    #[test]
    fn unusable_values_yield_none() {
        let h = headers(&[("retry-after", "later"), ("x-ratelimit-reset-after", "-1")]);
        assert_eq!(extract_retry_after(&h, b"not json", now()), None);
        assert_eq!(extract_retry_after(&HashMap::new(), br#"{"retry_after": "soon"}"#, now()), None);
        assert_eq!(extract_retry_after(&HashMap::new(), b"", now()), None);
    }
}

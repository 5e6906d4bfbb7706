//! Endpoint and payload fixtures.

use bytes::Bytes;
use fanout_core::{Endpoint, Payload};
use serde_json::{json, Value};

/// Webhook URL on a named test host, e.g. `https://a.example.com/hook`.
pub fn endpoint_url(name: &str) -> String {
    format!("https://{name}.example.com/hook")
}

/// Parsed webhook endpoint on a named test host.
pub fn endpoint(name: &str) -> Endpoint {
    Endpoint::parse(&endpoint_url(name)).unwrap_or_else(|e| panic!("invalid test endpoint: {e}"))
}

/// Plain-text payloads, one per item.
pub fn text_payloads(items: &[&str]) -> Vec<Payload> {
    items.iter().map(|item| Payload::text(*item)).collect()
}

/// `count` JSON payloads carrying their own sequence number.
pub fn numbered_payloads(count: usize) -> Vec<Payload> {
    (0..count)
        .map(|seq| json_payload(&json!({"seq": seq, "content": format!("message {seq}")})))
        .collect()
}

/// JSON payload from a value.
pub fn json_payload(value: &Value) -> Payload {
    Payload::json(value).unwrap_or_else(|e| panic!("unserializable test payload: {e}"))
}

/// Builder for payloads with custom headers and content type.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    body: Bytes,
    content_type: String,
    headers: Vec<(String, String)>,
}

impl PayloadBuilder {
    /// Starts from a webhook chat message.
    pub fn new() -> Self {
        Self {
            body: Bytes::from(r#"{"content": "deploy finished"}"#),
            content_type: "application/json".to_string(),
            headers: Vec::new(),
        }
    }

    /// Replaces the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces the content type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builds the payload.
    pub fn build(self) -> Payload {
        self.headers
            .into_iter()
            .fold(Payload::new(self.body, self.content_type), |payload, (name, value)| {
                payload.with_header(name, value)
            })
    }
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

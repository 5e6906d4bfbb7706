//! Scripted transport for deterministic delivery tests.
//!
//! Responses are queued per endpoint and consumed in order; once a queue is
//! empty the transport falls back to a default response. Every call is
//! recorded with the clock instant it was made at.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use bytes::Bytes;
use fanout_core::{Clock, Endpoint};
use fanout_delivery::{DeliveryError, DeliveryRequest, Transport, TransportResponse};
use http::StatusCode;

/// Scripted reply to one delivery attempt.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Plain status response with an empty body.
    Status(StatusCode),
    /// HTTP 429 with an optional `Retry-After`.
    RateLimited {
        /// Wait requested by the endpoint
        retry_after: Option<Duration>,
    },
    /// Connection-level failure, no response received.
    NetworkError(String),
    /// Request timed out.
    Timeout,
    /// Waits on the transport clock, then replies with `response`.
    Delayed {
        /// Simulated latency
        delay: Duration,
        /// Reply after the delay
        response: Box<MockResponse>,
    },
    /// Panics inside the delivery task.
    Panic,
}

impl MockResponse {
    /// HTTP 204 No Content.
    pub fn no_content() -> Self {
        Self::Status(StatusCode::NO_CONTENT)
    }

    /// HTTP 200 OK.
    pub fn ok() -> Self {
        Self::Status(StatusCode::OK)
    }

    /// HTTP 500 Internal Server Error.
    pub fn server_error() -> Self {
        Self::Status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// HTTP 429 with `Retry-After` in seconds.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after: Some(retry_after) }
    }

    /// Wraps this response in simulated latency.
    #[must_use]
    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed { delay, response: Box::new(self) }
    }
}

/// One recorded delivery attempt.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Destination endpoint.
    pub endpoint: Endpoint,
    /// Payload position in the job.
    pub payload_index: usize,
    /// Attempt number for this payload on this endpoint.
    pub attempt_number: u32,
    /// Payload body sent.
    pub body: Bytes,
    /// Clock instant when the attempt started.
    pub at: Instant,
}

#[derive(Debug)]
struct Script {
    queues: HashMap<String, VecDeque<MockResponse>>,
    default: MockResponse,
    calls: Vec<RecordedCall>,
}

/// Transport that replays scripted responses per endpoint.
#[derive(Debug)]
pub struct ScriptedTransport {
    clock: Arc<dyn Clock>,
    script: Mutex<Script>,
}

impl ScriptedTransport {
    /// Creates a transport that answers 204 unless scripted otherwise.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            script: Mutex::new(Script {
                queues: HashMap::new(),
                default: MockResponse::no_content(),
                calls: Vec::new(),
            }),
        }
    }

    /// Queues responses for an endpoint, consumed one per attempt.
    pub fn script(&self, endpoint: &str, responses: impl IntoIterator<Item = MockResponse>) {
        let key = normalize(endpoint);
        self.lock().queues.entry(key).or_default().extend(responses);
    }

    /// Sets the response used once an endpoint's queue is empty.
    pub fn set_default(&self, response: MockResponse) {
        self.lock().default = response;
    }

    /// Every call made so far, in the order they were made.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls made to one endpoint.
    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        let key = normalize(endpoint);
        self.lock().calls.iter().filter(|call| call.endpoint.as_str() == key).cloned().collect()
    }

    /// Total number of calls made.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_response(&self, request: &DeliveryRequest) -> MockResponse {
        let mut script = self.lock();

        script.calls.push(RecordedCall {
            endpoint: request.endpoint.clone(),
            payload_index: request.payload_index,
            attempt_number: request.attempt_number,
            body: request.payload.body.clone(),
            at: self.clock.now(),
        });

        let default = script.default.clone();
        script
            .queues
            .get_mut(request.endpoint.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or(default)
    }

    async fn respond(
        &self,
        response: MockResponse,
    ) -> fanout_delivery::Result<TransportResponse> {
        let (duration, response) = unwrap_delays(response);
        if !duration.is_zero() {
            self.clock.sleep(duration).await;
        }

        match response {
            MockResponse::Status(status) => Ok(TransportResponse {
                status_code: status.as_u16(),
                headers: HashMap::new(),
                body: String::new(),
                duration,
                retry_after: None,
            }),
            MockResponse::RateLimited { retry_after } => {
                let mut headers = HashMap::new();
                if let Some(delay) = retry_after {
                    headers.insert("retry-after".to_string(), delay.as_secs_f64().to_string());
                }
                Ok(TransportResponse {
                    status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
                    headers,
                    body: r#"{"message": "You are being rate limited."}"#.to_string(),
                    duration,
                    retry_after,
                })
            },
            MockResponse::NetworkError(message) => Err(DeliveryError::transport(message)),
            MockResponse::Timeout => Err(DeliveryError::timeout(30)),
            MockResponse::Panic => panic!("scripted panic in transport"),
            MockResponse::Delayed { .. } => unreachable!("delays unwrapped above"),
        }
    }
}

impl Transport for ScriptedTransport {
    fn post<'a>(
        &'a self,
        request: &'a DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = fanout_delivery::Result<TransportResponse>> + Send + 'a>> {
        let response = self.next_response(request);
        Box::pin(self.respond(response))
    }
}

fn unwrap_delays(response: MockResponse) -> (Duration, MockResponse) {
    match response {
        MockResponse::Delayed { delay, response } => {
            let (inner_delay, inner) = unwrap_delays(*response);
            (delay + inner_delay, inner)
        },
        other => (Duration::ZERO, other),
    }
}

/// Scripts are keyed by the parsed URL so `https://host` and
/// `https://host/` refer to the same endpoint.
fn normalize(endpoint: &str) -> String {
    Endpoint::parse(endpoint).map_or_else(|_| endpoint.to_string(), |e| e.as_str().to_string())
}

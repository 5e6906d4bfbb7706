//! Per-endpoint delivery loop.
//!
//! Each endpoint runs its own attempt loop for the current payload:
//!
//! ```text
//! Pending ──▶ Attempting ──▶ Delivered
//!                 │   ▲
//!                 │   └── RateLimited / backoff (within attempt budget)
//!                 ▼
//!               Failed
//! ```
//!
//! The loop owns the endpoint's rate-limit state exclusively while it runs,
//! so one endpoint's waits never delay another.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use fanout_core::{
    AttemptOutcome, AttemptRecord, Clock, DeliveryResult, Endpoint, JobId, Payload,
};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::{
    engine::DeliveryOptions,
    error::{DeliveryError, ErrorCategory, Result},
    retry::{RetryContext, RetryDecision},
    transport::{DeliveryRequest, Transport, TransportResponse},
};

/// Rate-limit state of one endpoint.
///
/// Moved into the endpoint's task for each round and handed back when the
/// round completes.
#[derive(Debug, Clone)]
pub(crate) struct EndpointState {
    pub(crate) endpoint: Endpoint,
    /// No request may be sent to the endpoint before this instant.
    pub(crate) blocked_until: Option<Instant>,
}

impl EndpointState {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, blocked_until: None }
    }
}

/// Runs the attempt loop for one payload on one endpoint.
#[derive(Debug, Clone)]
pub(crate) struct EndpointWorker {
    pub(crate) job_id: JobId,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) options: Arc<DeliveryOptions>,
}

impl EndpointWorker {
    /// Delivers `payload` to the endpoint in `state`.
    ///
    /// Never fails: exhausted or terminal payloads come back as a `Failed`
    /// result.
    pub(crate) async fn deliver(
        &self,
        state: &mut EndpointState,
        payload_index: usize,
        payload: Arc<Payload>,
    ) -> DeliveryResult {
        let span = info_span!(
            "endpoint_delivery",
            job_id = %self.job_id,
            endpoint = %state.endpoint.masked(),
            payload_index
        );

        self.attempt_loop(state, payload_index, payload).instrument(span).await
    }

    async fn attempt_loop(
        &self,
        state: &mut EndpointState,
        payload_index: usize,
        payload: Arc<Payload>,
    ) -> DeliveryResult {
        let policy = &self.options.retry_policy;
        let mut attempts = Vec::new();
        let mut attempt_number = 1;

        loop {
            if let Some(until) = state.blocked_until.take() {
                self.clock.sleep_until(until).await;
            }

            let request = DeliveryRequest {
                job_id: self.job_id,
                endpoint: state.endpoint.clone(),
                payload_index,
                attempt_number,
                payload: Arc::clone(&payload),
            };

            debug!(attempt_number, "sending attempt");
            let started = self.clock.now();
            let sent = self.transport.post(&request).await;
            let elapsed = self.clock.now().saturating_duration_since(started);

            let error = match sent.and_then(|response| self.classify(response)) {
                Ok(response) => {
                    attempts.push(AttemptRecord {
                        attempt_number,
                        status_code: Some(response.status_code),
                        outcome: AttemptOutcome::Accepted,
                        duration_ms: millis(response.duration),
                    });
                    debug!(attempt_number, status = response.status_code, "payload delivered");
                    return DeliveryResult::delivered(payload_index, attempts);
                },
                Err(error) => error,
            };

            attempts.push(failed_attempt(attempt_number, &error, elapsed));

            match RetryContext::new(attempt_number, &error, policy).decide_retry() {
                RetryDecision::Retry { delay, mandated } => {
                    warn!(
                        attempt_number,
                        category = %ErrorCategory::from(&error),
                        delay_ms = millis(delay),
                        mandated,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    state.blocked_until = Some(block_deadline(self.clock.now(), delay));
                    attempt_number += 1;
                },
                RetryDecision::GiveUp { reason } => {
                    if let Some(retry_after) = error.retry_after() {
                        let delay = retry_after.saturating_add(policy.retry_after_padding);
                        state.blocked_until = Some(block_deadline(self.clock.now(), delay));
                    }
                    error!(
                        attempt_number,
                        category = %ErrorCategory::from(&error),
                        reason = %reason,
                        "giving up on payload"
                    );
                    return DeliveryResult::failed(payload_index, attempts, reason);
                },
            }
        }
    }

    /// Splits responses into accepted ones and retryable errors.
    fn classify(&self, response: TransportResponse) -> Result<TransportResponse> {
        if self.options.is_success(response.status_code) {
            Ok(response)
        } else if response.status_code == 429 {
            Err(DeliveryError::rate_limited(response.retry_after))
        } else {
            Err(DeliveryError::rejected(response.status_code, response.body))
        }
    }
}

/// Longest block an endpoint can be given.
const MAX_BLOCK: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn block_deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| now + MAX_BLOCK)
}

fn failed_attempt(
    attempt_number: u32,
    error: &DeliveryError,
    elapsed: Duration,
) -> AttemptRecord {
    let outcome = match error {
        DeliveryError::RateLimited { retry_after } => {
            AttemptOutcome::RateLimited { retry_after_ms: retry_after.map(millis) }
        },
        DeliveryError::Rejected { .. } => AttemptOutcome::Rejected,
        other => AttemptOutcome::Transport { message: other.to_string() },
    };

    AttemptRecord {
        attempt_number,
        status_code: error.status_code(),
        outcome,
        duration_ms: millis(elapsed),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//! Fan-out delivery engine.
//!
//! Delivers an ordered sequence of payloads to a set of endpoints. Payloads
//! go out in rounds: every endpoint gets payload N concurrently, the engine
//! waits for all of them, pauses for a random jitter and moves on to N+1.
//!
//! ```text
//!             round N                         round N+1
//!  ┌──────────────────────────────┐   ┌──────────────────────────────┐
//!  │ endpoint A: attempt ─ retry ─┤   │ endpoint A: attempt          │
//!  │ endpoint B: attempt ─────────┼─▶ │ endpoint B: attempt ─ retry  │ ─▶ ...
//!  │ endpoint C: 429 ─ wait ─ ok ─┤   │ endpoint C: attempt          │
//!  └──────────────────────────────┘   └──────────────────────────────┘
//!               join + jitter
//! ```
//!
//! Each endpoint task owns its rate-limit state for the duration of a round,
//! so a rate-limited or failing endpoint never holds up the others' retries.
//! A failing endpoint does still delay the next round, since rounds are
//! barriers.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use fanout_core::{Clock, DeliveryResult, Endpoint, JobId, Payload, RealClock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    client::{ClientConfig, HttpTransport},
    error::{DeliveryError, Result},
    report::DeliveryReport,
    retry::{random_between, RetryPolicy},
    transport::Transport,
    worker::{EndpointState, EndpointWorker},
};

/// Random pause inserted between payload rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterRange {
    /// Shortest pause.
    pub min: Duration,
    /// Longest pause.
    pub max: Duration,
}

impl JitterRange {
    /// Creates a range from bounds.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// A range that never pauses.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Picks a pause within the range.
    pub fn sample(&self) -> Duration {
        random_between(self.min, self.max)
    }
}

impl Default for JitterRange {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(crate::DEFAULT_JITTER_MIN_MS),
            Duration::from_millis(crate::DEFAULT_JITTER_MAX_MS),
        )
    }
}

/// Options for a fan-out engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOptions {
    /// Retry policy applied to every payload on every endpoint.
    ///
    /// `max_attempts` is the per-payload attempt budget.
    pub retry_policy: RetryPolicy,

    /// Pause between payload rounds.
    pub inter_payload_jitter: JitterRange,

    /// Statuses counted as accepted. Empty means any 2xx.
    pub success_statuses: Vec<u16>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            inter_payload_jitter: JitterRange::default(),
            success_statuses: Vec::new(),
        }
    }
}

impl DeliveryOptions {
    /// Returns true if `status` counts as accepted.
    pub fn is_success(&self, status: u16) -> bool {
        if self.success_statuses.is_empty() {
            (200..=299).contains(&status)
        } else {
            self.success_statuses.contains(&status)
        }
    }

    /// Validates option values.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` describing the first invalid
    /// value.
    pub fn validate(&self) -> Result<()> {
        let policy = &self.retry_policy;

        if policy.max_attempts == 0 {
            return Err(DeliveryError::configuration("max attempts per payload must be at least 1"));
        }

        if !(0.0..=1.0).contains(&policy.jitter_factor) {
            return Err(DeliveryError::configuration(format!(
                "backoff jitter factor must be between 0.0 and 1.0, got {}",
                policy.jitter_factor
            )));
        }

        if self.inter_payload_jitter.min > self.inter_payload_jitter.max {
            return Err(DeliveryError::configuration(format!(
                "inter-payload jitter minimum ({:?}) exceeds maximum ({:?})",
                self.inter_payload_jitter.min, self.inter_payload_jitter.max
            )));
        }

        if let Some(status) =
            self.success_statuses.iter().find(|s| !(100..=599).contains(*s) || **s == 429)
        {
            return Err(DeliveryError::configuration(format!(
                "status {status} cannot be configured as a success status"
            )));
        }

        Ok(())
    }
}

/// A validated set of endpoints and the payloads to send them.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    id: JobId,
    endpoints: Vec<Endpoint>,
    payloads: Vec<Payload>,
}

impl DeliveryJob {
    /// Builds a job from raw endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Validation` if any URL is malformed, the list
    /// is empty, or an endpoint appears twice.
    pub fn new<I, S>(endpoints: I, payloads: Vec<Payload>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|raw| Endpoint::parse(raw.as_ref()))
            .collect::<fanout_core::Result<Vec<_>>>()?;

        Self::from_endpoints(endpoints, payloads)
    }

    /// Builds a job from already parsed endpoints.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Validation` if the list is empty or an
    /// endpoint appears twice.
    pub fn from_endpoints(endpoints: Vec<Endpoint>, payloads: Vec<Payload>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(DeliveryError::validation("at least one endpoint is required"));
        }

        let mut seen = std::collections::BTreeSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint) {
                return Err(DeliveryError::validation(format!(
                    "duplicate endpoint {}",
                    endpoint.masked()
                )));
            }
        }

        Ok(Self { id: JobId::new(), endpoints, payloads })
    }

    /// Job identifier attached to every request.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Endpoints in input order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Payloads in delivery order.
    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }
}

/// Engine that fans payloads out to endpoints.
#[derive(Debug, Clone)]
pub struct FanoutEngine {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    options: Arc<DeliveryOptions>,
}

impl FanoutEngine {
    /// Creates an engine over the given transport and clock.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the options are invalid.
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        options: DeliveryOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self { transport, clock, options: Arc::new(options) })
    }

    /// Creates an engine that delivers over HTTP in real time.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the options are invalid or
    /// the HTTP client cannot be built.
    pub fn http(client_config: ClientConfig, options: DeliveryOptions) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        let transport = HttpTransport::with_clock(client_config, Arc::clone(&clock))?;
        Self::new(Arc::new(transport), clock, options)
    }

    /// Returns the engine options.
    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    /// Builds a validated job for this engine.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Validation` for malformed, duplicate or
    /// missing endpoints.
    pub fn job<I, S>(&self, endpoints: I, payloads: Vec<Payload>) -> Result<DeliveryJob>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DeliveryJob::new(endpoints, payloads)
    }

    /// Validates input and delivers every payload to every endpoint.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Validation` for bad endpoint input. No
    /// request is sent in that case.
    pub async fn deliver_to<I, S>(
        &self,
        endpoints: I,
        payloads: Vec<Payload>,
    ) -> Result<DeliveryReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let job = self.job(endpoints, payloads)?;
        Ok(self.deliver(job).await)
    }

    /// Delivers every payload of `job` to every endpoint.
    pub async fn deliver(&self, job: DeliveryJob) -> DeliveryReport {
        self.deliver_until_cancelled(job, CancellationToken::new()).await
    }

    /// Delivers `job` until finished or until `cancel` fires.
    ///
    /// Cancellation is observed between rounds and during the jitter pause;
    /// attempts of the round in progress always complete. A cancelled report
    /// holds results only for completed rounds.
    pub async fn deliver_until_cancelled(
        &self,
        job: DeliveryJob,
        cancel: CancellationToken,
    ) -> DeliveryReport {
        let DeliveryJob { id: job_id, endpoints, payloads } = job;
        let started_at = DateTime::<Utc>::from(self.clock.now_system());
        let payload_count = payloads.len();

        info!(
            job_id = %job_id,
            endpoints = endpoints.len(),
            payloads = payload_count,
            "starting fan-out delivery"
        );

        let worker = EndpointWorker {
            job_id,
            transport: Arc::clone(&self.transport),
            clock: Arc::clone(&self.clock),
            options: Arc::clone(&self.options),
        };

        let mut states: Vec<EndpointState> =
            endpoints.iter().cloned().map(EndpointState::new).collect();
        let mut results: Vec<Vec<DeliveryResult>> =
            endpoints.iter().map(|_| Vec::with_capacity(payload_count)).collect();
        let mut rounds_completed = 0;
        let mut cancelled = false;

        for (payload_index, payload) in payloads.into_iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            if payload_index > 0 {
                let pause = self.options.inter_payload_jitter.sample();
                if !pause.is_zero() {
                    debug!(job_id = %job_id, pause_ms = pause.as_millis(), "pausing between rounds");
                    tokio::select! {
                        () = self.clock.sleep(pause) => {},
                        () = cancel.cancelled() => {
                            cancelled = true;
                            break;
                        },
                    }
                }
            }

            states = run_round(&worker, &endpoints, states, payload_index, payload, &mut results)
                .await;
            rounds_completed += 1;
        }

        if cancelled {
            info!(job_id = %job_id, rounds_completed, "fan-out delivery cancelled");
        }

        let report = DeliveryReport {
            job_id,
            started_at,
            finished_at: DateTime::<Utc>::from(self.clock.now_system()),
            rounds_completed,
            cancelled,
            results: endpoints.into_iter().zip(results).collect::<BTreeMap<_, _>>(),
        };

        let summary = report.summary();
        info!(
            job_id = %job_id,
            delivered = summary.delivered,
            failed = summary.failed,
            retries = summary.retries,
            rate_limited = summary.rate_limited,
            "fan-out delivery finished"
        );

        report
    }
}

/// Sends one payload to every endpoint concurrently and waits for all.
///
/// Returns the endpoint states in the same order they were passed in.
async fn run_round(
    worker: &EndpointWorker,
    endpoints: &[Endpoint],
    states: Vec<EndpointState>,
    payload_index: usize,
    payload: Payload,
    results: &mut [Vec<DeliveryResult>],
) -> Vec<EndpointState> {
    let payload = Arc::new(payload);

    let handles: Vec<_> = states
        .into_iter()
        .map(|mut state| {
            let worker = worker.clone();
            let payload = Arc::clone(&payload);
            tokio::spawn(async move {
                let result = worker.deliver(&mut state, payload_index, payload).await;
                (state, result)
            })
        })
        .collect();

    let mut next_states = Vec::with_capacity(handles.len());
    for ((handle, endpoint), slot) in handles.into_iter().zip(endpoints).zip(results.iter_mut()) {
        match handle.await {
            Ok((state, result)) => {
                slot.push(result);
                next_states.push(state);
            },
            Err(join_error) => {
                error!(
                    endpoint = %endpoint.masked(),
                    payload_index,
                    error = %join_error,
                    "endpoint task aborted"
                );
                slot.push(DeliveryResult::failed(
                    payload_index,
                    Vec::new(),
                    format!("endpoint task aborted: {join_error}"),
                ));
                next_states.push(EndpointState::new(endpoint.clone()));
            },
        }
    }

    next_states
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_documented_values() {
        let options = DeliveryOptions::default();

        assert_eq!(options.retry_policy.max_attempts, 3);
        assert_eq!(options.retry_policy.base_delay, Duration::from_secs(1));
        assert_eq!(options.inter_payload_jitter.min, Duration::from_millis(100));
        assert_eq!(options.inter_payload_jitter.max, Duration::from_millis(500));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn success_classification() {
        let default = DeliveryOptions::default();
        assert!(default.is_success(200));
        assert!(default.is_success(204));
        assert!(!default.is_success(301));
        assert!(!default.is_success(429));

        let explicit = DeliveryOptions { success_statuses: vec![202], ..Default::default() };
        assert!(explicit.is_success(202));
        assert!(!explicit.is_success(200));
    }

    #[test]
    fn invalid_options_rejected() {
        let zero_attempts = DeliveryOptions {
            retry_policy: RetryPolicy { max_attempts: 0, ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(zero_attempts.validate(), Err(DeliveryError::Configuration { .. })));

        let inverted_jitter = DeliveryOptions {
            inter_payload_jitter: JitterRange::new(Duration::from_secs(2), Duration::from_secs(1)),
            ..Default::default()
        };
        assert!(inverted_jitter.validate().is_err());

        let bad_factor = DeliveryOptions {
            retry_policy: RetryPolicy { jitter_factor: 1.5, ..Default::default() },
            ..Default::default()
        };
        assert!(bad_factor.validate().is_err());

        let rate_limit_success = DeliveryOptions { success_statuses: vec![429], ..Default::default() };
        assert!(rate_limit_success.validate().is_err());
    }

    #[test]
    fn job_rejects_bad_endpoint_input() {
        let empty: Vec<&str> = Vec::new();
        assert!(matches!(
            DeliveryJob::new(empty, vec![Payload::text("x")]),
            Err(DeliveryError::Validation(_))
        ));

        assert!(matches!(
            DeliveryJob::new(["https://a.example.com/hook", "not a url"], vec![]),
            Err(DeliveryError::Validation(_))
        ));

        let duplicate = DeliveryJob::new(
            ["https://a.example.com/hook", "https://a.example.com/hook"],
            vec![Payload::text("x")],
        );
        match duplicate {
            Err(error) => assert!(error.to_string().contains("duplicate endpoint")),
            Ok(_) => unreachable!("duplicate endpoints must be rejected"),
        }
    }

    #[test]
    fn job_preserves_input_order() {
        let job = DeliveryJob::new(["https://b.example.com/", "https://a.example.com/"], vec![
            Payload::text("first"),
            Payload::text("second"),
        ])
        .unwrap();

        assert_eq!(job.endpoints()[0].host(), Some("b.example.com"));
        assert_eq!(job.payloads()[1].body.as_ref(), b"second");
    }
}

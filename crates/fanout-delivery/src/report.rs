//! Delivery report returned by the engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fanout_core::{DeliveryOutcome, DeliveryResult, Endpoint, JobId};
use serde::{Deserialize, Serialize};

/// Outcome of a fan-out job.
///
/// Maps every endpoint to one result per completed round, ordered by
/// payload index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Job identifier.
    pub job_id: JobId,
    /// Wall-clock time the job started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock time the job finished.
    pub finished_at: DateTime<Utc>,
    /// Number of payload rounds that ran to completion.
    pub rounds_completed: usize,
    /// Whether the job stopped early because it was cancelled.
    pub cancelled: bool,
    /// Per-endpoint results.
    pub results: BTreeMap<Endpoint, Vec<DeliveryResult>>,
}

/// Aggregate counts over a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Number of endpoints.
    pub endpoints: usize,
    /// Payloads delivered across all endpoints.
    pub delivered: usize,
    /// Payloads failed across all endpoints.
    pub failed: usize,
    /// Retries across all endpoints.
    pub retries: u64,
    /// Rate-limited attempts across all endpoints.
    pub rate_limited: u64,
}

impl DeliveryReport {
    /// Results for one endpoint, if it was part of the job.
    pub fn results_for(&self, endpoint: &Endpoint) -> Option<&[DeliveryResult]> {
        self.results.get(endpoint).map(Vec::as_slice)
    }

    /// Outcome sequence per endpoint.
    pub fn outcomes(&self) -> BTreeMap<&Endpoint, Vec<DeliveryOutcome>> {
        self.results
            .iter()
            .map(|(endpoint, results)| (endpoint, results.iter().map(|r| r.outcome).collect()))
            .collect()
    }

    /// Returns true if every recorded result was delivered.
    pub fn all_delivered(&self) -> bool {
        self.results.values().flatten().all(DeliveryResult::is_delivered)
    }

    /// Counts outcomes, retries and rate limits.
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary { endpoints: self.results.len(), ..Default::default() };

        for result in self.results.values().flatten() {
            if result.is_delivered() {
                summary.delivered += 1;
            } else {
                summary.failed += 1;
            }
            summary.retries += u64::from(result.retries());
            summary.rate_limited += u64::from(result.rate_limited_count());
        }

        summary
    }
}

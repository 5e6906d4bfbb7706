//! Rate-limited webhook fan-out delivery.
//!
//! Sends an ordered list of payloads to a set of webhook endpoints. Every
//! endpoint receives every payload in order; endpoints are served
//! concurrently and each one tracks its own rate limit, so a throttled or
//! failing endpoint never blocks retries on the others.
//!
//! # Architecture
//!
//! Delivery proceeds in rounds, one per payload:
//!
//! 1. **Fan out** - One task per endpoint attempts the current payload
//! 2. **Retry** - 429 responses wait for the server's retry-after, other
//!    failures back off exponentially, all within one attempt budget
//! 3. **Join** - The round ends when every endpoint has an outcome
//! 4. **Jitter** - A short random pause precedes the next round
//!
//! Cancellation is checked between rounds and during the jitter pause.
//!
//! # Example
//!
//! ```no_run
//! use fanout_core::Payload;
//! use fanout_delivery::{ClientConfig, DeliveryError, DeliveryOptions, FanoutEngine};
//!
//! # async fn example() -> std::result::Result<(), DeliveryError> {
//! let engine = FanoutEngine::http(ClientConfig::default(), DeliveryOptions::default())?;
//!
//! let report = engine
//!     .deliver_to(
//!         ["https://a.example.com/hook", "https://b.example.com/hook"],
//!         vec![Payload::text("x"), Payload::text("y")],
//!     )
//!     .await?;
//!
//! assert!(report.all_delivered());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod report;
pub mod retry;
pub mod transport;
mod worker;

pub use client::{ClientConfig, HttpTransport};
pub use engine::{DeliveryJob, DeliveryOptions, FanoutEngine, JitterRange};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use report::{DeliveryReport, ReportSummary};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use transport::{extract_retry_after, DeliveryRequest, Transport, TransportResponse};

/// Default attempt budget per payload, including the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default lower bound of the pause between payload rounds.
pub const DEFAULT_JITTER_MIN_MS: u64 = 100;

/// Default upper bound of the pause between payload rounds.
pub const DEFAULT_JITTER_MAX_MS: u64 = 500;

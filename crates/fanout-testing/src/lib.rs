//! Test infrastructure for fan-out delivery.
//!
//! Provides a scripted transport, a virtual clock environment and fixture
//! builders so engine behaviour can be asserted without network access or
//! real sleeps.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use fanout_core::{Clock, TestClock};
use fanout_delivery::{DeliveryOptions, FanoutEngine, JitterRange, Result, RetryPolicy};

pub mod fixtures;
pub mod transport;

pub use fixtures::{
    endpoint, endpoint_url, json_payload, numbered_payloads, text_payloads, PayloadBuilder,
};
pub use transport::{MockResponse, RecordedCall, ScriptedTransport};

/// Engine test environment on virtual time.
///
/// The transport and clock are shared with every engine built from the
/// environment, so tests can script responses up front and inspect calls and
/// sleeps afterwards.
#[derive(Debug, Clone)]
pub struct TestEnv {
    /// Virtual clock driving every sleep
    pub clock: TestClock,
    /// Scripted transport recording every attempt
    pub transport: Arc<ScriptedTransport>,
}

impl TestEnv {
    /// Creates an environment whose transport answers 204 by default.
    pub fn new() -> Self {
        let clock = TestClock::new();
        let transport = Arc::new(ScriptedTransport::new(Arc::new(clock.clone())));
        Self { clock, transport }
    }

    /// Builds an engine over this environment's transport and clock.
    pub fn engine(&self, options: DeliveryOptions) -> Result<FanoutEngine> {
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());
        FanoutEngine::new(self.transport.clone(), clock, options)
    }

    /// Builds an engine with default options.
    pub fn default_engine(&self) -> Result<FanoutEngine> {
        self.engine(DeliveryOptions::default())
    }

    /// Virtual time elapsed since the environment was created.
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Options with no inter-payload pause and a fixed one-second backoff.
///
/// Keeps recorded sleeps down to retry waits only.
pub fn deterministic_options(max_attempts: u32) -> DeliveryOptions {
    DeliveryOptions {
        retry_policy: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            backoff_strategy: fanout_delivery::BackoffStrategy::Fixed,
            ..RetryPolicy::default()
        },
        inter_payload_jitter: JitterRange::none(),
        ..DeliveryOptions::default()
    }
}

//! Configuration for the fanout binary.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use fanout_delivery::{BackoffStrategy, ClientConfig, DeliveryOptions, JitterRange, RetryPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "fanout.toml";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "FANOUT_";

/// Delivery configuration with defaults, file and environment overrides.
///
/// Sources in priority order:
/// 1. `FANOUT_`-prefixed environment variables (e.g. `FANOUT_MAX_ATTEMPTS`)
/// 2. The configuration file (`fanout.toml` unless overridden)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Retry
    /// Attempts per payload per endpoint, including the first.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Longest single backoff sleep in milliseconds.
    pub backoff_max_ms: u64,
    /// How backoff grows between attempts.
    pub backoff_strategy: BackoffStrategy,
    /// Randomisation applied to backoff sleeps (0.0 to 1.0).
    pub backoff_jitter_factor: f64,
    /// Added to every server-supplied retry-after, in milliseconds.
    pub retry_after_padding_ms: u64,
    /// Largest retry-after honoured, in milliseconds. Unset honours any value.
    pub max_retry_after_ms: Option<u64>,

    // Pacing
    /// Shortest pause between payloads in milliseconds.
    pub jitter_min_ms: u64,
    /// Longest pause between payloads in milliseconds.
    pub jitter_max_ms: u64,

    /// Status codes counted as delivered. Empty means any 2xx.
    pub success_statuses: Vec<u16>,

    // Client
    /// HTTP request timeout in seconds.
    pub request_timeout_seconds: u64,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Redirects followed per request.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let jitter = JitterRange::default();
        let client = ClientConfig::default();

        Self {
            max_attempts: retry.max_attempts,
            backoff_base_ms: millis(retry.base_delay),
            backoff_max_ms: millis(retry.max_delay),
            backoff_strategy: retry.backoff_strategy,
            backoff_jitter_factor: retry.jitter_factor,
            retry_after_padding_ms: millis(retry.retry_after_padding),
            max_retry_after_ms: retry.max_retry_after.map(millis),
            jitter_min_ms: millis(jitter.min),
            jitter_max_ms: millis(jitter.max),
            success_statuses: Vec::new(),
            request_timeout_seconds: client.timeout.as_secs(),
            user_agent: client.user_agent,
            max_redirects: client.max_redirects,
            verify_tls: client.verify_tls,
            log_filter: "info,fanout=debug".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, `path` and the environment.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = Self::figment(path)
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.backoff_base_ms > self.backoff_max_ms {
            anyhow::bail!("backoff_base_ms cannot exceed backoff_max_ms");
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter_factor) {
            anyhow::bail!("backoff_jitter_factor must be between 0.0 and 1.0");
        }

        if self.jitter_min_ms > self.jitter_max_ms {
            anyhow::bail!("jitter_min_ms cannot exceed jitter_max_ms");
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        // Catches bad success statuses with the library's own message.
        self.to_delivery_options().validate().context("invalid delivery options")?;

        Ok(())
    }

    /// Converts to engine options.
    pub fn to_delivery_options(&self) -> DeliveryOptions {
        DeliveryOptions {
            retry_policy: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
                jitter_factor: self.backoff_jitter_factor,
                backoff_strategy: self.backoff_strategy,
                retry_after_padding: Duration::from_millis(self.retry_after_padding_ms),
                max_retry_after: self.max_retry_after_ms.map(Duration::from_millis),
            },
            inter_payload_jitter: JitterRange::new(
                Duration::from_millis(self.jitter_min_ms),
                Duration::from_millis(self.jitter_max_ms),
            ),
            success_statuses: self.success_statuses.clone(),
        }
    }

    /// Converts to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.request_timeout_seconds),
            user_agent: self.user_agent.clone(),
            max_redirects: self.max_redirects,
            verify_tls: self.verify_tls,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

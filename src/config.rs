//! Engine configuration read from the environment

use crate::reconcile::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Configuration for the HTTP transport, submission retries and expiry ticks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Base URL every endpoint path is appended to
    pub api_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Total submission attempts, including the first one
    pub submit_max_attempts: u32,
    pub submit_base_delay: Duration,
    pub submit_max_delay: Duration,
    /// How often a running session checks its deadline
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            submit_max_attempts: 4,
            submit_base_delay: Duration::from_millis(500),
            submit_max_delay: Duration::from_millis(8_000),
            tick_interval: Duration::from_millis(250),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            api_url: lookup("STUDY_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.api_url),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STUDY_HTTP_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            connect_timeout: Duration::from_secs(parse_or(
                &lookup,
                "STUDY_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )),
            submit_max_attempts: parse_or(
                &lookup,
                "STUDY_SUBMIT_MAX_ATTEMPTS",
                defaults.submit_max_attempts,
            )
            .max(1),
            submit_base_delay: Duration::from_millis(parse_or(
                &lookup,
                "STUDY_SUBMIT_BASE_DELAY_MS",
                duration_millis(defaults.submit_base_delay),
            )),
            submit_max_delay: Duration::from_millis(parse_or(
                &lookup,
                "STUDY_SUBMIT_MAX_DELAY_MS",
                duration_millis(defaults.submit_max_delay),
            )),
            tick_interval: Duration::from_millis(
                parse_or(
                    &lookup,
                    "STUDY_TICK_MS",
                    duration_millis(defaults.tick_interval),
                )
                .max(1),
            ),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.submit_max_attempts,
            base_delay: self.submit_base_delay,
            max_delay: self.submit_max_delay,
            jitter: 0.0,
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Ignoring malformed setting");
            default
        }),
    }
}

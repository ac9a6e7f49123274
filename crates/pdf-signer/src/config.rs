use std::time::Duration;

use url::Url;

pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024; // 10 MiB
pub const DEFAULT_TSA_URL: &str = "http://freetsa.org/tsr";

/// Bounded exponential backoff applied to signing attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Ceiling applied after each doubling.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
        }
    }

    /// Delay that follows `current`: doubled, then capped at the ceiling.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2), Duration::from_secs(30))
    }
}

/// Runtime configuration shared by every request.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub max_content_length: usize,
    pub tsa_url: Url,
    pub retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            tsa_url: Url::parse(DEFAULT_TSA_URL).expect("default TSA URL is valid"),
            retry: RetryPolicy::default(),
        }
    }
}

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.zaius.com/v3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total attempts per remote call, including the first one.
pub const MAX_RETRIES: u32 = 3;
/// Base of the linear backoff, multiplied by the attempt number.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// What a profile lookup does when the remote cannot give a definite answer.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadFailurePolicy {
    /// Treat the profile as not found and carry on. Keeps pipelines moving at
    /// the cost of possibly re-creating a profile while the remote is flaky.
    #[default]
    FailOpen,
    /// Surface the failure to the caller. 404 is still "not found".
    FailClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: MAX_RETRIES,
            delay: RETRY_DELAY,
        }
    }
}

/// Configuration for creating a [`crate::CdpClient`]
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub read_failure_policy: ReadFailurePolicy,
}

impl ClientConfig {
    pub fn new<U, K>(base_url: U, api_key: K) -> Self
    where
        U: Into<String>,
        K: Into<String>,
    {
        ClientConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            read_failure_policy: ReadFailurePolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_read_failure_policy(mut self, policy: ReadFailurePolicy) -> Self {
        self.read_failure_policy = policy;
        self
    }
}

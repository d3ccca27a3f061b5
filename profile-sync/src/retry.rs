use crate::config::RetryPolicy;
use crate::errors::Operation;
use crate::metrics_defs::HTTP_RETRIES;
use reqwest::StatusCode;
use shared::counter;
use std::fmt::Display;
use tokio::time::sleep;

/// Status and body of a completed HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        RawResponse {
            status,
            body: body.into(),
        }
    }

    /// The CDP acknowledges writes with either 200 or 202.
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, StatusCode::OK | StatusCode::ACCEPTED)
    }
}

/// Errors the retry loop may try again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Body and decode errors only come from reading the response body here, so a
/// connection dropped mid-body is retried like one dropped before the headers.
impl Transient for reqwest::Error {
    fn is_transient(&self) -> bool {
        self.is_timeout()
            || self.is_connect()
            || self.is_request()
            || self.is_body()
            || self.is_decode()
    }
}

/// Runs `call` up to `policy.max_attempts` times.
///
/// - Transient transport errors are retried; the last one is returned once attempts run out.
/// - 5xx responses are retried; the last response is returned once attempts run out.
/// - Every other response, including 4xx, is returned as is.
///
/// Between attempts the loop sleeps `policy.delay * attempt`.
pub async fn send_with_retry<F, Fut, E>(
    policy: &RetryPolicy,
    operation: Operation,
    mut call: F,
) -> Result<RawResponse, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RawResponse, E>>,
    E: Transient + Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(response) if response.status.is_server_error() && attempt < attempts => {
                tracing::warn!(
                    %operation,
                    attempt,
                    status = %response.status,
                    "server error from CDP, retrying"
                );
            }
            Ok(response) => {
                tracing::debug!(%operation, attempt, status = %response.status, "CDP response");
                return Ok(response);
            }
            Err(err) if err.is_transient() && attempt < attempts => {
                tracing::warn!(%operation, attempt, error = %err, "CDP request failed, retrying");
            }
            Err(err) => return Err(err),
        }

        counter!(HTTP_RETRIES, "operation" => operation.as_str()).increment(1);
        sleep(policy.backoff(attempt)).await;
        attempt += 1;
    }
}

use crate::config::{ClientConfig, ReadFailurePolicy, RetryPolicy};
use crate::errors::{Operation, SyncError, truncate_body};
use crate::events::Event;
use crate::metrics_defs::PROFILE_LOOKUP_FAILED_OPEN;
use crate::retry::{RawResponse, send_with_retry};
use crate::types::{Attributes, RemoteProfile};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use shared::counter;
use url::Url;

const API_KEY_HEADER: &str = "x-api-key";

/// HTTP client for the CDP profiles and events endpoints.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct CdpClient {
    http: reqwest::Client,
    profiles_url: Url,
    events_url: Url,
    retry: RetryPolicy,
    read_failure_policy: ReadFailurePolicy,
}

impl CdpClient {
    pub fn new(config: ClientConfig) -> Result<Self, SyncError> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Err(SyncError::MissingCredential);
        }

        let base = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        let profiles_url = base
            .join("profiles")
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        let events_url = base
            .join("events")
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;

        let mut key = HeaderValue::from_str(api_key).map_err(|_| SyncError::InvalidCredential)?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(SyncError::Client)?;

        Ok(CdpClient {
            http,
            profiles_url,
            events_url,
            retry: config.retry,
            read_failure_policy: config.read_failure_policy,
        })
    }

    /// Looks a profile up by email.
    ///
    /// Returns `Ok(None)` when the profile does not exist. Under the fail-open
    /// policy every failed lookup (other 4xx, persistent 5xx, transport errors,
    /// unparseable bodies) also returns `Ok(None)`.
    pub async fn get_profile(&self, email: &str) -> Result<Option<RemoteProfile>, SyncError> {
        if email.trim().is_empty() {
            return Err(SyncError::EmptyEmail);
        }

        let http = &self.http;
        let url = &self.profiles_url;
        let result = send_with_retry(&self.retry, Operation::ProfileLookup, || async move {
            let response = http.get(url.clone()).query(&[("email", email)]).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(RawResponse::new(status, body))
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => return self.read_failure(email, format!("transport error: {err}")),
        };

        match response.status {
            StatusCode::OK | StatusCode::ACCEPTED => {
                match RemoteProfile::from_body(email, &response.body) {
                    Ok(profile) => Ok(Some(profile)),
                    Err(err) => self.read_failure(email, format!("unparseable profile: {err}")),
                }
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => self.read_failure(
                email,
                format!("status {status}: {}", truncate_body(&response.body)),
            ),
        }
    }

    fn read_failure(
        &self,
        email: &str,
        reason: String,
    ) -> Result<Option<RemoteProfile>, SyncError> {
        match self.read_failure_policy {
            ReadFailurePolicy::FailOpen => {
                tracing::warn!(email, %reason, "profile lookup failed, treating profile as new");
                counter!(PROFILE_LOOKUP_FAILED_OPEN).increment(1);
                Ok(None)
            }
            ReadFailurePolicy::FailClosed => Err(SyncError::LookupFailed {
                email: email.to_string(),
                reason,
            }),
        }
    }

    /// Posts a `customer_update` event for the profile, subscribing it to
    /// `list_id` when one is given. A persistent 5xx comes back as the last
    /// response; only exhausted transport retries are errors.
    pub async fn post_profile(
        &self,
        email: &str,
        attributes: &Attributes,
        list_id: Option<&str>,
    ) -> Result<RawResponse, SyncError> {
        if email.trim().is_empty() {
            return Err(SyncError::EmptyEmail);
        }

        let event = Event::customer_update(email, attributes, list_id);
        self.post_events(&event, Operation::ProfileUpdate)
            .await
            .map_err(|source| SyncError::Transport {
                target: email.to_string(),
                operation: Operation::ProfileUpdate,
                source,
            })
    }

    /// Posts several events in one request.
    pub async fn post_events_batch(&self, events: &[Event]) -> Result<RawResponse, SyncError> {
        self.post_events(events, Operation::EventBatch)
            .await
            .map_err(|source| SyncError::Transport {
                target: format!("{} events", events.len()),
                operation: Operation::EventBatch,
                source,
            })
    }

    async fn post_events<T>(
        &self,
        payload: &T,
        operation: Operation,
    ) -> Result<RawResponse, reqwest::Error>
    where
        T: Serialize + ?Sized,
    {
        let http = &self.http;
        let url = &self.events_url;
        send_with_retry(&self.retry, operation, || async move {
            let response = http.post(url.clone()).json(payload).send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(RawResponse::new(status, body))
        })
        .await
    }
}

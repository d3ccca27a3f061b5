use crate::client::CdpClient;
use crate::errors::{Operation, SyncError, truncate_body};
use crate::evaluator::{SubscriptionStatus, evaluate};
use crate::metrics_defs::{UPSERT_DURATION, UPSERT_FAILED, UPSERT_OUTCOME};
use crate::retry::RawResponse;
use crate::types::{Attributes, RemoteProfile, UpsertAction, UpsertOutcome, UpsertRequest};
use async_trait::async_trait;
use shared::{counter, histogram};
use std::time::Instant;

/// Read and write primitives the orchestrator is built on.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn get_profile(&self, email: &str) -> Result<Option<RemoteProfile>, SyncError>;

    async fn post_profile(
        &self,
        email: &str,
        attributes: &Attributes,
        list_id: Option<&str>,
    ) -> Result<RawResponse, SyncError>;
}

#[async_trait]
impl ProfileApi for CdpClient {
    async fn get_profile(&self, email: &str) -> Result<Option<RemoteProfile>, SyncError> {
        CdpClient::get_profile(self, email).await
    }

    async fn post_profile(
        &self,
        email: &str,
        attributes: &Attributes,
        list_id: Option<&str>,
    ) -> Result<RawResponse, SyncError> {
        CdpClient::post_profile(self, email, attributes, list_id).await
    }
}

/// What to write for a given remote state, and what the caller is told.
#[derive(Debug, PartialEq, Eq)]
struct Plan {
    action: UpsertAction,
    send_subscribe: bool,
    subscribed: bool,
    branch: &'static str,
    message: &'static str,
}

impl Plan {
    fn for_state(state: Option<SubscriptionStatus>) -> Plan {
        match state {
            None => Plan {
                action: UpsertAction::Created,
                send_subscribe: true,
                subscribed: true,
                branch: "not_found",
                message: "new profile, subscribed to list",
            },
            Some(SubscriptionStatus::Suppressed) => Plan {
                action: UpsertAction::Updated,
                send_subscribe: false,
                subscribed: false,
                branch: SubscriptionStatus::Suppressed.as_str(),
                message: "profile is globally suppressed, attributes updated without subscribing",
            },
            Some(SubscriptionStatus::ExplicitlyUnsubscribed) => Plan {
                action: UpsertAction::Updated,
                send_subscribe: false,
                subscribed: false,
                branch: SubscriptionStatus::ExplicitlyUnsubscribed.as_str(),
                message: "profile unsubscribed from list, opt-out respected",
            },
            Some(SubscriptionStatus::AlreadySubscribed) => Plan {
                action: UpsertAction::Updated,
                send_subscribe: false,
                subscribed: true,
                branch: SubscriptionStatus::AlreadySubscribed.as_str(),
                message: "profile already subscribed, attributes updated",
            },
            Some(SubscriptionStatus::MissingOrPending) => Plan {
                action: UpsertAction::Updated,
                send_subscribe: true,
                subscribed: true,
                branch: SubscriptionStatus::MissingOrPending.as_str(),
                message: "subscription missing or pending, subscribed to list",
            },
        }
    }
}

/// Idempotent create-or-update of a profile with its list subscription.
#[derive(Clone)]
pub struct ProfileSync<A = CdpClient> {
    api: A,
}

impl<A: ProfileApi> ProfileSync<A> {
    pub fn new(api: A) -> Self {
        ProfileSync { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Performs at most one lookup and one write.
    ///
    /// A profile that is suppressed or has opted out of the list never gets a
    /// subscribe instruction, and an already subscribed profile does not get a
    /// redundant one. Any write answered with something other than 200/202 is
    /// returned as [`SyncError::Rejected`].
    #[tracing::instrument(skip_all, fields(email = %request.email, list_id = %request.list_id))]
    pub async fn upsert_profile_with_subscription(
        &self,
        request: &UpsertRequest,
    ) -> Result<UpsertOutcome, SyncError> {
        if request.email.trim().is_empty() {
            return Err(SyncError::EmptyEmail);
        }
        if request.list_id.trim().is_empty() {
            return Err(SyncError::EmptyListId);
        }

        let started = Instant::now();
        let existing = self.api.get_profile(&request.email).await?;
        let plan = Plan::for_state(existing.as_ref().map(|p| evaluate(p, &request.list_id)));

        let list_id = plan.send_subscribe.then_some(request.list_id.as_str());
        let response = match self
            .api
            .post_profile(&request.email, &request.attributes, list_id)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                counter!(UPSERT_FAILED).increment(1);
                return Err(err);
            }
        };

        if !response.is_accepted() {
            counter!(UPSERT_FAILED).increment(1);
            return Err(SyncError::Rejected {
                target: request.email.clone(),
                operation: Operation::ProfileUpdate,
                status: response.status.as_u16(),
                body: truncate_body(&response.body),
            });
        }

        counter!(UPSERT_OUTCOME, "branch" => plan.branch).increment(1);
        histogram!(UPSERT_DURATION).record(started.elapsed().as_secs_f64());
        tracing::debug!(branch = plan.branch, action = %plan.action, "profile upserted");

        Ok(UpsertOutcome {
            action: plan.action,
            subscribed: plan.subscribed,
            message: plan.message.to_string(),
        })
    }
}

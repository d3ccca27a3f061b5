use crate::types::{RemoteProfile, SubscriptionFlag};
use std::fmt;

/// Subscription state of an existing profile with respect to one list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Globally suppressed or unsubscribed. Wins over any list entry.
    Suppressed,
    /// Opted out of this list. Never re-subscribed.
    ExplicitlyUnsubscribed,
    AlreadySubscribed,
    /// No entry for the list, or one without a definite value.
    MissingOrPending,
}

impl SubscriptionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Suppressed => "suppressed",
            SubscriptionStatus::ExplicitlyUnsubscribed => "explicitly_unsubscribed",
            SubscriptionStatus::AlreadySubscribed => "already_subscribed",
            SubscriptionStatus::MissingOrPending => "missing_or_pending",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a profile's subscription to `list_id`. The first matching rule wins:
/// global suppression, then an explicit opt-out, then an active subscription.
pub fn evaluate(profile: &RemoteProfile, list_id: &str) -> SubscriptionStatus {
    if profile.suppressed || profile.unsubscribed_global {
        return SubscriptionStatus::Suppressed;
    }

    match profile.subscription(list_id).map(|s| s.subscribed) {
        Some(SubscriptionFlag::Unsubscribed) => SubscriptionStatus::ExplicitlyUnsubscribed,
        Some(SubscriptionFlag::Subscribed) => SubscriptionStatus::AlreadySubscribed,
        Some(SubscriptionFlag::Unknown) | None => SubscriptionStatus::MissingOrPending,
    }
}

//! Profile synchronization against a customer-data platform (CDP).
//!
//! The entry point for connectors is [`ProfileSync::upsert_profile_with_subscription`],
//! which looks a profile up by email, decides whether the target mailing list
//! subscription should be asserted, and writes the profile in a single call.
//! A profile is never unsubscribed by this crate.

pub mod client;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod events;
pub mod metrics_defs;
pub mod processed;
pub mod retry;
pub mod types;
pub mod upsert;

pub use client::CdpClient;
pub use config::{ClientConfig, ReadFailurePolicy, RetryPolicy};
pub use errors::{Operation, SyncError};
pub use evaluator::{SubscriptionStatus, evaluate};
pub use events::Event;
pub use processed::{ProcessedStore, StoreError};
pub use retry::RawResponse;
pub use types::{
    Attributes, ListSubscription, RemoteProfile, SubscriptionFlag, UpsertAction, UpsertOutcome,
    UpsertRequest,
};
pub use upsert::{ProfileApi, ProfileSync};

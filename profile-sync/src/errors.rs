use std::fmt;
use thiserror::Error;

/// Response bodies attached to errors are cut to this many characters.
pub const MAX_BODY_CHARS: usize = 200;

/// The remote call an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ProfileLookup,
    ProfileUpdate,
    EventBatch,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::ProfileLookup => "profile_lookup",
            Operation::ProfileUpdate => "profile_update",
            Operation::EventBatch => "event_batch",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while talking to the customer-data platform
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("missing CDP API credential")]
    MissingCredential,

    #[error("CDP API credential is not a valid header value")]
    InvalidCredential,

    #[error("email must not be empty")]
    EmptyEmail,

    #[error("list id must not be empty")]
    EmptyListId,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Transport failure that persisted through every retry.
    #[error("{operation} for {target} failed: {source}")]
    Transport {
        target: String,
        operation: Operation,
        #[source]
        source: reqwest::Error,
    },

    /// The remote answered with something other than 200/202.
    #[error("{operation} for {target} rejected with status {status}: {body}")]
    Rejected {
        target: String,
        operation: Operation,
        status: u16,
        body: String,
    },

    /// Only returned when reads fail closed.
    #[error("profile lookup for {email} failed: {reason}")]
    LookupFailed { email: String, reason: String },
}

/// Truncates a response body for logs and error messages, respecting char boundaries.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Flat profile attributes, already stringified by the caller.
pub type Attributes = BTreeMap<String, String>;

/// Whether a profile is on a list, as reported by the CDP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionFlag {
    Subscribed,
    Unsubscribed,
    /// The entry exists but carries no usable `subscribed` value.
    Unknown,
}

impl From<Option<&Value>> for SubscriptionFlag {
    fn from(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => SubscriptionFlag::Subscribed,
            Some(Value::Bool(false)) => SubscriptionFlag::Unsubscribed,
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => {
                SubscriptionFlag::Subscribed
            }
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => {
                SubscriptionFlag::Unsubscribed
            }
            _ => SubscriptionFlag::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListSubscription {
    pub list_id: String,
    pub subscribed: SubscriptionFlag,
    pub status: Option<String>,
}

/// Snapshot of a profile fetched from the CDP. Built fresh on every lookup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteProfile {
    pub email: String,
    pub suppressed: bool,
    pub unsubscribed_global: bool,
    pub subscriptions: Vec<ListSubscription>,
    pub attributes: Map<String, Value>,
}

impl RemoteProfile {
    /// First subscription entry for the given list, if any.
    pub fn subscription(&self, list_id: &str) -> Option<&ListSubscription> {
        self.subscriptions.iter().find(|s| s.list_id == list_id)
    }

    /// Parses a lookup response body. The CDP may nest the profile under an
    /// `attributes` object; fields at the top level take precedence.
    ///
    /// Only a body that is not a JSON object is an error. Malformed
    /// subscription entries are dropped one by one, and a suppression flag
    /// that is present but not readable as a boolean counts as set.
    pub fn from_body(email: &str, body: &str) -> Result<Self, serde_json::Error> {
        let mut outer: Map<String, Value> = serde_json::from_str(body)?;

        let mut inner = match outer.remove("attributes") {
            Some(Value::Object(nested)) => nested,
            Some(other) => {
                outer.insert("attributes".into(), other);
                Map::new()
            }
            None => Map::new(),
        };

        let suppressed = take_field(&mut outer, &mut inner, "suppressed");
        let unsubscribed = take_field(&mut outer, &mut inner, "unsubscribed");
        let subscriptions = take_field(&mut outer, &mut inner, "subscriptions");

        let mut attributes = inner;
        attributes.extend(outer);

        Ok(RemoteProfile {
            email: email.to_string(),
            suppressed: flag_is_set("suppressed", suppressed),
            unsubscribed_global: flag_is_set("unsubscribed", unsubscribed),
            subscriptions: parse_subscriptions(subscriptions),
            attributes,
        })
    }
}

/// Removes `key` from both levels, preferring the top-level value. Nulls count as absent.
fn take_field(
    outer: &mut Map<String, Value>,
    inner: &mut Map<String, Value>,
    key: &str,
) -> Option<Value> {
    let top = outer.remove(key).filter(|v| !v.is_null());
    let nested = inner.remove(key).filter(|v| !v.is_null());
    top.or(nested)
}

fn flag_is_set(field: &str, value: Option<Value>) -> bool {
    match value {
        None => false,
        Some(Value::Bool(set)) => set,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => false,
        Some(Value::Number(n)) if n.as_u64() == Some(0) => false,
        Some(other) => {
            tracing::warn!(field, value = %other, "unreadable profile flag, treating as set");
            true
        }
    }
}

fn parse_subscriptions(value: Option<Value>) -> Vec<ListSubscription> {
    match value {
        None => Vec::new(),
        Some(Value::Array(entries)) => entries.into_iter().filter_map(parse_subscription).collect(),
        Some(other) => {
            tracing::warn!(value = %other, "ignoring subscriptions that are not a list");
            Vec::new()
        }
    }
}

fn parse_subscription(entry: Value) -> Option<ListSubscription> {
    let mut entry = match entry {
        Value::Object(entry) => entry,
        other => {
            tracing::debug!(entry = %other, "skipping subscription entry that is not an object");
            return None;
        }
    };

    let list_id = match entry.remove("list_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            tracing::debug!("skipping subscription entry without a list id");
            return None;
        }
    };
    let status = match entry.remove("status") {
        None | Some(Value::Null) => None,
        Some(Value::String(status)) => Some(status),
        Some(other) => Some(other.to_string()),
    };

    Some(ListSubscription {
        subscribed: SubscriptionFlag::from(entry.get("subscribed")),
        list_id,
        status,
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpsertRequest {
    pub email: String,
    pub attributes: Attributes,
    pub list_id: String,
}

impl UpsertRequest {
    pub fn new<E, L>(email: E, attributes: Attributes, list_id: L) -> Self
    where
        E: Into<String>,
        L: Into<String>,
    {
        UpsertRequest {
            email: email.into(),
            attributes,
            list_id: list_id.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertAction::Created => f.write_str("created"),
            UpsertAction::Updated => f.write_str("updated"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    /// Whether the profile is on the list after this call.
    pub subscribed: bool,
    pub message: String,
}

/// Trims and lowercases an email. Returns `None` for values that cannot be an address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return None;
    }
    Some(email)
}

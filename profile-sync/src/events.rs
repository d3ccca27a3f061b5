use crate::types::Attributes;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

/// Event type that updates profile attributes.
pub const CUSTOMER_UPDATE: &str = "customer_update";

/// A single event as accepted by the CDP events endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: String,
    pub identifiers: Identifiers,
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    lists: Vec<ListInstruction>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Identifiers {
    pub email: String,
}

/// Subscribe instruction embedded in an event. There is no way to build an
/// unsubscribe; removal from a list only ever happens on the remote side.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListInstruction {
    id: String,
    subscribe: bool,
}

impl ListInstruction {
    pub fn subscribe(list_id: &str) -> Self {
        ListInstruction {
            id: list_id.to_string(),
            subscribe: true,
        }
    }
}

impl Event {
    /// Builds an event. A missing timestamp means "now".
    pub fn new(
        event_type: &str,
        email: &str,
        properties: Map<String, Value>,
        timestamp: Option<String>,
    ) -> Self {
        Event {
            event_type: event_type.to_string(),
            timestamp: timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
            identifiers: Identifiers {
                email: email.to_string(),
            },
            properties,
            lists: Vec::new(),
        }
    }

    /// Profile update carrying `attributes` as properties, plus a subscribe
    /// instruction when `list_id` is given and non-empty.
    pub fn customer_update(email: &str, attributes: &Attributes, list_id: Option<&str>) -> Self {
        let properties = attributes
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut event = Event::new(CUSTOMER_UPDATE, email, properties, None);
        if let Some(list_id) = list_id.filter(|id| !id.is_empty()) {
            event.lists.push(ListInstruction::subscribe(list_id));
        }
        event
    }

    pub fn lists(&self) -> &[ListInstruction] {
        &self.lists
    }
}

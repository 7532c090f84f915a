//! Events
//!
//! An `Event` is an immutable announcement that something happened, either
//! signalled from the outside (a user submit) or reported internally by an
//! action outcome or an ending session. States match transitions against
//! the event id; the payload travels alongside for expressions to read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::attributes::AttributeMap;

/// An immutable occurrence with a source, an id, an optional payload, and
/// a creation timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    source: String,
    id: String,
    attributes: AttributeMap,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// An event with no payload.
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self::with_attributes(source, id, AttributeMap::new())
    }

    /// An event carrying a payload.
    pub fn with_attributes(
        source: impl Into<String>,
        id: impl Into<String>,
        attributes: AttributeMap,
    ) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
            attributes,
            timestamp: Utc::now(),
        }
    }

    /// What raised the event (a state id, an action name, a flow id).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event '{}' from '{}'", self.id, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_source_id_and_payload() {
        let mut payload = AttributeMap::new();
        payload.put("orderId", 42);
        let event = Event::with_attributes("payment", "submit", payload);

        assert_eq!(event.source(), "payment");
        assert_eq!(event.id(), "submit");
        assert_eq!(event.attributes().get("orderId"), Some(&42.into()));
    }

    #[test]
    fn display_names_id_and_source() {
        let event = Event::new("checkout", "cancel");
        assert_eq!(event.to_string(), "event 'cancel' from 'checkout'");
    }

    #[test]
    fn timestamp_is_set_at_creation() {
        let before = Utc::now();
        let event = Event::new("s", "e");
        let after = Utc::now();
        assert!(event.timestamp() >= before && event.timestamp() <= after);
    }
}

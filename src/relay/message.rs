//! Relay wire messages (NIP-01)
//!
//! Client → relay: `["REQ", sub_id, filter...]`, `["EVENT", event]`, `["CLOSE", sub_id]`
//!
//! Relay → client: `["EVENT", sub_id, event]`, `["EOSE", sub_id]`,
//! `["OK", event_id, accepted, message]`, `["NOTICE", message]`,
//! `["CLOSED", sub_id, message]`, `["AUTH", challenge]`

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;

use super::RelayError;
use crate::record::RawEvent;

/// Subscription / query filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = String>) -> Self {
        self.authors = Some(authors.into_iter().collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Message sent to a relay
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Event(RawEvent),
    Close(String),
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut seq = serializer.serialize_seq(Some(2 + filters.len()))?;
                seq.serialize_element("REQ")?;
                seq.serialize_element(subscription_id)?;
                for filter in filters {
                    seq.serialize_element(filter)?;
                }
                seq.end()
            }
            ClientMessage::Event(event) => ("EVENT", event).serialize(serializer),
            ClientMessage::Close(subscription_id) => ("CLOSE", subscription_id).serialize(serializer),
        }
    }
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Protocol(e.to_string()))
    }
}

/// Message received from a relay
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: RawEvent,
    },
    /// End of stored events for a subscription
    Eose(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice(String),
    Closed {
        subscription_id: String,
        message: String,
    },
    Auth(String),
}

impl RelayMessage {
    /// Parse a relay frame
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let frame: Vec<JsonValue> =
            serde_json::from_str(text).map_err(|e| RelayError::Protocol(e.to_string()))?;
        let (label, rest) = frame
            .split_first()
            .ok_or_else(|| RelayError::Protocol("empty frame".to_string()))?;

        match label.as_str() {
            Some("EVENT") => {
                let event = rest
                    .get(1)
                    .cloned()
                    .ok_or_else(|| RelayError::Protocol("EVENT without payload".to_string()))?;
                Ok(RelayMessage::Event {
                    subscription_id: string_at(rest, 0)?,
                    event: serde_json::from_value(event)
                        .map_err(|e| RelayError::Protocol(e.to_string()))?,
                })
            }
            Some("EOSE") => Ok(RelayMessage::Eose(string_at(rest, 0)?)),
            Some("OK") => Ok(RelayMessage::Ok {
                event_id: string_at(rest, 0)?,
                accepted: rest.get(1).and_then(JsonValue::as_bool).unwrap_or(false),
                message: string_at(rest, 2).unwrap_or_default(),
            }),
            Some("NOTICE") => Ok(RelayMessage::Notice(string_at(rest, 0)?)),
            Some("CLOSED") => Ok(RelayMessage::Closed {
                subscription_id: string_at(rest, 0)?,
                message: string_at(rest, 1).unwrap_or_default(),
            }),
            Some("AUTH") => Ok(RelayMessage::Auth(string_at(rest, 0)?)),
            other => Err(RelayError::Protocol(format!("unknown frame label {:?}", other))),
        }
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Protocol(e.to_string()))
    }
}

impl Serialize for RelayMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => ("EVENT", subscription_id, event).serialize(serializer),
            RelayMessage::Eose(id) => ("EOSE", id).serialize(serializer),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => ("OK", event_id, accepted, message).serialize(serializer),
            RelayMessage::Notice(message) => ("NOTICE", message).serialize(serializer),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => ("CLOSED", subscription_id, message).serialize(serializer),
            RelayMessage::Auth(challenge) => ("AUTH", challenge).serialize(serializer),
        }
    }
}

fn string_at(values: &[JsonValue], index: usize) -> Result<String, RelayError> {
    values
        .get(index)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| RelayError::Protocol(format!("expected string at position {}", index + 1)))
}

/// A relay message tagged with the relay it came from
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMessage {
    pub relay: String,
    pub message: RelayMessage,
}

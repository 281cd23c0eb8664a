//! Wire-level types exchanged with the subscription: pull/acknowledge requests and the
//! messages a pull hands back.

use std::{collections::HashMap, sync::Arc, time::SystemTime};

/// The published message carried inside a [`ReceivedMessage`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubsubMessage {
    /// Raw message body
    pub data: Vec<u8>,
    /// Publisher supplied attributes
    pub attributes: HashMap<String, String>,
    /// Broker assigned message id
    pub message_id: Option<String>,
    pub publish_time: Option<SystemTime>,
    pub ordering_key: Option<String>,
    /// How many times the broker has attempted delivery, when it tracks that
    pub delivery_attempt: Option<u32>,
}

impl PubsubMessage {
    /// A message carrying `data` and nothing else
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Set the broker assigned message id
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Add one attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A message as returned by a pull, together with the ack id that confirms it.
///
/// Both halves are optional because a broker is free to omit either one; the consumer
/// skips acknowledgment when there is no ack id and hands the handler whatever it got.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Opaque handle presented back to the broker on acknowledge
    pub ack_id: Option<String>,
    /// The message payload
    pub message: Option<PubsubMessage>,
}

impl ReceivedMessage {
    /// A message with both an ack id and a payload
    pub fn new(ack_id: impl Into<String>, message: PubsubMessage) -> Self {
        Self {
            ack_id: Some(ack_id.into()),
            message: Some(message),
        }
    }

    /// The ack id, if the broker sent a non-empty one.
    ///
    /// Protobuf based clients report a missing ack id as `""`, which cannot be acknowledged.
    pub fn ack_id(&self) -> Option<&str> {
        self.ack_id.as_deref().filter(|id| !id.is_empty())
    }

    /// The broker assigned message id, if any
    pub fn message_id(&self) -> Option<&str> {
        self.message.as_ref()?.message_id.as_deref()
    }

    /// The message body, empty when the broker sent no payload
    pub fn data(&self) -> &[u8] {
        self.message.as_ref().map(|m| m.data.as_slice()).unwrap_or_default()
    }

    /// The message body as UTF-8, if it is valid UTF-8
    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(self.data()).ok()
    }

    /// Look up one attribute of the payload
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.message.as_ref()?.attributes.get(key).map(String::as_str)
    }
}

/// Parameters of a single pull call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub subscription: String,
    pub max_messages: u8,
}

/// The batch returned by one pull call. May be empty.
///
/// Messages are kept behind `Arc` so the per-message events and the batch event share them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullResponse {
    pub received_messages: Vec<Arc<ReceivedMessage>>,
}

impl PullResponse {
    /// A response carrying `received_messages` in pull order
    pub fn new(received_messages: Vec<ReceivedMessage>) -> Self {
        Self {
            received_messages: received_messages.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.received_messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.received_messages.len()
    }
}

/// Parameters of a single acknowledge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgeRequest {
    pub subscription: String,
    pub ack_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_tolerate_missing_payload() {
        let message = ReceivedMessage::default();
        assert_eq!(message.ack_id(), None);
        assert_eq!(message.message_id(), None);
        assert!(message.data().is_empty());
        assert_eq!(message.attribute("origin"), None);
    }

    #[test]
    fn accessors_read_through_payload() {
        let message = ReceivedMessage::new(
            "ack-1",
            PubsubMessage::new("hello")
                .with_message_id("m-1")
                .with_attribute("origin", "billing"),
        );
        assert_eq!(message.ack_id(), Some("ack-1"));
        assert_eq!(message.message_id(), Some("m-1"));
        assert_eq!(message.data_str(), Some("hello"));
        assert_eq!(message.attribute("origin"), Some("billing"));
    }

    #[test]
    fn empty_ack_id_is_treated_as_missing() {
        let message = ReceivedMessage {
            ack_id: Some(String::new()),
            message: Some(PubsubMessage::new("hello")),
        };
        assert_eq!(message.ack_id(), None);
    }
}

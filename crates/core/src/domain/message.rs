// Broker Message Domain Model

use crate::domain::locator::NamespaceQueueLocator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fixed per-message envelope allowance used when packing batches
pub const MESSAGE_OVERHEAD_BYTES: usize = 64;

/// A message as delivered by the broker under a peek-lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub message_id: String,
    pub sequence_number: Option<i64>,
    pub body: String,
    pub lock_token: String,
    pub delivery_count: u32,
    pub subject: Option<String>,
    pub properties: HashMap<String, String>,
}

/// A message to be enqueued
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub message_id: Option<String>,
    pub body: String,
    pub subject: Option<String>,
    pub properties: HashMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Estimated size once encoded for the broker
    pub fn encoded_len(&self) -> usize {
        let properties: usize = self
            .properties
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        MESSAGE_OVERHEAD_BYTES
            + self.body.len()
            + self.subject.as_ref().map_or(0, String::len)
            + self.message_id.as_ref().map_or(0, String::len)
            + properties
    }
}

/// Reportable snapshot of one received message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub sequence_number: Option<i64>,
    pub body: String,
    pub message_id: String,
    pub broker_namespace: String,
    pub queue_name: String,

    /// Internal check flag, never reported
    #[serde(skip)]
    pub succeeded: bool,
}

impl ReceivedMessage {
    pub fn from_broker(source: &NamespaceQueueLocator, message: &BrokerMessage) -> Self {
        Self {
            sequence_number: message.sequence_number,
            body: message.body.clone(),
            message_id: message.message_id.clone(),
            broker_namespace: source.namespace().to_string(),
            queue_name: source.queue().to_string(),
            succeeded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_message() -> BrokerMessage {
        BrokerMessage {
            message_id: "m-1".to_string(),
            sequence_number: Some(12),
            body: "{}".to_string(),
            lock_token: "lock".to_string(),
            delivery_count: 1,
            subject: None,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn test_received_message_hides_check_flag() {
        let source = NamespaceQueueLocator::new("sb", "jobs").unwrap();
        let received = ReceivedMessage::from_broker(&source, &broker_message());
        assert!(received.succeeded);

        let json = serde_json::to_value(&received).unwrap();
        assert!(json.get("succeeded").is_none());
        assert_eq!(json["brokerNamespace"], "sb");
        assert_eq!(json["queueName"], "jobs");
        assert_eq!(json["sequenceNumber"], 12);
    }

    #[test]
    fn test_encoded_len_counts_all_parts() {
        let bare = OutgoingMessage::new("abcd");
        assert_eq!(bare.encoded_len(), MESSAGE_OVERHEAD_BYTES + 4);

        let full = OutgoingMessage::new("abcd")
            .with_subject("subj")
            .with_property("k", "vv");
        assert_eq!(full.encoded_len(), MESSAGE_OVERHEAD_BYTES + 4 + 4 + 3);
    }
}

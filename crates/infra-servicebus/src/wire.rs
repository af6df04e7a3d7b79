// Service Bus REST wire formats

use jobrelay_core::domain::{BrokerMessage, OutgoingMessage};
use jobrelay_core::{AppError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Content type of a batch send
pub const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";

/// Header carrying the system properties of a received message
pub const BROKER_PROPERTIES_HEADER: &str = "BrokerProperties";

/// System properties, as sent and as returned in `BrokerProperties`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrokerProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_count: Option<u32>,
    /// The message subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchEntry<'a> {
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    broker_properties: Option<BrokerProperties>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    user_properties: &'a HashMap<String, String>,
}

/// JSON body of a batch send
pub fn encode_batch(batch: &[OutgoingMessage]) -> Result<String> {
    let entries: Vec<BatchEntry<'_>> = batch
        .iter()
        .map(|message| {
            let properties = BrokerProperties {
                message_id: message.message_id.clone(),
                label: message.subject.clone(),
                ..BrokerProperties::default()
            };
            BatchEntry {
                body: &message.body,
                broker_properties: (properties != BrokerProperties::default())
                    .then_some(properties),
                user_properties: &message.properties,
            }
        })
        .collect();
    Ok(serde_json::to_string(&entries)?)
}

/// Rebuild a locked message from a `201` receive response
pub fn decode_message(
    broker_properties: &str,
    user_properties: HashMap<String, String>,
    body: String,
) -> Result<BrokerMessage> {
    let properties: BrokerProperties = serde_json::from_str(broker_properties)
        .map_err(|e| AppError::Broker(format!("unreadable {} header: {}", BROKER_PROPERTIES_HEADER, e)))?;

    let message_id = properties
        .message_id
        .ok_or_else(|| AppError::Broker("received message has no MessageId".to_string()))?;
    let lock_token = properties
        .lock_token
        .ok_or_else(|| AppError::Broker(format!("message {} was not locked", message_id)))?;

    Ok(BrokerMessage {
        message_id,
        sequence_number: properties.sequence_number,
        body,
        lock_token,
        delivery_count: properties.delivery_count.unwrap_or(0),
        subject: properties.label,
        properties: user_properties,
    })
}

/// Custom properties travel as headers with JSON-quoted string values
pub fn user_properties<'a>(
    headers: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> HashMap<String, String> {
    headers
        .into_iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("etag"))
        .filter_map(|(name, value)| {
            let inner = value.strip_prefix('"')?.strip_suffix('"')?;
            Some((name.to_string(), inner.to_string()))
        })
        .collect()
}

fn entry_title() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)<entry\b.*?<title\b[^>]*>([^<]+)</title>"))
        .as_ref()
        .map_err(|e| AppError::Internal(format!("queue feed pattern: {}", e)))
}

/// Queue names of one `$Resources/Queues` Atom feed page
pub fn parse_queue_feed(feed: &str) -> Result<Vec<String>> {
    Ok(entry_title()?
        .captures_iter(feed)
        .filter_map(|caps| caps.get(1))
        .map(|title| title.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_batch() {
        let batch = vec![
            OutgoingMessage::new(r#"{"jobName":"a-001"}"#)
                .with_subject("JobRequest")
                .with_property("messageIndex", "1"),
            OutgoingMessage::new("plain"),
        ];

        let encoded: serde_json::Value =
            serde_json::from_str(&encode_batch(&batch).unwrap()).unwrap();

        assert_eq!(encoded[0]["Body"], r#"{"jobName":"a-001"}"#);
        assert_eq!(encoded[0]["BrokerProperties"]["Label"], "JobRequest");
        assert_eq!(encoded[0]["UserProperties"]["messageIndex"], "1");
        assert!(encoded[1].get("BrokerProperties").is_none());
        assert!(encoded[1].get("UserProperties").is_none());
    }

    #[test]
    fn test_decode_message() {
        let header = r#"{"DeliveryCount":2,"LockToken":"lock-1","LockedUntilUtc":"Mon, 01 Jan 2024 00:00:00 GMT","MessageId":"m-1","SequenceNumber":42,"State":"Active","Label":"JobRequest"}"#;
        let message = decode_message(header, HashMap::new(), "body".to_string()).unwrap();

        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.lock_token, "lock-1");
        assert_eq!(message.sequence_number, Some(42));
        assert_eq!(message.delivery_count, 2);
        assert_eq!(message.subject.as_deref(), Some("JobRequest"));
    }

    #[test]
    fn test_decode_message_without_lock_fails() {
        let header = r#"{"MessageId":"m-1"}"#;
        tokio_test::assert_err!(decode_message(header, HashMap::new(), String::new()));
    }

    #[test]
    fn test_user_properties_keep_quoted_values() {
        let headers = vec![
            ("messageIndex", "\"3\""),
            ("Content-Type", "application/json"),
            ("ETag", "\"abc\""),
        ];
        let properties = user_properties(headers);

        assert_eq!(properties.len(), 1);
        assert_eq!(properties["messageIndex"], "3");
    }

    #[test]
    fn test_parse_queue_feed() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Queues</title>
  <entry xml:base="https://sb.servicebus.windows.net/$Resources/Queues">
    <id>https://sb.servicebus.windows.net/jobs</id>
    <title type="text">jobs</title>
  </entry>
  <entry>
    <title type="text">jobs-deadletter</title>
  </entry>
</feed>"#;

        assert_eq!(
            parse_queue_feed(feed).unwrap(),
            vec!["jobs", "jobs-deadletter"]
        );
    }

    #[test]
    fn test_parse_empty_feed() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title type="text">Queues</title></feed>"#;
        assert!(parse_queue_feed(feed).unwrap().is_empty());
    }
}

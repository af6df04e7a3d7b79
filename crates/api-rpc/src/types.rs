//! RPC Request/Response Types

use jobrelay_core::application::ProcessorState;
use jobrelay_core::domain::{JobRequest, ReceivedMessage};
use serde::{Deserialize, Serialize};

/// messages.send.v1 - Generate and enqueue job-request messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagesRequest {
    pub request: JobRequest,
    /// `"namespace/queue"`; every queue of every configured namespace when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns_queue: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Created,
    NoContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCount {
    pub target: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagesResponse {
    pub status: SendStatus,
    pub created: usize,
    pub targets: Vec<QueueCount>,
}

/// messages.receive.v1 - One bounded receive on every queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveMessagesRequest {
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

/// One delivered message and whether its completion went through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredMessage {
    #[serde(flatten)]
    pub message: ReceivedMessage,
    /// `false` when completing failed; the message will be delivered again
    pub acknowledged: bool,
}

impl From<ReceivedMessage> for DeliveredMessage {
    fn from(message: ReceivedMessage) -> Self {
        Self {
            acknowledged: message.succeeded,
            message,
        }
    }
}

/// Outcome of one queue. A failed queue carries `error` and no messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessages {
    pub target: String,
    pub messages: Vec<DeliveredMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every queue is reported, failed ones included, so nothing completed
/// on a healthy queue is lost to a failure elsewhere
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveMessagesResponse {
    /// Every queue answered and every message was acknowledged
    pub all_received: bool,
    pub received: usize,
    pub queues: Vec<QueueMessages>,
}

/// messages.purge.v1 - Drain one queue or every queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeMessagesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns_queue: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeMessagesResponse {
    pub deleted: usize,
    pub targets: Vec<QueueCount>,
}

/// jobs.create.v1 - Create one workload directly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub job_name: String,
    /// Orchestrator namespace, `jobs.namespace` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// admin.status.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub broker_namespaces: Vec<String>,
    pub processor_queue: Option<String>,
    pub processor_state: Option<ProcessorState>,
}

// Job Request Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::locator::NamespaceQueueLocator;
use serde::{Deserialize, Serialize};

/// Minimum zero-padding width for sequenced job names (`job-001`)
const MIN_SEQUENCE_WIDTH: usize = 3;

/// A request to launch one workload per generated message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(default)]
    pub job_name: String,

    #[serde(default)]
    pub messages_to_create_count: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_locator: Option<NamespaceQueueLocator>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter1: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter2: Option<String>,
}

impl JobRequest {
    pub fn new(job_name: impl Into<String>, messages_to_create_count: i32) -> Self {
        Self {
            job_name: job_name.into(),
            messages_to_create_count,
            target_locator: None,
            job_id: None,
            parameter1: None,
            parameter2: None,
        }
    }

    /// Check the request, reporting the first rule that fails
    pub fn validate(&self) -> Result<()> {
        if self.job_name.is_empty() {
            return Err(DomainError::InvalidJobRequest(
                "jobName is required".to_string(),
            ));
        }
        if self.messages_to_create_count < 1 {
            return Err(DomainError::InvalidJobRequest(
                "messagesToCreateCount must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Wire body of message `index` (1-based) out of `count` generated from this request
    pub fn sequenced_body(&self, index: usize, count: usize) -> JobRequestMessageBody {
        let width = count.to_string().len().max(MIN_SEQUENCE_WIDTH);
        JobRequestMessageBody {
            job_name: Some(format!("{}-{:0width$}", self.job_name, index, width = width)),
            job_id: self.job_id,
            parameter1: self.parameter1.clone(),
            parameter2: self.parameter2.clone(),
        }
    }
}

/// JSON payload carried by one broker message
///
/// Producers have used both camelCase and PascalCase field names, both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequestMessageBody {
    #[serde(default, alias = "JobName")]
    pub job_name: Option<String>,

    #[serde(default, alias = "JobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,

    #[serde(default, alias = "Parameter1", skip_serializing_if = "Option::is_none")]
    pub parameter1: Option<String>,

    #[serde(default, alias = "Parameter2", skip_serializing_if = "Option::is_none")]
    pub parameter2: Option<String>,
}

impl JobRequestMessageBody {
    /// Decode a message body. Only structural failures are errors here,
    /// a missing job name is left to the caller.
    pub fn decode(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| DomainError::MalformedPayload(e.to_string()))
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DomainError::MalformedPayload(e.to_string()))
    }

    /// Job name, if present and non-blank
    pub fn job_name(&self) -> Option<&str> {
        self.job_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Rebuild the single-message job request this body stands for
    pub fn into_job_request(self) -> JobRequest {
        JobRequest {
            job_name: self.job_name.unwrap_or_default(),
            messages_to_create_count: 1,
            target_locator: None,
            job_id: self.job_id,
            parameter1: self.parameter1,
            parameter2: self.parameter2,
        }
    }
}

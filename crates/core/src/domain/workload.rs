// Workload Creation Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of one workload creation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchOutcome {
    /// Creation accepted by the orchestrator
    Created,
    /// A workload with the same identity already exists
    Duplicate,
    /// Network, auth or validation failure
    Failed,
}

impl std::fmt::Display for LaunchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchOutcome::Created => write!(f, "CREATED"),
            LaunchOutcome::Duplicate => write!(f, "DUPLICATE"),
            LaunchOutcome::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of `WorkloadLauncher::create_job`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadCreationResult {
    pub outcome: LaunchOutcome,
    pub succeeded: bool,
    pub message: String,
    pub job_name: Option<String>,
    pub namespace_name: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub container_image: Option<String>,
    pub node_selector: Option<String>,
}

impl WorkloadCreationResult {
    pub fn created(
        job_name: impl Into<String>,
        namespace: impl Into<String>,
        creation_time: DateTime<Utc>,
        container_image: impl Into<String>,
        node_selector: Option<&BTreeMap<String, String>>,
    ) -> Self {
        Self {
            outcome: LaunchOutcome::Created,
            succeeded: true,
            message: "Created".to_string(),
            job_name: Some(job_name.into()),
            namespace_name: Some(namespace.into()),
            creation_time: Some(creation_time),
            container_image: Some(container_image.into()),
            node_selector: Some(render_node_selector(node_selector)),
        }
    }

    pub fn duplicate(job_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::not_created(
            LaunchOutcome::Duplicate,
            "Job NOT created: Duplicate".to_string(),
            job_name,
            namespace,
        )
    }

    pub fn failed(
        job_name: impl Into<String>,
        namespace: impl Into<String>,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self::not_created(
            LaunchOutcome::Failed,
            format!("Job NOT created: {}", detail),
            job_name,
            namespace,
        )
    }

    fn not_created(
        outcome: LaunchOutcome,
        message: String,
        job_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            outcome,
            succeeded: false,
            message,
            job_name: Some(job_name.into()),
            namespace_name: Some(namespace.into()),
            creation_time: None,
            container_image: None,
            node_selector: None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.outcome == LaunchOutcome::Duplicate
    }
}

/// `key=value;key=value`, or `None` when no selector is set
pub fn render_node_selector(selector: Option<&BTreeMap<String, String>>) -> String {
    match selector {
        Some(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";"),
        _ => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_created_succeeds() {
        let now = Utc::now();
        assert!(WorkloadCreationResult::created("j", "ns", now, "img:tag", None).succeeded);
        assert!(!WorkloadCreationResult::duplicate("j", "ns").succeeded);
        assert!(!WorkloadCreationResult::failed("j", "ns", "boom").succeeded);
    }

    #[test]
    fn test_failure_message_carries_detail() {
        let result = WorkloadCreationResult::failed("j", "ns", "connection refused");
        assert_eq!(result.outcome, LaunchOutcome::Failed);
        assert!(result.message.contains("connection refused"));

        let dup = WorkloadCreationResult::duplicate("j", "ns");
        assert!(dup.is_duplicate());
        assert!(dup.message.contains("Duplicate"));
    }

    #[test]
    fn test_render_node_selector() {
        assert_eq!(render_node_selector(None), "None");

        let mut map = BTreeMap::new();
        map.insert("kubernetes.azure.com/agentpool".to_string(), "jobs".to_string());
        map.insert("zone".to_string(), "a".to_string());
        assert_eq!(
            render_node_selector(Some(&map)),
            "kubernetes.azure.com/agentpool=jobs;zone=a"
        );
    }
}

// Workload Launcher Port (Interface)

use crate::domain::WorkloadCreationResult;
use crate::error::Result;
use async_trait::async_trait;

/// Creates one-shot workloads on the orchestrator
///
/// Implementations:
/// - KubeWorkloadLauncher: batch/v1 Job through the Kubernetes API
/// - MockWorkloadLauncher: in-memory, for tests
#[async_trait]
pub trait WorkloadLauncher: Send + Sync {
    /// Submit one creation request for `job_name` in `namespace`.
    ///
    /// Single-shot, no retries, no existence pre-check. Every failure is
    /// classified into the returned result rather than raised.
    async fn create_job(&self, job_name: &str, namespace: &str) -> WorkloadCreationResult;
}

/// Read-only view of the orchestrator
#[async_trait]
pub trait ClusterInspector: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Pod names across all namespaces
    async fn list_pods(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock launcher behavior
    #[derive(Debug, Clone)]
    pub enum LauncherBehavior {
        /// Accept new names, report duplicates as Duplicate
        Accept,
        /// Always fail with message
        Fail(String),
    }

    /// Mock Workload Launcher that remembers every name it created
    pub struct MockWorkloadLauncher {
        behavior: Mutex<LauncherBehavior>,
        created: Mutex<HashSet<(String, String)>>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl MockWorkloadLauncher {
        pub fn new(behavior: LauncherBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                created: Mutex::new(HashSet::new()),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub fn new_accepting() -> Self {
            Self::new(LauncherBehavior::Accept)
        }

        pub fn new_failing(message: impl Into<String>) -> Self {
            Self::new(LauncherBehavior::Fail(message.into()))
        }

        /// Simulate a slow orchestrator
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn set_behavior(&self, behavior: LauncherBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkloadLauncher for MockWorkloadLauncher {
        async fn create_job(&self, job_name: &str, namespace: &str) -> WorkloadCreationResult {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(job_name.to_string());

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                LauncherBehavior::Fail(msg) => {
                    WorkloadCreationResult::failed(job_name, namespace, msg)
                }
                LauncherBehavior::Accept => {
                    let fresh = self
                        .created
                        .lock()
                        .unwrap()
                        .insert((namespace.to_string(), job_name.to_string()));
                    if fresh {
                        WorkloadCreationResult::created(
                            job_name,
                            namespace,
                            Utc::now(),
                            "registry.local/job-worker:test",
                            None,
                        )
                    } else {
                        WorkloadCreationResult::duplicate(job_name, namespace)
                    }
                }
            }
        }
    }

    /// Mock Cluster Inspector with fixed listings
    pub struct MockClusterInspector {
        pub namespaces: Vec<String>,
        pub pods: Vec<String>,
    }

    #[async_trait]
    impl ClusterInspector for MockClusterInspector {
        async fn list_namespaces(&self) -> Result<Vec<String>> {
            Ok(self.namespaces.clone())
        }

        async fn list_pods(&self) -> Result<Vec<String>> {
            Ok(self.pods.clone())
        }
    }

}

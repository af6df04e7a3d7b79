// Kubernetes launcher (WorkloadLauncher + ClusterInspector)

use crate::manifest::{build_job_manifest, node_selector, workload_name};
use async_trait::async_trait;
use chrono::Utc;
use jobrelay_core::config::JobTemplateSettings;
use jobrelay_core::domain::WorkloadCreationResult;
use jobrelay_core::port::{ClusterInspector, WorkloadLauncher};
use jobrelay_core::{AppError, Result};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::fmt::Display;
use tracing::{error, info, warn};

/// HTTP status the API server answers when the Job name is taken
const CONFLICT: u16 = 409;

/// Creates batch/v1 Jobs from the configured template
#[derive(Clone)]
pub struct KubeWorkloadLauncher {
    client: Client,
    template: JobTemplateSettings,
}

impl KubeWorkloadLauncher {
    pub fn new(client: Client, template: JobTemplateSettings) -> Self {
        Self { client, template }
    }

    /// Connect with `kubeconfig_path` when set, otherwise infer
    /// (in-cluster service account or the default kubeconfig)
    pub async fn connect(template: JobTemplateSettings) -> Result<Self> {
        let client = match template.kubeconfig_path.as_deref() {
            Some(path) if !path.is_empty() => client_from_kubeconfig(path).await?,
            _ => Client::try_default()
                .await
                .map_err(|e| AppError::Orchestrator(format!("failed to infer cluster config: {}", e)))?,
        };
        Ok(Self::new(client, template))
    }

    pub fn template(&self) -> &JobTemplateSettings {
        &self.template
    }
}

async fn client_from_kubeconfig(path: &str) -> Result<Client> {
    let expanded = shellexpand::tilde(path).into_owned();
    let kubeconfig = Kubeconfig::read_from(&expanded)
        .map_err(|e| AppError::Config(format!("cannot read kubeconfig {}: {}", expanded, e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| AppError::Config(format!("invalid kubeconfig {}: {}", expanded, e)))?;
    Client::try_from(config)
        .map_err(|e| AppError::Orchestrator(format!("failed to build cluster client: {}", e)))
}

/// Map a rejected creation: a taken name is a duplicate, anything else a failure
pub fn classify_failure(
    status: Option<u16>,
    workload: &str,
    namespace: &str,
    detail: &dyn Display,
) -> WorkloadCreationResult {
    if status == Some(CONFLICT) {
        warn!(job_name = workload, namespace, "Job NOT created: Duplicate");
        WorkloadCreationResult::duplicate(workload, namespace)
    } else {
        error!(job_name = workload, namespace, status = ?status, error = %detail, "Job NOT created");
        WorkloadCreationResult::failed(workload, namespace, detail)
    }
}

fn api_status(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

fn names<K: kube::Resource>(items: Vec<K>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|item| item.meta().name.clone())
        .collect()
}

#[async_trait]
impl WorkloadLauncher for KubeWorkloadLauncher {
    async fn create_job(&self, job_name: &str, namespace: &str) -> WorkloadCreationResult {
        let manifest = build_job_manifest(&self.template, job_name, namespace);
        let workload = workload_name(&self.template, job_name);
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);

        match jobs.create(&PostParams::default(), &manifest).await {
            Ok(created) => {
                let creation_time = created
                    .metadata
                    .creation_timestamp
                    .map(|time| time.0)
                    .unwrap_or_else(Utc::now);
                info!(job_name = %workload, namespace, "Job created");
                WorkloadCreationResult::created(
                    workload,
                    namespace,
                    creation_time,
                    self.template.container_image(),
                    node_selector(&self.template).as_ref(),
                )
            }
            Err(e) => classify_failure(api_status(&e), &workload, namespace, &e),
        }
    }
}

#[async_trait]
impl ClusterInspector for KubeWorkloadLauncher {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| AppError::Orchestrator(format!("failed to list namespaces: {}", e)))?;
        Ok(names(list.items))
    }

    async fn list_pods(&self) -> Result<Vec<String>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| AppError::Orchestrator(format!("failed to list pods: {}", e)))?;
        Ok(names(list.items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrelay_core::domain::LaunchOutcome;

    #[test]
    fn test_conflict_is_duplicate() {
        let result = classify_failure(Some(409), "jet-a", "batch", &"AlreadyExists");

        assert_eq!(result.outcome, LaunchOutcome::Duplicate);
        assert!(!result.succeeded);
        assert_eq!(result.message, "Job NOT created: Duplicate");
        assert_eq!(result.job_name.as_deref(), Some("jet-a"));
    }

    #[test]
    fn test_other_status_is_failure_with_detail() {
        let result = classify_failure(Some(403), "jet-a", "batch", &"forbidden: cannot create jobs");

        assert_eq!(result.outcome, LaunchOutcome::Failed);
        assert_eq!(result.message, "Job NOT created: forbidden: cannot create jobs");
    }

    #[test]
    fn test_transport_error_is_failure() {
        let result = classify_failure(None, "jet-a", "batch", &"connection refused");
        assert_eq!(result.outcome, LaunchOutcome::Failed);
        assert!(result.namespace_name.as_deref() == Some("batch"));
    }
}

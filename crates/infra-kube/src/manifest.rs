// batch/v1 Job manifest built from a job name and the static template

use jobrelay_core::config::JobTemplateSettings;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "jobrelay";
pub const JOB_NAME_LABEL: &str = "jobrelay/job-name";

/// Environment variable telling the worker which job it runs
pub const JOB_NAME_ENV: &str = "JOB_NAME";

/// Name of the Job object created for `job_name`
pub fn workload_name(template: &JobTemplateSettings, job_name: &str) -> String {
    format!("{}{}", template.prefix, job_name)
}

/// `{key: value}` when both halves are configured
pub fn node_selector(template: &JobTemplateSettings) -> Option<BTreeMap<String, String>> {
    match (&template.node_selector_key, &template.node_selector_value) {
        (Some(key), Some(value)) if !key.is_empty() && !value.is_empty() => {
            Some(BTreeMap::from([(key.clone(), value.clone())]))
        }
        _ => None,
    }
}

/// Deterministic: the same inputs always give the same manifest
pub fn build_job_manifest(template: &JobTemplateSettings, job_name: &str, namespace: &str) -> Job {
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (JOB_NAME_LABEL.to_string(), job_name.to_string()),
    ]);

    let requests: BTreeMap<String, Quantity> = [
        ("cpu", template.cpu_request.as_ref()),
        ("memory", template.memory_request.as_ref()),
    ]
    .into_iter()
    .filter_map(|(resource, value)| {
        value
            .filter(|v| !v.is_empty())
            .map(|v| (resource.to_string(), Quantity(v.clone())))
    })
    .collect();

    // config keys from the process environment arrive lower-cased
    let extra = template
        .env
        .iter()
        .map(|(name, value)| (name.to_ascii_uppercase(), value.clone()))
        .filter(|(name, _)| name != JOB_NAME_ENV);
    let env = std::iter::once((JOB_NAME_ENV.to_string(), job_name.to_string()))
        .chain(extra)
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..EnvVar::default()
        })
        .collect();

    let container = Container {
        name: template.container_name.clone(),
        image: Some(template.container_image()),
        image_pull_policy: Some("Always".to_string()),
        env: Some(env),
        resources: (!requests.is_empty()).then(|| ResourceRequirements {
            requests: Some(requests),
            ..ResourceRequirements::default()
        }),
        ..Container::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(workload_name(template, job_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_string()),
                    node_selector: node_selector(template),
                    ..PodSpec::default()
                }),
            },
            ttl_seconds_after_finished: template.ttl_after_finished_secs,
            active_deadline_seconds: template.active_deadline_secs,
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> JobTemplateSettings {
        JobTemplateSettings {
            namespace: "batch".to_string(),
            prefix: "jet-".to_string(),
            container_name: "jet-worker".to_string(),
            repository: "registry.local/team".to_string(),
            image_name: "worker".to_string(),
            image_tag: "1.4.0".to_string(),
            cpu_request: Some("250m".to_string()),
            memory_request: Some("512Mi".to_string()),
            node_selector_key: Some("agentpool".to_string()),
            node_selector_value: Some("jobs".to_string()),
            ttl_after_finished_secs: Some(300),
            active_deadline_secs: Some(3600),
            kubeconfig_path: None,
            env: BTreeMap::from([("ITERATIONS".to_string(), "12".to_string())]),
        }
    }

    #[test]
    fn test_manifest_fields() {
        let job = build_job_manifest(&template(), "render-001", "batch");

        assert_eq!(job.metadata.name.as_deref(), Some("jet-render-001"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("batch"));

        let spec = job.spec.unwrap();
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));
        assert_eq!(spec.active_deadline_seconds, Some(3600));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.node_selector.unwrap()["agentpool"], "jobs");

        let container = &pod.containers[0];
        assert_eq!(container.name, "jet-worker");
        assert_eq!(
            container.image.as_deref(),
            Some("registry.local/team/worker:1.4.0")
        );
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));

        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, JOB_NAME_ENV);
        assert_eq!(env[0].value.as_deref(), Some("render-001"));

        let requests = container
            .resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
            .unwrap();
        assert_eq!(requests["cpu"], Quantity("250m".to_string()));
        assert_eq!(requests["memory"], Quantity("512Mi".to_string()));
    }

    #[test]
    fn test_template_env_follows_job_name() {
        let mut template = template();
        template
            .env
            .insert(JOB_NAME_ENV.to_string(), "overridden".to_string());
        template.env.insert("mode".to_string(), "fast".to_string());

        let job = build_job_manifest(&template, "render-001", "batch");
        let pod = job.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();

        let pairs: Vec<(&str, Option<&str>)> = env
            .iter()
            .map(|var| (var.name.as_str(), var.value.as_deref()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (JOB_NAME_ENV, Some("render-001")),
                ("ITERATIONS", Some("12")),
                ("MODE", Some("fast")),
            ]
        );
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let a = serde_json::to_value(build_job_manifest(&template(), "x", "batch")).unwrap();
        let b = serde_json::to_value(build_job_manifest(&template(), "x", "batch")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_optional_parts_omitted() {
        let mut template = template();
        template.cpu_request = None;
        template.memory_request = None;
        template.node_selector_value = None;
        template.ttl_after_finished_secs = None;

        let job = build_job_manifest(&template, "x", "batch");
        let spec = job.spec.unwrap();
        let pod = spec.template.spec.unwrap();

        assert!(pod.node_selector.is_none());
        assert!(pod.containers[0].resources.is_none());
        assert!(spec.ttl_seconds_after_finished.is_none());
    }

    #[test]
    fn test_labels() {
        let job = build_job_manifest(&template(), "render-001", "batch");
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);
        assert_eq!(labels[JOB_NAME_LABEL], "render-001");
    }
}

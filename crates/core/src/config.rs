// Configuration Model
//
// Plain values resolved once at startup and passed to constructors.
// Loading (file + environment) lives in the daemon.

use crate::domain::NamespaceQueueLocator;
use crate::error::{AppError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Standard-tier Service Bus batch limit (256 KiB)
pub const DEFAULT_MAX_BATCH_BYTES: usize = 256 * 1024;
pub const DEFAULT_MAX_CONCURRENT_QUEUES: usize = 16;
pub const DEFAULT_PURGE_BATCH_SIZE: usize = 50;
pub const DEFAULT_PURGE_WAIT_SECS: u64 = 15;
pub const DEFAULT_RECEIVE_WAIT_SECS: u64 = 5;
pub const DEFAULT_LOCK_RENEWAL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_LOCK_RENEWAL_SECS: u64 = 10 * 60;
pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 1000;

/// Top-level settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub jobs: JobTemplateSettings,
    pub rpc: RpcSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Every broker namespace the administrative operations act on:
    /// the configured list plus the processor queue's namespace,
    /// deduplicated by value, first occurrence wins.
    pub fn broker_namespaces(&self) -> Vec<String> {
        let processor_ns = self
            .broker
            .processor_queue
            .as_deref()
            .and_then(|token| NamespaceQueueLocator::parse(token).ok())
            .map(|locator| locator.namespace().to_string());

        let mut namespaces: Vec<String> = Vec::new();
        for ns in self.broker.namespaces.iter().cloned().chain(processor_ns) {
            if !ns.is_empty() && !namespaces.contains(&ns) {
                namespaces.push(ns);
            }
        }
        namespaces
    }

    /// Whether any broker namespace is configured at all
    pub fn is_using_broker(&self) -> bool {
        !self.broker_namespaces().is_empty()
    }

    /// The queue the message processor subscribes to
    pub fn processor_locator(&self) -> Result<Option<NamespaceQueueLocator>> {
        self.broker
            .processor_queue
            .as_deref()
            .map(NamespaceQueueLocator::parse)
            .transpose()
            .map_err(AppError::from)
    }

    /// Cross-field checks run once after loading
    pub fn validate(&self) -> Result<()> {
        let processor = self.processor_locator()?;
        if self.broker.start_processor && processor.is_none() {
            return Err(AppError::Config(
                "broker.start_processor requires broker.processor_queue".to_string(),
            ));
        }
        if self.jobs.namespace.is_empty() {
            return Err(AppError::Config("jobs.namespace must not be empty".to_string()));
        }
        if self.broker.max_batch_bytes == 0 {
            return Err(AppError::Config(
                "broker.max_batch_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the broker adapter authenticates
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialProfile {
    #[default]
    SharedAccessKey,
    BearerToken,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub profile: CredentialProfile,
    pub key_name: String,
    pub key: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub namespaces: Vec<String>,
    /// `"namespace/queue"` the processor listens on
    pub processor_queue: Option<String>,
    pub start_processor: bool,
    pub credential: CredentialSettings,
    pub host_suffix: String,
    pub dead_letter_suffix: String,
    /// Cap on concurrent per-queue tasks, `0` means unbounded
    pub max_concurrent_queues: usize,
    pub max_batch_bytes: usize,
    pub purge_batch_size: usize,
    pub purge_wait_secs: u64,
    pub receive_wait_secs: u64,
    pub lock_renewal_interval_secs: u64,
    pub max_lock_renewal_secs: u64,
    pub error_backoff_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            processor_queue: None,
            start_processor: false,
            credential: CredentialSettings::default(),
            host_suffix: ".servicebus.windows.net".to_string(),
            dead_letter_suffix: "-deadletter".to_string(),
            max_concurrent_queues: DEFAULT_MAX_CONCURRENT_QUEUES,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            purge_batch_size: DEFAULT_PURGE_BATCH_SIZE,
            purge_wait_secs: DEFAULT_PURGE_WAIT_SECS,
            receive_wait_secs: DEFAULT_RECEIVE_WAIT_SECS,
            lock_renewal_interval_secs: DEFAULT_LOCK_RENEWAL_INTERVAL_SECS,
            max_lock_renewal_secs: DEFAULT_MAX_LOCK_RENEWAL_SECS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
        }
    }
}

impl BrokerSettings {
    pub fn purge_wait(&self) -> Duration {
        Duration::from_secs(self.purge_wait_secs)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_secs)
    }

    pub fn lock_renewal_interval(&self) -> Duration {
        Duration::from_secs(self.lock_renewal_interval_secs)
    }

    pub fn max_lock_renewal(&self) -> Duration {
        Duration::from_secs(self.max_lock_renewal_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Static parameters of every launched workload
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobTemplateSettings {
    /// Orchestrator namespace jobs are created in
    pub namespace: String,
    pub prefix: String,
    pub container_name: String,
    pub repository: String,
    pub image_name: String,
    pub image_tag: String,
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub node_selector_key: Option<String>,
    pub node_selector_value: Option<String>,
    pub ttl_after_finished_secs: Option<i32>,
    pub active_deadline_secs: Option<i64>,
    pub kubeconfig_path: Option<String>,
    /// Extra container environment, set after `JOB_NAME`
    pub env: BTreeMap<String, String>,
}

impl Default for JobTemplateSettings {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            prefix: "job-".to_string(),
            container_name: "job-worker".to_string(),
            repository: "docker.io/library".to_string(),
            image_name: "busybox".to_string(),
            image_tag: "latest".to_string(),
            cpu_request: None,
            memory_request: None,
            node_selector_key: None,
            node_selector_value: None,
            ttl_after_finished_secs: None,
            active_deadline_secs: None,
            kubeconfig_path: None,
            env: BTreeMap::new(),
        }
    }
}

impl JobTemplateSettings {
    pub fn container_image(&self) -> String {
        let repository = self.repository.trim_end_matches('/');
        if repository.is_empty() {
            format!("{}:{}", self.image_name, self.image_tag)
        } else {
            format!("{}/{}:{}", repository, self.image_name, self.image_tag)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub host: String,
    pub port: u16,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9527,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
        }
    }
}

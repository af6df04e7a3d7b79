//! RPC Method Handlers
//!
//! Each method maps onto one Batch Operator or launcher call and turns its
//! outcome into a result or an error code.

use crate::error::{partial_failure, to_rpc_error};
use crate::types::{
    CreateJobRequest, DeliveredMessage, PurgeMessagesRequest, PurgeMessagesResponse, QueueCount,
    QueueMessages, ReceiveMessagesRequest, ReceiveMessagesResponse, SendMessagesRequest,
    SendMessagesResponse, SendStatus, StatusResponse,
};
use jobrelay_core::application::{BatchOperator, BatchReport, ProcessorState};
use jobrelay_core::config::Settings;
use jobrelay_core::domain::{LaunchOutcome, NamespaceQueueLocator, WorkloadCreationResult};
use jobrelay_core::error::AppError;
use jobrelay_core::port::{ClusterInspector, WorkloadLauncher};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    settings: Settings,
    /// `None` when no broker namespace is configured
    batch: Option<Arc<BatchOperator>>,
    launcher: Arc<dyn WorkloadLauncher>,
    inspector: Arc<dyn ClusterInspector>,
    processor_state: Option<watch::Receiver<ProcessorState>>,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(
        settings: Settings,
        batch: Option<Arc<BatchOperator>>,
        launcher: Arc<dyn WorkloadLauncher>,
        inspector: Arc<dyn ClusterInspector>,
    ) -> Self {
        Self {
            settings,
            batch,
            launcher,
            inspector,
            processor_state: None,
            start_time: Instant::now(),
        }
    }

    /// Expose the running processor's state through `admin.status.v1`
    pub fn with_processor_state(mut self, state: watch::Receiver<ProcessorState>) -> Self {
        self.processor_state = Some(state);
        self
    }

    fn batch(&self) -> Result<&BatchOperator, ErrorObjectOwned> {
        self.batch.as_deref().ok_or_else(|| {
            to_rpc_error(AppError::NotFound(
                "no broker namespace is configured".to_string(),
            ))
        })
    }

    fn locator(token: &str) -> Result<NamespaceQueueLocator, ErrorObjectOwned> {
        NamespaceQueueLocator::parse(token).map_err(|e| to_rpc_error(e.into()))
    }

    /// messages.send.v1
    pub async fn send_messages(
        &self,
        params: SendMessagesRequest,
    ) -> Result<SendMessagesResponse, ErrorObjectOwned> {
        let batch = self.batch()?;
        params
            .request
            .validate()
            .map_err(|e| to_rpc_error(e.into()))?;
        let count = params.request.messages_to_create_count as usize;

        let report = match Self::send_target(&params)? {
            Some(target) => {
                let sent = batch
                    .send_batch(&target, &params.request, count)
                    .await
                    .map_err(to_rpc_error)?;
                single(target, sent)
            }
            None => {
                let namespaces = self.settings.broker_namespaces();
                batch
                    .send_to_namespaces(&namespaces, &params.request, count)
                    .await
            }
        };

        let targets = counts(ensure_complete("send", report)?);
        let created: usize = targets.iter().map(|t| t.count).sum();
        let status = if created > 0 {
            SendStatus::Created
        } else {
            SendStatus::NoContent
        };
        info!(job_name = %params.request.job_name, created, targets = targets.len(), "messages.send.v1 done");

        Ok(SendMessagesResponse {
            status,
            created,
            targets,
        })
    }

    /// `ns_queue`, else the request's own `targetLocator`; `None` fans out.
    /// Both present and different is rejected.
    fn send_target(
        params: &SendMessagesRequest,
    ) -> Result<Option<NamespaceQueueLocator>, ErrorObjectOwned> {
        let embedded = params.request.target_locator.as_ref();
        match params.ns_queue.as_deref() {
            Some(token) => {
                let target = Self::locator(token)?;
                match embedded {
                    Some(locator) if *locator != target => {
                        Err(to_rpc_error(AppError::Validation(format!(
                            "ns_queue {} conflicts with targetLocator {}",
                            target, locator
                        ))))
                    }
                    _ => Ok(Some(target)),
                }
            }
            None => Ok(embedded.cloned()),
        }
    }

    /// messages.receive.v1
    pub async fn receive_messages(
        &self,
        params: ReceiveMessagesRequest,
    ) -> Result<ReceiveMessagesResponse, ErrorObjectOwned> {
        let batch = self.batch()?;
        if params.count == 0 {
            return Err(to_rpc_error(AppError::Validation(
                "count must be greater than 0".to_string(),
            )));
        }

        let report = batch
            .receive_from_namespaces(&self.settings.broker_namespaces(), params.count)
            .await;
        if report.is_empty() {
            return Err(to_rpc_error(AppError::NotFound(
                "receive: no queues found".to_string(),
            )));
        }

        let all_received = report.all_received();
        let received = report.message_count();
        let queues: Vec<QueueMessages> = report
            .into_outcomes()
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(messages) => QueueMessages {
                    target: outcome.target,
                    messages: messages.into_iter().map(DeliveredMessage::from).collect(),
                    error: None,
                },
                Err(e) => QueueMessages {
                    target: outcome.target,
                    messages: Vec::new(),
                    error: Some(e.to_string()),
                },
            })
            .collect();

        if !all_received {
            warn!(
                received,
                "Receive incomplete: some queues failed or some messages will be redelivered"
            );
        }
        info!(received, queues = queues.len(), "messages.receive.v1 done");
        Ok(ReceiveMessagesResponse {
            all_received,
            received,
            queues,
        })
    }

    /// messages.purge.v1
    pub async fn purge_messages(
        &self,
        params: PurgeMessagesRequest,
    ) -> Result<PurgeMessagesResponse, ErrorObjectOwned> {
        let batch = self.batch()?;

        let report = match params.ns_queue.as_deref() {
            Some(token) => {
                let source = Self::locator(token)?;
                let deleted = batch.purge_all(&source).await.map_err(to_rpc_error)?;
                single(source, deleted)
            }
            None => {
                batch
                    .purge_namespaces(&self.settings.broker_namespaces())
                    .await
            }
        };

        let targets = counts(ensure_complete("purge", report)?);
        let deleted = targets.iter().map(|t| t.count).sum();
        info!(deleted, targets = targets.len(), "messages.purge.v1 done");
        Ok(PurgeMessagesResponse { deleted, targets })
    }

    /// jobs.create.v1
    pub async fn create_job(
        &self,
        params: CreateJobRequest,
    ) -> Result<WorkloadCreationResult, ErrorObjectOwned> {
        let job_name = params.job_name.trim();
        if job_name.is_empty() {
            return Err(to_rpc_error(AppError::Validation(
                "job_name is required".to_string(),
            )));
        }
        let namespace = params
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.settings.jobs.namespace);

        let result = self.launcher.create_job(job_name, namespace).await;
        match result.outcome {
            LaunchOutcome::Created => Ok(result),
            LaunchOutcome::Duplicate => Err(to_rpc_error(AppError::Conflict(result.message))),
            LaunchOutcome::Failed => Err(to_rpc_error(AppError::Orchestrator(result.message))),
        }
    }

    /// cluster.namespaces.v1
    pub async fn list_namespaces(&self) -> Result<Vec<String>, ErrorObjectOwned> {
        self.inspector.list_namespaces().await.map_err(to_rpc_error)
    }

    /// cluster.pods.v1
    pub async fn list_pods(&self) -> Result<Vec<String>, ErrorObjectOwned> {
        self.inspector.list_pods().await.map_err(to_rpc_error)
    }

    /// admin.status.v1
    pub async fn status(&self) -> Result<StatusResponse, ErrorObjectOwned> {
        Ok(StatusResponse {
            version: jobrelay_core::VERSION.to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            broker_namespaces: self.settings.broker_namespaces(),
            processor_queue: self.settings.broker.processor_queue.clone(),
            processor_state: self.processor_state.as_ref().map(|rx| *rx.borrow()),
        })
    }
}

fn single<T>(locator: NamespaceQueueLocator, value: T) -> BatchReport<T> {
    let mut report = BatchReport::default();
    report.push(locator.to_string(), Ok(value));
    report
}

/// Zero targets is "nothing to do"; any failed target fails the call
fn ensure_complete(
    operation: &str,
    report: BatchReport<usize>,
) -> Result<BatchReport<usize>, ErrorObjectOwned> {
    if report.is_empty() {
        return Err(to_rpc_error(AppError::NotFound(format!(
            "{}: no queues found",
            operation
        ))));
    }
    if !report.all_succeeded() {
        return Err(partial_failure(operation, &report));
    }
    Ok(report)
}

fn counts(report: BatchReport<usize>) -> Vec<QueueCount> {
    report
        .successes()
        .map(|(target, count)| QueueCount {
            target: target.to_string(),
            count: *count,
        })
        .collect()
}

// Batch Operator - bulk send / receive / purge over one queue or a whole namespace

mod packing;
mod report;

pub use packing::pack_batches;
pub use report::{BatchReport, QueueOutcome};

use crate::config::BrokerSettings;
use crate::domain::{
    BrokerMessage, JobRequest, NamespaceQueueLocator, OutgoingMessage, ReceivedMessage,
};
use crate::error::{AppError, Result};
use crate::port::{MessageBroker, QueueDirectory};
use futures::stream::{self, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Subject set on every generated job-request message
pub const JOB_REQUEST_SUBJECT: &str = "JobRequest";

/// Application property carrying the 1-based index of a generated message
pub const MESSAGE_INDEX_PROPERTY: &str = "messageIndex";

/// Tunables of the batch algorithms
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_batch_bytes: usize,
    /// `0` means unbounded
    pub max_concurrent_queues: usize,
    pub receive_wait: Duration,
    pub purge_batch_size: usize,
    pub purge_wait: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

impl From<&BrokerSettings> for BatchSettings {
    fn from(broker: &BrokerSettings) -> Self {
        Self {
            max_batch_bytes: broker.max_batch_bytes,
            max_concurrent_queues: broker.max_concurrent_queues,
            receive_wait: broker.receive_wait(),
            purge_batch_size: broker.purge_batch_size,
            purge_wait: broker.purge_wait(),
        }
    }
}

/// Termination predicate of the purge loop
pub fn is_drained(batch: &[BrokerMessage]) -> bool {
    batch.is_empty()
}

/// The three queue-scoped algorithms. Cheap to clone: one per spawned task.
#[derive(Clone)]
pub struct QueueOps {
    broker: Arc<dyn MessageBroker>,
    settings: BatchSettings,
}

impl QueueOps {
    pub fn new(broker: Arc<dyn MessageBroker>, settings: BatchSettings) -> Self {
        Self { broker, settings }
    }

    /// Enqueue `count` messages derived from `request`, each job name suffixed
    /// with its zero-padded index. Returns how many were enqueued.
    pub async fn send_batch(
        &self,
        target: &NamespaceQueueLocator,
        request: &JobRequest,
        count: usize,
    ) -> Result<usize> {
        debug!(target = %target, count, "send_batch called");

        request.validate()?;
        if count == 0 {
            return Err(AppError::Validation(
                "message count must be greater than 0".to_string(),
            ));
        }

        let messages = (1..=count)
            .map(|index| -> Result<OutgoingMessage> {
                let body = request.sequenced_body(index, count).encode()?;
                Ok(OutgoingMessage::new(body)
                    .with_subject(JOB_REQUEST_SUBJECT)
                    .with_property(MESSAGE_INDEX_PROPERTY, index.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let batches = pack_batches(messages, self.settings.max_batch_bytes)?;

        let mut sent = 0usize;
        for batch in &batches {
            if let Err(e) = self.broker.send_batch(target, batch).await {
                if sent > 0 {
                    warn!(target = %target, sent, count, "Send interrupted after partial enqueue");
                }
                return Err(e);
            }
            sent += batch.len();
        }

        info!(target = %target, sent, batches = batches.len(), "Messages enqueued");
        Ok(sent)
    }

    /// One bounded receive. Every delivered message is mapped first, then
    /// completed; a message whose completion fails is reported with
    /// `succeeded = false` and will be redelivered.
    pub async fn receive_batch(
        &self,
        source: &NamespaceQueueLocator,
        batch_size: usize,
    ) -> Result<Vec<ReceivedMessage>> {
        debug!(source = %source, batch_size, "receive_batch called");

        let delivered = self
            .broker
            .receive(source, batch_size, self.settings.receive_wait)
            .await?;

        let mut received: Vec<ReceivedMessage> = delivered
            .iter()
            .map(|message| ReceivedMessage::from_broker(source, message))
            .collect();

        for (message, report) in delivered.iter().zip(received.iter_mut()) {
            if let Err(e) = self.broker.complete(source, message).await {
                warn!(
                    source = %source,
                    message_id = %message.message_id,
                    error = %e,
                    "Completion failed, message will be redelivered"
                );
                report.succeeded = false;
            }
        }

        info!(source = %source, received = received.len(), "Messages received");
        Ok(received)
    }

    /// Receive-and-complete rounds until one receive comes back empty.
    /// Returns the number of messages deleted.
    pub async fn purge_all(&self, source: &NamespaceQueueLocator) -> Result<usize> {
        info!(
            source = %source,
            batch_size = self.settings.purge_batch_size,
            wait = ?self.settings.purge_wait,
            "Purging queue"
        );

        let rounds = stream::try_unfold(0usize, move |round| self.purge_round(source, round));
        let deleted = rounds
            .try_fold(0usize, |total, deleted| async move { Ok(total + deleted) })
            .await?;

        info!(source = %source, deleted, "Queue purged");
        Ok(deleted)
    }

    /// One purge round: `None` once the queue is drained
    async fn purge_round(
        &self,
        source: &NamespaceQueueLocator,
        round: usize,
    ) -> Result<Option<(usize, usize)>> {
        let batch = self
            .broker
            .receive(
                source,
                self.settings.purge_batch_size,
                self.settings.purge_wait,
            )
            .await?;

        if is_drained(&batch) {
            debug!(source = %source, rounds = round, "Queue drained");
            return Ok(None);
        }

        for message in &batch {
            debug!(source = %source, body = %message.body, "Deleting message");
            self.broker.complete(source, message).await?;
        }
        debug!(source = %source, round, deleted = batch.len(), "Purge round done");
        Ok(Some((batch.len(), round + 1)))
    }
}

/// Runs the queue algorithms on one queue, or once per queue across namespaces
pub struct BatchOperator {
    directory: Arc<dyn QueueDirectory>,
    ops: QueueOps,
    limiter: Arc<Semaphore>,
}

impl BatchOperator {
    pub fn new(
        directory: Arc<dyn QueueDirectory>,
        broker: Arc<dyn MessageBroker>,
        settings: BatchSettings,
    ) -> Self {
        let permits = match settings.max_concurrent_queues {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };
        Self {
            directory,
            ops: QueueOps::new(broker, settings),
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    pub async fn send_batch(
        &self,
        target: &NamespaceQueueLocator,
        request: &JobRequest,
        count: usize,
    ) -> Result<usize> {
        self.ops.send_batch(target, request, count).await
    }

    pub async fn receive_batch(
        &self,
        source: &NamespaceQueueLocator,
        batch_size: usize,
    ) -> Result<Vec<ReceivedMessage>> {
        self.ops.receive_batch(source, batch_size).await
    }

    pub async fn purge_all(&self, source: &NamespaceQueueLocator) -> Result<usize> {
        self.ops.purge_all(source).await
    }

    /// Fully materialised list of the namespace's queues
    pub async fn list_queue_locators(
        &self,
        namespace: &str,
    ) -> Result<Vec<NamespaceQueueLocator>> {
        let queues = self.directory.list_queues(namespace).await?;
        debug!(namespace, queues = ?queues, "Queues listed");
        queues
            .into_iter()
            .map(|queue| NamespaceQueueLocator::new(namespace, queue).map_err(AppError::from))
            .collect()
    }

    pub async fn send_to_namespace(
        &self,
        namespace: &str,
        request: &JobRequest,
        count: usize,
    ) -> Result<BatchReport<usize>> {
        self.fan_out(namespace, send_op(request.clone(), count))
            .await
    }

    pub async fn receive_from_namespace(
        &self,
        namespace: &str,
        batch_size: usize,
    ) -> Result<BatchReport<Vec<ReceivedMessage>>> {
        self.fan_out(namespace, receive_op(batch_size)).await
    }

    pub async fn purge_namespace(&self, namespace: &str) -> Result<BatchReport<usize>> {
        self.fan_out(namespace, purge_op).await
    }

    pub async fn send_to_namespaces(
        &self,
        namespaces: &[String],
        request: &JobRequest,
        count: usize,
    ) -> BatchReport<usize> {
        self.fan_out_namespaces(namespaces, send_op(request.clone(), count))
            .await
    }

    pub async fn receive_from_namespaces(
        &self,
        namespaces: &[String],
        batch_size: usize,
    ) -> BatchReport<Vec<ReceivedMessage>> {
        self.fan_out_namespaces(namespaces, receive_op(batch_size))
            .await
    }

    pub async fn purge_namespaces(&self, namespaces: &[String]) -> BatchReport<usize> {
        self.fan_out_namespaces(namespaces, purge_op).await
    }

    /// List the namespace's queues, then run `op` once per queue in its own task.
    ///
    /// Tasks run concurrently (bounded by the shared limiter) and a failing or
    /// panicking task never cancels its siblings.
    async fn fan_out<T, F, Fut>(&self, namespace: &str, op: F) -> Result<BatchReport<T>>
    where
        T: Send + 'static,
        F: Fn(QueueOps, NamespaceQueueLocator) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let locators = self.list_queue_locators(namespace).await?;
        info!(namespace, queues = locators.len(), "Fanning out over namespace");

        let handles: Vec<(String, JoinHandle<Result<T>>)> = locators
            .into_iter()
            .map(|locator| {
                let target = locator.to_string();
                let ops = self.ops.clone();
                let op = op.clone();
                let limiter = Arc::clone(&self.limiter);
                let handle = tokio::spawn(async move {
                    let _permit = limiter.acquire_owned().await.map_err(|e| {
                        AppError::Internal(format!("concurrency limiter closed: {}", e))
                    })?;
                    op(ops, locator).await
                });
                (target, handle)
            })
            .collect();

        let mut report = BatchReport::default();
        for (target, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(AppError::Internal(format!(
                    "task for {} did not finish: {}",
                    target, join_err
                ))),
            };
            if let Err(e) = &result {
                error!(target = %target, error = %e, "Queue task failed");
            }
            report.push(target, result);
        }
        Ok(report)
    }

    /// `fan_out` over several namespaces concurrently. A namespace whose queues
    /// cannot be listed is recorded as one failed entry named after it.
    async fn fan_out_namespaces<T, F, Fut>(&self, namespaces: &[String], op: F) -> BatchReport<T>
    where
        T: Send + 'static,
        F: Fn(QueueOps, NamespaceQueueLocator) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let per_namespace = futures::future::join_all(namespaces.iter().map(|namespace| {
            let op = op.clone();
            async move { (namespace, self.fan_out(namespace, op).await) }
        }))
        .await;

        let mut report = BatchReport::default();
        for (namespace, result) in per_namespace {
            match result {
                Ok(namespace_report) => report.merge(namespace_report),
                Err(e) => {
                    error!(namespace = %namespace, error = %e, "Listing queues failed");
                    report.push(namespace.clone(), Err(e));
                }
            }
        }
        report
    }
}

fn send_op(
    request: JobRequest,
    count: usize,
) -> impl Fn(QueueOps, NamespaceQueueLocator) -> futures::future::BoxFuture<'static, Result<usize>>
       + Clone
       + Send
       + Sync
       + 'static {
    move |ops, locator| {
        let request = request.clone();
        Box::pin(async move { ops.send_batch(&locator, &request, count).await })
    }
}

fn receive_op(
    batch_size: usize,
) -> impl Fn(
    QueueOps,
    NamespaceQueueLocator,
) -> futures::future::BoxFuture<'static, Result<Vec<ReceivedMessage>>>
       + Clone
       + Send
       + Sync
       + 'static {
    move |ops, locator| Box::pin(async move { ops.receive_batch(&locator, batch_size).await })
}

fn purge_op(
    ops: QueueOps,
    locator: NamespaceQueueLocator,
) -> futures::future::BoxFuture<'static, Result<usize>> {
    Box::pin(async move { ops.purge_all(&locator).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobRequestMessageBody;
    use crate::port::message_broker::mocks::InMemoryBroker;

    fn locator(ns: &str, queue: &str) -> NamespaceQueueLocator {
        NamespaceQueueLocator::new(ns, queue).unwrap()
    }

    fn operator(broker: Arc<InMemoryBroker>, settings: BatchSettings) -> BatchOperator {
        BatchOperator::new(broker.clone(), broker, settings)
    }

    #[tokio::test]
    async fn test_send_batch_enqueues_all_messages() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let op = operator(broker.clone(), BatchSettings::default());
        let target = locator("sb", "jobs");

        let sent = op
            .send_batch(&target, &JobRequest::new("render", 5), 5)
            .await
            .unwrap();

        assert_eq!(sent, 5);
        let names: Vec<String> = broker
            .ready_bodies(&target)
            .iter()
            .map(|b| JobRequestMessageBody::decode(b).unwrap().job_name.unwrap())
            .collect();
        assert_eq!(names[0], "render-001");
        assert_eq!(names[4], "render-005");
    }

    #[tokio::test]
    async fn test_send_batch_splits_into_several_batches() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let settings = BatchSettings {
            max_batch_bytes: 300,
            ..BatchSettings::default()
        };
        let op = operator(broker.clone(), settings);
        let target = locator("sb", "jobs");

        let sent = op
            .send_batch(&target, &JobRequest::new("render", 10), 10)
            .await
            .unwrap();
        assert_eq!(sent, 10);
        assert_eq!(broker.ready_count(&target), 10);
    }

    #[tokio::test]
    async fn test_send_batch_oversized_message_enqueues_nothing() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let settings = BatchSettings {
            max_batch_bytes: 80,
            ..BatchSettings::default()
        };
        let op = operator(broker.clone(), settings);
        let target = locator("sb", "jobs");

        let err = op
            .send_batch(&target, &JobRequest::new("render", 3), 3)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::MessageTooLarge { index: 1, .. }));
        assert_eq!(broker.ready_count(&target), 0);
    }

    #[tokio::test]
    async fn test_send_batch_rejects_invalid_request_before_sending() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let op = operator(broker.clone(), BatchSettings::default());
        let target = locator("sb", "jobs");

        let err = op
            .send_batch(&target, &JobRequest::new("", 1), 1)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(broker.ready_count(&target), 0);
    }

    #[tokio::test]
    async fn test_receive_batch_maps_and_completes() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let source = locator("sb", "jobs");
        for i in 0..3 {
            broker.seed(&source, format!("body {}", i));
        }
        let op = operator(broker.clone(), BatchSettings::default());

        let received = op.receive_batch(&source, 2).await.unwrap();

        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|m| m.succeeded));
        assert_eq!(received[0].body, "body 0");
        assert_eq!(received[0].broker_namespace, "sb");
        assert_eq!(received[0].queue_name, "jobs");
        assert_eq!(broker.completed_count(&source), 2);
        assert_eq!(broker.ready_count(&source), 1);
    }

    #[tokio::test]
    async fn test_receive_batch_flags_unacknowledged_messages() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let source = locator("sb", "jobs");
        broker.seed(&source, "body");
        broker.fail_completions(&source);
        let op = operator(broker.clone(), BatchSettings::default());

        let received = op.receive_batch(&source, 1).await.unwrap();
        assert_eq!(received.len(), 1);
        assert!(!received[0].succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_empty_queue_single_receive() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let source = locator("sb", "jobs");
        let op = operator(broker.clone(), BatchSettings::default());

        assert_eq!(op.purge_all(&source).await.unwrap(), 0);
        assert_eq!(broker.receive_calls(&source), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_loops_until_drained() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let source = locator("sb", "jobs");
        for i in 0..7 {
            broker.seed(&source, format!("m{}", i));
        }
        let settings = BatchSettings {
            purge_batch_size: 3,
            ..BatchSettings::default()
        };
        let op = operator(broker.clone(), settings);

        assert_eq!(op.purge_all(&source).await.unwrap(), 7);
        // 3 + 3 + 1, then the empty round that stops the loop
        assert_eq!(broker.receive_calls(&source), 4);
        assert_eq!(broker.ready_count(&source), 0);
        assert_eq!(broker.locked_count(&source), 0);
    }

    #[test]
    fn test_is_drained() {
        assert!(is_drained(&[]));
    }

    #[tokio::test]
    async fn test_fan_out_reports_partial_failure() {
        let broker = Arc::new(
            InMemoryBroker::new()
                .with_queue("sb", "a")
                .with_queue("sb", "b"),
        );
        broker.fail_queue(&locator("sb", "a"));
        let op = operator(broker.clone(), BatchSettings::default());

        let report = op
            .send_to_namespace("sb", &JobRequest::new("render", 2), 2)
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report.total(), 2);
        assert!(!report.all_succeeded());
        assert_eq!(report.failed_targets(), vec!["sb/a"]);
        assert_eq!(broker.ready_count(&locator("sb", "b")), 2);
    }

    #[tokio::test]
    async fn test_fan_out_over_empty_namespace_is_nothing_to_do() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.add_namespace("sb");
        let op = operator(broker, BatchSettings::default());

        let report = op.purge_namespace("sb").await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_directory_failure_surfaces_to_caller() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "a"));
        broker.fail_directory("sb");
        let op = operator(broker, BatchSettings::default());

        assert!(matches!(
            op.purge_namespace("sb").await,
            Err(AppError::Broker(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_namespace_keeps_directory_failure() {
        let broker = Arc::new(
            InMemoryBroker::new()
                .with_queue("sb1", "a")
                .with_queue("sb2", "b"),
        );
        broker.seed(&locator("sb1", "a"), "x");
        broker.fail_directory("sb2");
        let op = operator(broker, BatchSettings::default());

        let report = op
            .purge_namespaces(&["sb1".to_string(), "sb2".to_string()])
            .await;

        assert_eq!(report.total(), 1);
        assert_eq!(report.failed_targets(), vec!["sb2"]);
    }

    #[tokio::test]
    async fn test_concurrency_cap_of_one_still_completes() {
        let broker = Arc::new(
            InMemoryBroker::new()
                .with_queue("sb", "a")
                .with_queue("sb", "b")
                .with_queue("sb", "c"),
        );
        let settings = BatchSettings {
            max_concurrent_queues: 1,
            ..BatchSettings::default()
        };
        let op = operator(broker, settings);

        let report = op
            .send_to_namespace("sb", &JobRequest::new("job", 1), 1)
            .await
            .unwrap();
        assert_eq!(report.total(), 3);
        assert!(report.all_succeeded());
    }
}

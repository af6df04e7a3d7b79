// Message Processor - single-subscription consumer that turns job requests into workloads

mod state;

pub use state::{
    AbandonReason, Disposition, FaultKind, ProcessorFault, ProcessorState, ProcessorStats,
    WORKLOAD_CREATION_FAILED,
};

use crate::application::shutdown::ShutdownToken;
use crate::config::Settings;
use crate::domain::{
    BrokerMessage, JobRequestMessageBody, NamespaceQueueLocator, WorkloadCreationResult,
};
use crate::port::{MessageBroker, WorkloadLauncher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};

/// Timing and target of the processor
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Orchestrator namespace receiving the workloads
    pub jobs_namespace: String,
    pub receive_wait: Duration,
    pub lock_renewal_interval: Duration,
    pub max_lock_renewal: Duration,
    pub error_backoff: Duration,
}

impl From<&Settings> for ProcessorSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            jobs_namespace: settings.jobs.namespace.clone(),
            receive_wait: settings.broker.receive_wait(),
            lock_renewal_interval: settings.broker.lock_renewal_interval(),
            max_lock_renewal: settings.broker.max_lock_renewal(),
            error_backoff: settings.broker.error_backoff(),
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Consumes one queue, one message at a time.
///
/// Every delivered message ends in exactly one disposition: unusable content
/// is abandoned, a created workload completes the message, and any launcher
/// failure (duplicates included) dead-letters it.
pub struct MessageProcessor {
    source: NamespaceQueueLocator,
    broker: Arc<dyn MessageBroker>,
    launcher: Arc<dyn WorkloadLauncher>,
    settings: ProcessorSettings,
    state: watch::Sender<ProcessorState>,
    faults: Option<mpsc::Sender<ProcessorFault>>,
}

impl MessageProcessor {
    pub fn new(
        source: NamespaceQueueLocator,
        broker: Arc<dyn MessageBroker>,
        launcher: Arc<dyn WorkloadLauncher>,
        settings: ProcessorSettings,
    ) -> Self {
        let (state, _) = watch::channel(ProcessorState::Subscribing);
        Self {
            source,
            broker,
            launcher,
            settings,
            state,
            faults: None,
        }
    }

    /// Forward transport faults to a bounded channel of `capacity`.
    /// Faults that do not fit are dropped, the loop never waits on the consumer.
    pub fn with_fault_channel(mut self, capacity: usize) -> (Self, mpsc::Receiver<ProcessorFault>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.faults = Some(tx);
        (self, rx)
    }

    pub fn source(&self) -> &NamespaceQueueLocator {
        &self.source
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    /// Receive loop. Returns when `shutdown` fires; an in-flight message is
    /// settled first.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> ProcessorStats {
        info!(source = %self.source, namespace = %self.settings.jobs_namespace, "Message processor started");
        let mut stats = ProcessorStats::default();
        self.set_state(ProcessorState::Subscribing);

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let received = tokio::select! {
                received = self.broker.receive(&self.source, 1, self.settings.receive_wait) => received,
                _ = shutdown.wait() => {
                    info!(source = %self.source, "Processor interrupted while waiting for messages");
                    break;
                }
            };

            match received {
                Ok(messages) => {
                    self.set_state(ProcessorState::Idle);
                    for message in messages {
                        self.set_state(ProcessorState::Handling);
                        let disposition = self.handle_message(&message).await;
                        stats.record(&disposition);
                        self.set_state(ProcessorState::Idle);
                    }
                }
                Err(e) => {
                    error!(source = %self.source, error = %e, "Receive failed");
                    stats.faults += 1;
                    self.report(FaultKind::Receive, None, e.to_string());
                    self.set_state(ProcessorState::Subscribing);

                    tokio::select! {
                        _ = sleep(self.settings.error_backoff) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }

        self.set_state(ProcessorState::Stopped);
        info!(
            source = %self.source,
            completed = stats.completed,
            abandoned = stats.abandoned,
            dead_lettered = stats.dead_lettered,
            faults = stats.faults,
            "Message processor stopped"
        );
        stats
    }

    /// Decide and apply the disposition of one delivered message
    pub async fn handle_message(&self, message: &BrokerMessage) -> Disposition {
        let body = match JobRequestMessageBody::decode(&message.body) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    source = %self.source,
                    message_id = %message.message_id,
                    error = %e,
                    "Unreadable message body"
                );
                return self
                    .settle(message, Disposition::Abandoned(AbandonReason::MalformedPayload))
                    .await;
            }
        };

        let Some(job_name) = body.job_name() else {
            warn!(source = %self.source, message_id = %message.message_id, "Message has no job name");
            return self
                .settle(message, Disposition::Abandoned(AbandonReason::MissingJobName))
                .await;
        };

        let result = self.launch_with_renewal(message, job_name).await;
        let disposition = if result.succeeded {
            Disposition::Completed
        } else {
            Disposition::DeadLettered {
                description: result.message,
            }
        };
        self.settle(message, disposition).await
    }

    /// Await the launcher while keeping the message lock alive, up to
    /// `max_lock_renewal`. Past that the lock is left to expire.
    async fn launch_with_renewal(
        &self,
        message: &BrokerMessage,
        job_name: &str,
    ) -> WorkloadCreationResult {
        debug!(message_id = %message.message_id, job_name, "Creating workload");

        let launch = self
            .launcher
            .create_job(job_name, &self.settings.jobs_namespace);
        tokio::pin!(launch);

        let started = Instant::now();
        let every = self.settings.lock_renewal_interval;
        let mut renewing = !every.is_zero();
        // a zero period panics; the branch stays disabled in that case
        let period = every.max(Duration::from_millis(1));
        let mut renewals = interval_at(started + period, period);

        loop {
            tokio::select! {
                result = &mut launch => return result,
                _ = renewals.tick(), if renewing => {
                    if started.elapsed() >= self.settings.max_lock_renewal {
                        warn!(
                            message_id = %message.message_id,
                            job_name,
                            "Lock renewal limit reached, lock will expire"
                        );
                        renewing = false;
                        continue;
                    }
                    match self.broker.renew_lock(&self.source, message).await {
                        Ok(()) => debug!(message_id = %message.message_id, "Lock renewed"),
                        Err(e) => {
                            error!(message_id = %message.message_id, error = %e, "Lock renewal failed");
                            self.report(FaultKind::RenewLock, Some(&message.message_id), e.to_string());
                        }
                    }
                }
            }
        }
    }

    async fn settle(&self, message: &BrokerMessage, disposition: Disposition) -> Disposition {
        let settled = match &disposition {
            Disposition::Completed => self.broker.complete(&self.source, message).await,
            Disposition::Abandoned(_) => self.broker.abandon(&self.source, message).await,
            Disposition::DeadLettered { description } => {
                self.broker
                    .dead_letter(&self.source, message, WORKLOAD_CREATION_FAILED, description)
                    .await
            }
        };

        match settled {
            Ok(()) => match &disposition {
                Disposition::DeadLettered { description } => error!(
                    source = %self.source,
                    message_id = %message.message_id,
                    disposition = disposition.label(),
                    description = %description,
                    "Message dead-lettered"
                ),
                Disposition::Abandoned(reason) => warn!(
                    source = %self.source,
                    message_id = %message.message_id,
                    disposition = disposition.label(),
                    reason = %reason,
                    "Message abandoned"
                ),
                Disposition::Completed => info!(
                    source = %self.source,
                    message_id = %message.message_id,
                    disposition = disposition.label(),
                    "Message completed"
                ),
            },
            Err(e) => {
                error!(
                    source = %self.source,
                    message_id = %message.message_id,
                    disposition = disposition.label(),
                    error = %e,
                    "Settling message failed"
                );
                self.report(FaultKind::Settle, Some(&message.message_id), e.to_string());
            }
        }
        disposition
    }

    fn report(&self, kind: FaultKind, message_id: Option<&str>, error: String) {
        let Some(faults) = &self.faults else {
            return;
        };
        let fault = ProcessorFault {
            kind,
            message_id: message_id.map(str::to_string),
            error,
        };
        if faults.try_send(fault).is_err() {
            debug!(source = %self.source, "Fault channel full or closed, fault dropped");
        }
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shutdown::shutdown_channel;
    use crate::port::message_broker::mocks::InMemoryBroker;
    use crate::port::workload_launcher::mocks::MockWorkloadLauncher;

    fn source() -> NamespaceQueueLocator {
        NamespaceQueueLocator::new("sb", "jobs").unwrap()
    }

    fn processor(
        broker: Arc<InMemoryBroker>,
        launcher: Arc<MockWorkloadLauncher>,
    ) -> MessageProcessor {
        let settings = ProcessorSettings {
            jobs_namespace: "batch".to_string(),
            ..ProcessorSettings::default()
        };
        MessageProcessor::new(source(), broker, launcher, settings)
    }

    async fn deliver(broker: &InMemoryBroker, body: &str) -> BrokerMessage {
        broker.seed(&source(), body);
        broker
            .receive(&source(), 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_valid_request_completes() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let processor = processor(broker.clone(), launcher.clone());

        let message = deliver(&broker, r#"{"jobName":"render-001"}"#).await;
        let disposition = processor.handle_message(&message).await;

        assert_eq!(disposition, Disposition::Completed);
        assert_eq!(launcher.calls(), vec!["render-001"]);
        assert_eq!(broker.completed_count(&source()), 1);
        assert_eq!(broker.locked_count(&source()), 0);
    }

    #[tokio::test]
    async fn test_pascal_case_body_is_accepted() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let processor = processor(broker.clone(), launcher.clone());

        let message = deliver(&broker, r#"{"JobName":"nightly","JobId":7}"#).await;
        assert_eq!(
            processor.handle_message(&message).await,
            Disposition::Completed
        );
        assert_eq!(launcher.calls(), vec!["nightly"]);
    }

    #[tokio::test]
    async fn test_malformed_body_is_abandoned_without_launch() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let processor = processor(broker.clone(), launcher.clone());

        let message = deliver(&broker, "not json").await;
        let disposition = processor.handle_message(&message).await;

        assert_eq!(
            disposition,
            Disposition::Abandoned(AbandonReason::MalformedPayload)
        );
        assert_eq!(launcher.call_count(), 0);
        assert_eq!(broker.abandoned_count(&source()), 1);
        assert_eq!(broker.ready_count(&source()), 1);
    }

    #[tokio::test]
    async fn test_missing_job_name_is_abandoned() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let processor = processor(broker.clone(), launcher.clone());

        for body in [r#"{"jobId":3}"#, r#"{"jobName":"   "}"#] {
            let message = deliver(&broker, body).await;
            assert_eq!(
                processor.handle_message(&message).await,
                Disposition::Abandoned(AbandonReason::MissingJobName)
            );
            // drop the redelivered copy so the next iteration gets its own body
            let again = broker.receive(&source(), 1, Duration::ZERO).await.unwrap();
            broker.complete(&source(), &again[0]).await.unwrap();
        }
        assert_eq!(launcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_launcher_failure_dead_letters() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher = Arc::new(MockWorkloadLauncher::new_failing("Forbidden"));
        let processor = processor(broker.clone(), launcher);

        let message = deliver(&broker, r#"{"jobName":"render-001"}"#).await;
        let disposition = processor.handle_message(&message).await;

        assert!(matches!(disposition, Disposition::DeadLettered { .. }));
        let parked = broker.dead_letters(&source());
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].reason, WORKLOAD_CREATION_FAILED);
        assert_eq!(parked[0].description, "Job NOT created: Forbidden");
        assert_eq!(broker.ready_count(&source()), 0);
    }

    #[tokio::test]
    async fn test_duplicate_dead_letters() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let processor = processor(broker.clone(), launcher);

        let first = deliver(&broker, r#"{"jobName":"render-001"}"#).await;
        let second = deliver(&broker, r#"{"jobName":"render-001"}"#).await;

        assert_eq!(
            processor.handle_message(&first).await,
            Disposition::Completed
        );
        assert_eq!(
            processor.handle_message(&second).await,
            Disposition::DeadLettered {
                description: "Job NOT created: Duplicate".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_launch_renews_lock() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher =
            Arc::new(MockWorkloadLauncher::new_accepting().with_delay(Duration::from_secs(95)));
        let processor = processor(broker.clone(), launcher);

        let message = deliver(&broker, r#"{"jobName":"slow"}"#).await;
        assert_eq!(
            processor.handle_message(&message).await,
            Disposition::Completed
        );
        // 30s, 60s, 90s
        assert_eq!(broker.renewal_count(&source()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_renewal_stops_at_limit() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        let launcher =
            Arc::new(MockWorkloadLauncher::new_accepting().with_delay(Duration::from_secs(200)));
        let settings = ProcessorSettings {
            max_lock_renewal: Duration::from_secs(70),
            ..ProcessorSettings::default()
        };
        let processor = MessageProcessor::new(source(), broker.clone(), launcher, settings);

        let message = deliver(&broker, r#"{"jobName":"slower"}"#).await;
        processor.handle_message(&message).await;
        assert_eq!(broker.renewal_count(&source()), 2);
    }

    #[tokio::test]
    async fn test_settle_failure_is_reported_not_changed() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        broker.fail_completions(&source());
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let (processor, mut faults) = processor(broker.clone(), launcher).with_fault_channel(4);

        let message = deliver(&broker, r#"{"jobName":"render-001"}"#).await;
        assert_eq!(
            processor.handle_message(&message).await,
            Disposition::Completed
        );

        let fault = faults.try_recv().unwrap();
        assert_eq!(fault.kind, FaultKind::Settle);
        assert_eq!(fault.message_id.as_deref(), Some(message.message_id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_processes_until_shutdown() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        broker.seed(&source(), r#"{"jobName":"a"}"#);
        broker.seed(&source(), r#"{"jobName":"b"}"#);
        broker.seed(&source(), r#"{"jobName":"a"}"#);
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let processor = Arc::new(processor(broker.clone(), launcher.clone()));
        let mut states = processor.subscribe_state();

        let (sender, token) = shutdown_channel();
        let running = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(token).await })
        };

        // queue drains, then the processor sits in an idle receive
        sleep(Duration::from_secs(1)).await;
        assert_eq!(processor.state(), ProcessorState::Idle);
        sender.shutdown();

        let stats = running.await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(launcher.calls(), vec!["a", "b", "a"]);
        assert_eq!(broker.ready_count(&source()), 0);
        assert_eq!(*states.borrow_and_update(), ProcessorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_message() {
        let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
        broker.seed(&source(), r#"{"jobName":"slow"}"#);
        let launcher = Arc::new(
            MockWorkloadLauncher::new_accepting().with_delay(Duration::from_secs(10)),
        );
        let processor = Arc::new(processor(broker.clone(), launcher.clone()));

        let (sender, token) = shutdown_channel();
        let running = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(token).await })
        };

        // the launch is still pending when shutdown fires
        sleep(Duration::from_secs(1)).await;
        assert_eq!(processor.state(), ProcessorState::Handling);
        sender.shutdown();

        let stats = running.await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(broker.completed_count(&source()), 1);
        assert_eq!(broker.locked_count(&source()), 0);
        assert_eq!(launcher.calls(), vec!["slow"]);
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_backs_off_and_reports() {
        let broker = Arc::new(InMemoryBroker::new());
        let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
        let (processor, mut faults) = processor(broker, launcher).with_fault_channel(8);
        let processor = Arc::new(processor);

        let (sender, token) = shutdown_channel();
        let running = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(token).await })
        };

        // one failure per backoff period
        sleep(Duration::from_millis(2500)).await;
        sender.shutdown();
        let stats = running.await.unwrap();

        assert_eq!(stats.faults, 3);
        assert_eq!(stats.handled(), 0);
        assert_eq!(faults.try_recv().unwrap().kind, FaultKind::Receive);
    }
}

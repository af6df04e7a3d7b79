// Message Broker Port (Interface)

use crate::domain::{BrokerMessage, NamespaceQueueLocator, OutgoingMessage};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Queue-scoped operations on a lock-based message broker.
///
/// Every call names its queue explicitly; implementations create whatever
/// sender/receiver handle they need per call and share only read-only clients.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Enqueue one batch atomically
    async fn send_batch(
        &self,
        target: &NamespaceQueueLocator,
        batch: &[OutgoingMessage],
    ) -> Result<()>;

    /// Receive up to `max_messages` under peek-lock, waiting at most `max_wait`.
    /// An empty vector means the queue had nothing to deliver.
    async fn receive(
        &self,
        source: &NamespaceQueueLocator,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<BrokerMessage>>;

    /// Settle: delete the message from the queue
    async fn complete(&self, source: &NamespaceQueueLocator, message: &BrokerMessage)
        -> Result<()>;

    /// Settle: release the lock so the message is redelivered
    async fn abandon(&self, source: &NamespaceQueueLocator, message: &BrokerMessage)
        -> Result<()>;

    /// Settle: move the message aside for manual inspection
    async fn dead_letter(
        &self,
        source: &NamespaceQueueLocator,
        message: &BrokerMessage,
        reason: &str,
        description: &str,
    ) -> Result<()>;

    /// Extend the lock held on an unsettled message
    async fn renew_lock(&self, source: &NamespaceQueueLocator, message: &BrokerMessage)
        -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::QueueDirectory;
    use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
    use std::sync::Mutex;

    /// A dead-lettered message with its settle reason
    #[derive(Debug, Clone)]
    pub struct DeadLetter {
        pub message: BrokerMessage,
        pub reason: String,
        pub description: String,
    }

    #[derive(Default)]
    struct QueueState {
        ready: VecDeque<BrokerMessage>,
        locked: HashMap<String, BrokerMessage>,
        dead_letters: Vec<DeadLetter>,
        next_sequence: i64,
        receive_calls: usize,
        completed: usize,
        abandoned: usize,
        renewals: usize,
    }

    #[derive(Default)]
    struct BrokerState {
        namespaces: BTreeMap<String, BTreeMap<String, QueueState>>,
        failing_directories: HashSet<String>,
        failing_queues: HashSet<String>,
        failing_completions: HashSet<String>,
    }

    /// In-memory broker with peek-lock semantics, also acting as its own directory
    #[derive(Default)]
    pub struct InMemoryBroker {
        state: Mutex<BrokerState>,
    }

    impl InMemoryBroker {
        pub fn new() -> Self {
            Self::default()
        }

        /// Builder form of `add_queue`
        pub fn with_queue(self, namespace: &str, queue: &str) -> Self {
            self.add_queue(namespace, queue);
            self
        }

        pub fn add_queue(&self, namespace: &str, queue: &str) {
            let mut state = self.state.lock().unwrap();
            state
                .namespaces
                .entry(namespace.to_string())
                .or_default()
                .entry(queue.to_string())
                .or_default();
        }

        /// Declare an empty namespace
        pub fn add_namespace(&self, namespace: &str) {
            let mut state = self.state.lock().unwrap();
            state.namespaces.entry(namespace.to_string()).or_default();
        }

        /// Enqueue a raw body, bypassing batch limits
        pub fn seed(&self, locator: &NamespaceQueueLocator, body: impl Into<String>) {
            let mut state = self.state.lock().unwrap();
            let queue = queue_mut(&mut state, locator).expect("seed into unknown queue");
            push(queue, OutgoingMessage::new(body));
        }

        /// Every operation on the namespace directory fails
        pub fn fail_directory(&self, namespace: &str) {
            self.state
                .lock()
                .unwrap()
                .failing_directories
                .insert(namespace.to_string());
        }

        /// Every send/receive on the queue fails
        pub fn fail_queue(&self, locator: &NamespaceQueueLocator) {
            self.state
                .lock()
                .unwrap()
                .failing_queues
                .insert(locator.to_string());
        }

        /// Completions on the queue fail; the lock is kept
        pub fn fail_completions(&self, locator: &NamespaceQueueLocator) {
            self.state
                .lock()
                .unwrap()
                .failing_completions
                .insert(locator.to_string());
        }

        pub fn ready_count(&self, locator: &NamespaceQueueLocator) -> usize {
            self.read(locator, |q| q.ready.len())
        }

        pub fn locked_count(&self, locator: &NamespaceQueueLocator) -> usize {
            self.read(locator, |q| q.locked.len())
        }

        pub fn ready_bodies(&self, locator: &NamespaceQueueLocator) -> Vec<String> {
            self.read(locator, |q| q.ready.iter().map(|m| m.body.clone()).collect())
        }

        pub fn dead_letters(&self, locator: &NamespaceQueueLocator) -> Vec<DeadLetter> {
            self.read(locator, |q| q.dead_letters.clone())
        }

        pub fn receive_calls(&self, locator: &NamespaceQueueLocator) -> usize {
            self.read(locator, |q| q.receive_calls)
        }

        pub fn completed_count(&self, locator: &NamespaceQueueLocator) -> usize {
            self.read(locator, |q| q.completed)
        }

        pub fn abandoned_count(&self, locator: &NamespaceQueueLocator) -> usize {
            self.read(locator, |q| q.abandoned)
        }

        pub fn renewal_count(&self, locator: &NamespaceQueueLocator) -> usize {
            self.read(locator, |q| q.renewals)
        }

        fn read<T: Default>(
            &self,
            locator: &NamespaceQueueLocator,
            f: impl FnOnce(&mut QueueState) -> T,
        ) -> T {
            let mut state = self.state.lock().unwrap();
            queue_mut(&mut state, locator).map(f).unwrap_or_default()
        }

        fn with_queue_op<T>(
            &self,
            locator: &NamespaceQueueLocator,
            f: impl FnOnce(&mut QueueState) -> Result<T>,
        ) -> Result<T> {
            let mut state = self.state.lock().unwrap();
            if state.failing_queues.contains(&locator.to_string()) {
                return Err(AppError::Broker(format!("injected failure on {}", locator)));
            }
            let queue = queue_mut(&mut state, locator)
                .ok_or_else(|| AppError::Broker(format!("queue {} does not exist", locator)))?;
            f(queue)
        }
    }

    fn queue_mut<'a>(
        state: &'a mut BrokerState,
        locator: &NamespaceQueueLocator,
    ) -> Option<&'a mut QueueState> {
        state
            .namespaces
            .get_mut(locator.namespace())
            .and_then(|queues| queues.get_mut(locator.queue()))
    }

    fn push(queue: &mut QueueState, message: OutgoingMessage) {
        queue.next_sequence += 1;
        queue.ready.push_back(BrokerMessage {
            message_id: message
                .message_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            sequence_number: Some(queue.next_sequence),
            body: message.body,
            lock_token: String::new(),
            delivery_count: 0,
            subject: message.subject,
            properties: message.properties,
        });
    }

    fn take_locked(queue: &mut QueueState, message: &BrokerMessage) -> Result<BrokerMessage> {
        queue.locked.remove(&message.lock_token).ok_or_else(|| {
            AppError::Broker(format!("lock lost for message {}", message.message_id))
        })
    }

    #[async_trait]
    impl QueueDirectory for InMemoryBroker {
        async fn list_queues(&self, namespace: &str) -> Result<Vec<String>> {
            let state = self.state.lock().unwrap();
            if state.failing_directories.contains(namespace) {
                return Err(AppError::Broker(format!(
                    "injected directory failure on {}",
                    namespace
                )));
            }
            state
                .namespaces
                .get(namespace)
                .map(|queues| queues.keys().cloned().collect())
                .ok_or_else(|| AppError::Broker(format!("namespace {} does not exist", namespace)))
        }
    }

    #[async_trait]
    impl MessageBroker for InMemoryBroker {
        async fn send_batch(
            &self,
            target: &NamespaceQueueLocator,
            batch: &[OutgoingMessage],
        ) -> Result<()> {
            self.with_queue_op(target, |queue| {
                for message in batch {
                    push(queue, message.clone());
                }
                Ok(())
            })
        }

        async fn receive(
            &self,
            source: &NamespaceQueueLocator,
            max_messages: usize,
            max_wait: Duration,
        ) -> Result<Vec<BrokerMessage>> {
            let delivered = self.with_queue_op(source, |queue| {
                queue.receive_calls += 1;
                let mut delivered = Vec::new();
                while delivered.len() < max_messages {
                    let Some(mut message) = queue.ready.pop_front() else {
                        break;
                    };
                    message.lock_token = uuid::Uuid::new_v4().to_string();
                    message.delivery_count += 1;
                    queue
                        .locked
                        .insert(message.lock_token.clone(), message.clone());
                    delivered.push(message);
                }
                Ok(delivered)
            })?;
            // Long poll: an empty queue holds the caller for the whole wait
            if delivered.is_empty() {
                tokio::time::sleep(max_wait).await;
            }
            Ok(delivered)
        }

        async fn complete(
            &self,
            source: &NamespaceQueueLocator,
            message: &BrokerMessage,
        ) -> Result<()> {
            let failing = self
                .state
                .lock()
                .unwrap()
                .failing_completions
                .contains(&source.to_string());
            if failing {
                return Err(AppError::Broker(format!(
                    "injected completion failure on {}",
                    source
                )));
            }
            self.with_queue_op(source, |queue| {
                take_locked(queue, message)?;
                queue.completed += 1;
                Ok(())
            })
        }

        async fn abandon(
            &self,
            source: &NamespaceQueueLocator,
            message: &BrokerMessage,
        ) -> Result<()> {
            self.with_queue_op(source, |queue| {
                let released = take_locked(queue, message)?;
                queue.ready.push_front(released);
                queue.abandoned += 1;
                Ok(())
            })
        }

        async fn dead_letter(
            &self,
            source: &NamespaceQueueLocator,
            message: &BrokerMessage,
            reason: &str,
            description: &str,
        ) -> Result<()> {
            self.with_queue_op(source, |queue| {
                let parked = take_locked(queue, message)?;
                queue.dead_letters.push(DeadLetter {
                    message: parked,
                    reason: reason.to_string(),
                    description: description.to_string(),
                });
                Ok(())
            })
        }

        async fn renew_lock(
            &self,
            source: &NamespaceQueueLocator,
            message: &BrokerMessage,
        ) -> Result<()> {
            self.with_queue_op(source, |queue| {
                if !queue.locked.contains_key(&message.lock_token) {
                    return Err(AppError::Broker(format!(
                        "lock lost for message {}",
                        message.message_id
                    )));
                }
                queue.renewals += 1;
                Ok(())
            })
        }
    }
}

//! End-to-end flow over the in-memory broker and launcher:
//! generated job requests travel through a queue and come out as workloads.

use std::sync::Arc;
use std::time::Duration;

use jobrelay_core::application::{
    shutdown_channel, BatchOperator, BatchSettings, MessageProcessor, ProcessorSettings,
    ProcessorState,
};
use jobrelay_core::domain::{JobRequest, NamespaceQueueLocator};
use jobrelay_core::port::message_broker::mocks::InMemoryBroker;
use jobrelay_core::port::workload_launcher::mocks::MockWorkloadLauncher;
use tokio::time::sleep;

fn locator(ns: &str, queue: &str) -> NamespaceQueueLocator {
    NamespaceQueueLocator::new(ns, queue).unwrap()
}

fn operator(broker: Arc<InMemoryBroker>, settings: BatchSettings) -> BatchOperator {
    BatchOperator::new(broker.clone(), broker, settings)
}

fn processor(
    source: NamespaceQueueLocator,
    broker: Arc<InMemoryBroker>,
    launcher: Arc<MockWorkloadLauncher>,
) -> Arc<MessageProcessor> {
    let settings = ProcessorSettings {
        jobs_namespace: "batch".to_string(),
        ..ProcessorSettings::default()
    };
    Arc::new(MessageProcessor::new(source, broker, launcher, settings))
}

/// Generated messages are consumed in order, each creating one workload
#[tokio::test(start_paused = true)]
async fn test_generated_requests_become_workloads() {
    let source = locator("sb", "jobs");
    let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
    let launcher = Arc::new(MockWorkloadLauncher::new_accepting());

    let mut request = JobRequest::new("render", 12);
    request.job_id = Some(7);
    let sent = operator(broker.clone(), BatchSettings::default())
        .send_batch(&source, &request, 12)
        .await
        .unwrap();
    assert_eq!(sent, 12);

    let processor = processor(source.clone(), broker.clone(), launcher.clone());
    let (sender, token) = shutdown_channel();
    let running = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run(token).await })
    };

    sleep(Duration::from_secs(1)).await;
    sender.shutdown();
    let stats = running.await.unwrap();

    assert_eq!(stats.completed, 12);
    assert_eq!(stats.handled(), 12);
    assert_eq!(processor.state(), ProcessorState::Stopped);

    let calls = launcher.calls();
    assert_eq!(calls.first().map(String::as_str), Some("render-001"));
    assert_eq!(calls.last().map(String::as_str), Some("render-012"));
    assert_eq!(broker.ready_count(&source), 0);
    assert_eq!(broker.locked_count(&source), 0);
}

/// Sending the same request twice yields one workload per name; the
/// second copy of each message is dead-lettered as a duplicate
#[tokio::test(start_paused = true)]
async fn test_resent_requests_are_dead_lettered() {
    let source = locator("sb", "jobs");
    let broker = Arc::new(InMemoryBroker::new().with_queue("sb", "jobs"));
    let launcher = Arc::new(MockWorkloadLauncher::new_accepting());
    let operator = operator(broker.clone(), BatchSettings::default());

    let request = JobRequest::new("etl", 3);
    operator.send_batch(&source, &request, 3).await.unwrap();
    operator.send_batch(&source, &request, 3).await.unwrap();

    let processor = processor(source.clone(), broker.clone(), launcher.clone());
    let (sender, token) = shutdown_channel();
    let running = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run(token).await })
    };

    sleep(Duration::from_secs(1)).await;
    sender.shutdown();
    let stats = running.await.unwrap();

    assert_eq!(stats.completed, 3);
    assert_eq!(stats.dead_lettered, 3);

    let dead = broker.dead_letters(&source);
    assert_eq!(dead.len(), 3);
    assert!(dead
        .iter()
        .all(|d| d.description.starts_with("Job NOT created: Duplicate")));
}

/// Send, receive and purge across several namespaces and queues
#[tokio::test(start_paused = true)]
async fn test_namespace_fan_out_round_trip() {
    let broker = Arc::new(
        InMemoryBroker::new()
            .with_queue("east", "a")
            .with_queue("east", "b")
            .with_queue("west", "c"),
    );
    let operator = operator(
        broker.clone(),
        BatchSettings {
            max_concurrent_queues: 2,
            ..BatchSettings::default()
        },
    );
    let namespaces = vec!["east".to_string(), "west".to_string()];

    let sent = operator
        .send_to_namespaces(&namespaces, &JobRequest::new("sync", 5), 5)
        .await;
    assert!(sent.all_succeeded());
    assert_eq!(sent.total(), 15);

    let received = operator.receive_from_namespaces(&namespaces, 2).await;
    assert!(received.all_received());
    assert_eq!(received.message_count(), 6);
    assert_eq!(broker.ready_count(&locator("west", "c")), 3);

    let purged = operator.purge_namespaces(&namespaces).await;
    assert!(purged.all_succeeded());
    assert_eq!(purged.total(), 9);
    for (ns, queue) in [("east", "a"), ("east", "b"), ("west", "c")] {
        assert_eq!(broker.ready_count(&locator(ns, queue)), 0);
    }
}

/// A failing namespace is reported while the healthy one is still served
#[tokio::test]
async fn test_failing_namespace_does_not_block_others() {
    let broker = Arc::new(
        InMemoryBroker::new()
            .with_queue("east", "a")
            .with_queue("west", "c"),
    );
    broker.fail_directory("west");
    let operator = operator(broker.clone(), BatchSettings::default());
    let namespaces = vec!["east".to_string(), "west".to_string()];

    let sent = operator
        .send_to_namespaces(&namespaces, &JobRequest::new("sync", 2), 2)
        .await;

    assert!(!sent.all_succeeded());
    assert_eq!(sent.failed_targets(), vec!["west"]);
    assert_eq!(broker.ready_count(&locator("east", "a")), 2);
}

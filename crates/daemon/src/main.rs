//! JobRelay - Main Entry Point
//! Broker queues in, Kubernetes Jobs out, plus an administrative JSON-RPC surface

mod settings;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import workspace crates
use jobrelay_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use jobrelay_core::application::{
    shutdown_channel, BatchOperator, BatchSettings, MessageProcessor, ProcessorSettings,
};
use jobrelay_core::config::Settings;
use jobrelay_infra_kube::KubeWorkloadLauncher;
use jobrelay_infra_servicebus::ServiceBusRestClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LOG_FORMAT_ENV: &str = "JOBRELAY_LOG_FORMAT";
const DEFAULT_LOG_FILTER: &str = "jobrelay=info";
const FAULT_CHANNEL_CAPACITY: usize = 64;
/// How long shutdown waits for the processor to settle its in-flight message
const PROCESSOR_STOP_TIMEOUT: Duration = Duration::from_secs(30);

fn init_logging(settings: &Settings) -> Result<()> {
    let log_format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| settings.log.format.clone());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (resolved once, passed explicitly from here on)
    let settings = settings::load_settings()?;

    // 2. Initialize logging
    init_logging(&settings)?;
    info!("JobRelay v{} starting...", VERSION);

    // 3. Orchestrator adapter
    let launcher = Arc::new(KubeWorkloadLauncher::connect(settings.jobs.clone()).await?);
    info!(
        namespace = %settings.jobs.namespace,
        image = %settings.jobs.container_image(),
        "Kubernetes client ready"
    );

    // 4. Broker adapter, only when a namespace is configured
    let broker = if settings.is_using_broker() {
        let namespaces = settings.broker_namespaces();
        info!(namespaces = ?namespaces, "Broker namespaces configured");
        Some(Arc::new(ServiceBusRestClient::from_settings(&settings.broker)?))
    } else {
        warn!("No broker namespace configured, message operations are disabled");
        None
    };

    let batch = broker.as_ref().map(|broker| {
        Arc::new(BatchOperator::new(
            broker.clone(),
            broker.clone(),
            BatchSettings::from(&settings.broker),
        ))
    });

    let mut handler = RpcHandler::new(settings.clone(), batch, launcher.clone(), launcher.clone());
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // 5. Message processor
    let processor_handle = match (
        settings.broker.start_processor,
        settings.processor_locator()?,
        broker.as_ref(),
    ) {
        (true, Some(source), Some(broker)) => {
            info!(source = %source, "Starting message processor...");
            let (processor, mut faults) = MessageProcessor::new(
                source,
                broker.clone(),
                launcher.clone(),
                ProcessorSettings::from(&settings),
            )
            .with_fault_channel(FAULT_CHANNEL_CAPACITY);
            handler = handler.with_processor_state(processor.subscribe_state());

            tokio::spawn(async move {
                while let Some(fault) = faults.recv().await {
                    debug!(kind = ?fault.kind, message_id = ?fault.message_id, error = %fault.error, "Processor fault");
                }
            });

            let token = shutdown_rx.clone();
            Some(tokio::spawn(async move { processor.run(token).await }))
        }
        _ => {
            info!("Message processor disabled");
            None
        }
    };

    // 6. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_server = RpcServer::new(RpcServerConfig::from(&settings.rpc), handler);
    let rpc_handle = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!("System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;

    if let Some(handle) = processor_handle {
        match tokio::time::timeout(PROCESSOR_STOP_TIMEOUT, handle).await {
            Ok(Ok(stats)) => info!(
                completed = stats.completed,
                abandoned = stats.abandoned,
                dead_lettered = stats.dead_lettered,
                faults = stats.faults,
                "Message processor stopped"
            ),
            Ok(Err(e)) => warn!(error = %e, "Message processor task failed"),
            Err(_) => warn!("Message processor did not stop in time"),
        }
    }

    info!("Shutdown complete.");
    Ok(())
}

//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP, bound to the configured address.

use crate::handler::RpcHandler;
use crate::types::{
    CreateJobRequest, PurgeMessagesRequest, ReceiveMessagesRequest, SendMessagesRequest,
};
use jobrelay_core::config::RpcSettings;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::sync::Arc;
use tracing::info;

/// Method names, versioned
pub mod method {
    pub const MESSAGES_SEND: &str = "messages.send.v1";
    pub const MESSAGES_RECEIVE: &str = "messages.receive.v1";
    pub const MESSAGES_PURGE: &str = "messages.purge.v1";
    pub const JOBS_CREATE: &str = "jobs.create.v1";
    pub const CLUSTER_NAMESPACES: &str = "cluster.namespaces.v1";
    pub const CLUSTER_PODS: &str = "cluster.pods.v1";
    pub const ADMIN_STATUS: &str = "admin.status.v1";
}

/// RPC Server Configuration
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self::from(&RpcSettings::default())
    }
}

impl From<&RpcSettings> for RpcServerConfig {
    fn from(settings: &RpcSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Build the method table
    pub fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method(method::MESSAGES_SEND, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SendMessagesRequest = params.parse()?;
                    handler.send_messages(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method(method::MESSAGES_RECEIVE, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ReceiveMessagesRequest = params.parse()?;
                    handler.receive_messages(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method(method::MESSAGES_PURGE, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: PurgeMessagesRequest = params.parse()?;
                    handler.purge_messages(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method(method::JOBS_CREATE, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: CreateJobRequest = params.parse()?;
                    handler.create_job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method(method::CLUSTER_NAMESPACES, move |_, _, _| {
                let handler = handler.clone();
                async move { handler.list_namespaces().await }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method(method::CLUSTER_PODS, move |_, _, _| {
                let handler = handler.clone();
                async move { handler.list_pods().await }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method(method::ADMIN_STATUS, move |_, _, _| {
                let handler = handler.clone();
                async move { handler.status().await }
            })
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let module = self.module()?;
        info!("JSON-RPC server started successfully");

        Ok(server.start(module))
    }
}

// Port Layer - Interfaces for external dependencies

pub mod message_broker;
pub mod queue_directory;
pub mod workload_launcher;

// Re-exports
pub use message_broker::MessageBroker;
pub use queue_directory::QueueDirectory;
pub use workload_launcher::{ClusterInspector, WorkloadLauncher};

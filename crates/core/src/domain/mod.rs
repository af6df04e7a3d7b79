// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job_request;
pub mod locator;
pub mod message;
pub mod workload;

// Re-exports
pub use error::DomainError;
pub use job_request::{JobRequest, JobRequestMessageBody};
pub use locator::NamespaceQueueLocator;
pub use message::{BrokerMessage, OutgoingMessage, ReceivedMessage};
pub use workload::{LaunchOutcome, WorkloadCreationResult};

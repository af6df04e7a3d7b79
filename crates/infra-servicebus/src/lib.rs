// JobRelay Infrastructure - Service Bus Adapters
// Implements: QueueDirectory, MessageBroker over the Service Bus REST surface

pub mod auth;
pub mod client;
pub mod wire;

pub use auth::Credential;
pub use client::ServiceBusRestClient;

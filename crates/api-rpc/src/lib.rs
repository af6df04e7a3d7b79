//! JSON-RPC API Layer
//!
//! Administrative surface of the JobRelay daemon: bulk message operations,
//! one-off job creation and read-only cluster listings.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};

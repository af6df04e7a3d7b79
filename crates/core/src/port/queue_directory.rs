// Queue Directory Port (Interface)

use crate::error::Result;
use async_trait::async_trait;

/// Administrative read of the queues defined in a broker namespace
#[async_trait]
pub trait QueueDirectory: Send + Sync {
    /// List every queue currently defined in `namespace`.
    ///
    /// Implementations drain any transport-level paging before returning,
    /// so callers get a complete list they can safely fan out over.
    async fn list_queues(&self, namespace: &str) -> Result<Vec<String>>;
}

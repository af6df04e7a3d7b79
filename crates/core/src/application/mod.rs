// Application Layer - Use Cases

pub mod batch;
pub mod processor;
pub mod shutdown;

// Re-exports
pub use batch::{BatchOperator, BatchReport, BatchSettings, QueueOps, QueueOutcome};
pub use processor::{
    Disposition, MessageProcessor, ProcessorFault, ProcessorSettings, ProcessorState,
    ProcessorStats,
};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

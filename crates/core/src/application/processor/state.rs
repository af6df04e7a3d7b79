// Processor states, dispositions and faults

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dead-letter reason recorded when the launcher rejects a request
pub const WORKLOAD_CREATION_FAILED: &str = "WorkloadCreationFailed";

/// Lifecycle of the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessorState {
    Subscribing,
    Idle,
    Handling,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    MalformedPayload,
    MissingJobName,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPayload => write!(f, "MalformedPayload"),
            Self::MissingJobName => write!(f, "MissingJobName"),
        }
    }
}

/// Terminal outcome of one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Workload created, message deleted
    Completed,
    /// Content unusable, message returned to the queue
    Abandoned(AbandonReason),
    /// Launcher rejected the request, message parked for inspection
    DeadLettered { description: String },
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Abandoned(_) => "abandoned",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Counters accumulated over one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub completed: u64,
    pub abandoned: u64,
    pub dead_lettered: u64,
    pub faults: u64,
}

impl ProcessorStats {
    pub fn record(&mut self, disposition: &Disposition) {
        match disposition {
            Disposition::Completed => self.completed += 1,
            Disposition::Abandoned(_) => self.abandoned += 1,
            Disposition::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }

    pub fn handled(&self) -> u64 {
        self.completed + self.abandoned + self.dead_lettered
    }
}

/// Which transport step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Receive,
    Settle,
    RenewLock,
}

/// Transport fault observed by the processor. Never changes a disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorFault {
    pub kind: FaultKind,
    pub message_id: Option<String>,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_record() {
        let mut stats = ProcessorStats::default();
        stats.record(&Disposition::Completed);
        stats.record(&Disposition::Abandoned(AbandonReason::MissingJobName));
        stats.record(&Disposition::DeadLettered {
            description: "Job NOT created: Duplicate".to_string(),
        });

        assert_eq!(stats.completed, 1);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.handled(), 3);
    }
}

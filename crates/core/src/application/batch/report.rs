// Fan-out result aggregation

use crate::domain::ReceivedMessage;
use crate::error::AppError;

/// Outcome of the task run for one target (`"ns/queue"`, or `"ns"` when the
/// namespace's queues could not be listed)
#[derive(Debug)]
pub struct QueueOutcome<T> {
    pub target: String,
    pub result: Result<T, AppError>,
}

/// Per-task results of a fan-out, in the order the tasks were started.
///
/// Built from task return values collected by the join, never from a shared
/// accumulator.
#[derive(Debug)]
pub struct BatchReport<T> {
    outcomes: Vec<QueueOutcome<T>>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn push(&mut self, target: impl Into<String>, result: Result<T, AppError>) {
        self.outcomes.push(QueueOutcome {
            target: target.into(),
            result,
        });
    }

    pub fn merge(&mut self, other: BatchReport<T>) {
        self.outcomes.extend(other.outcomes);
    }

    /// No task was started: nothing to do, which is not the same as success
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn outcomes(&self) -> &[QueueOutcome<T>] {
        &self.outcomes
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (o.target.as_str(), v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &AppError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.target.as_str(), e)))
    }

    pub fn failed_targets(&self) -> Vec<String> {
        self.failures().map(|(target, _)| target.to_string()).collect()
    }

    pub fn into_outcomes(self) -> Vec<QueueOutcome<T>> {
        self.outcomes
    }
}

impl BatchReport<usize> {
    /// Sum over the tasks that succeeded
    pub fn total(&self) -> usize {
        self.successes().map(|(_, n)| *n).sum()
    }
}

impl BatchReport<Vec<ReceivedMessage>> {
    /// Every task succeeded and every message in it was acknowledged
    pub fn all_received(&self) -> bool {
        self.outcomes.iter().all(|o| match &o.result {
            Ok(messages) => messages.iter().all(|m| m.succeeded),
            Err(_) => false,
        })
    }

    pub fn message_count(&self) -> usize {
        self.successes().map(|(_, messages)| messages.len()).sum()
    }
}

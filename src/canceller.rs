/// Cancel the interruptible part of the live task set on the first Ctrl-C.
///
/// A task is interruptible when its label contains any configured pattern.
/// Everything else (cleanup, finalization) is protected and left running.
use crate::tasks::{TaskHandle, TaskSet};

pub struct TaskCanceller {
    patterns: Vec<String>,
}

impl TaskCanceller {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn is_interruptible(&self, label: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| label.contains(pattern.as_str()))
    }

    /// Request cancellation of every unfinished interruptible task and return
    /// their labels.
    ///
    /// If the calling task is itself interruptible it is cancelled last, so
    /// the rest of the set is handled before its own abort lands at its next
    /// `.await`. Does not wait for any task to stop.
    pub fn cancel_interruptible(&self, tasks: &TaskSet) -> Vec<String> {
        let current = tokio::task::try_id();
        let mut cancelled = Vec::new();
        let mut own: Option<TaskHandle> = None;

        for task in tasks.live() {
            if !self.is_interruptible(task.label()) {
                tracing::debug!(label = %task.label(), "leaving protected task running");
                continue;
            }
            if Some(task.id()) == current {
                own = Some(task);
                continue;
            }
            tracing::debug!(label = %task.label(), "cancelling task");
            task.cancel();
            cancelled.push(task.label().to_string());
        }

        if let Some(task) = own {
            if !task.is_finished() {
                tracing::debug!(label = %task.label(), "cancelling current task");
                task.cancel();
                cancelled.push(task.label().to_string());
            }
        }

        cancelled
    }
}

//! In-memory task registry: the single source of truth for status reporting.
//!
//! Keyed by the externally supplied task id. Not persisted; all state is
//! lost on restart. The one unusual contract is
//! [`TaskRegistry::read_and_evict_if_failed`]: a `failed` task is removed
//! the first time its status is successfully read, so a failure is visible
//! exactly once. This keeps error state from accumulating without bound; a
//! time-based eviction policy could replace it, but the externally observed
//! one-shot behavior is relied upon by clients.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

/// Task lifecycle states. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One tracked task. Mutated only by the worker executing it (and by the
/// eviction side effect of a failed status read).
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub status: TaskStatus,
    pub message: String,
    /// Unix seconds at submission.
    pub created_at: u64,
    pub label: i64,
    /// Artifact name mapping, populated on completion.
    pub result_files: Option<HashMap<String, String>>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task id '{0}' already exists")]
    DuplicateTaskId(String),
}

/// Thread-safe task store shared between the API boundary and the workers.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending task. A duplicate id is rejected without touching
    /// the existing task's state.
    pub fn create(&self, task_id: &str, label: i64, message: &str) -> Result<(), RegistryError> {
        use dashmap::mapref::entry::Entry;
        match self.tasks.entry(task_id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateTaskId(task_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Task {
                    status: TaskStatus::Pending,
                    message: message.to_string(),
                    created_at: unix_now(),
                    label,
                    result_files: None,
                });
                Ok(())
            }
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Plain read without the eviction side effect (used by result and
    /// download queries).
    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Status read with the one-shot failure contract: if the task is
    /// `failed`, it is evicted by this read and subsequent reads see
    /// nothing. Removal and read happen under one map guard, so two
    /// concurrent readers cannot both observe the failed state.
    pub fn read_and_evict_if_failed(&self, task_id: &str) -> Option<Task> {
        if let Some((_, task)) = self
            .tasks
            .remove_if(task_id, |_, task| task.status == TaskStatus::Failed)
        {
            return Some(task);
        }
        self.get(task_id)
    }

    pub fn set_processing(&self, task_id: &str, message: &str) {
        self.update(task_id, TaskStatus::Processing, message);
    }

    /// Updates only the progress message, keeping the current status.
    pub fn set_message(&self, task_id: &str, message: &str) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.message = message.to_string();
        }
    }

    pub fn set_completed(&self, task_id: &str, result_files: HashMap<String, String>) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.message = "processing complete".to_string();
            task.result_files = Some(result_files);
        }
    }

    pub fn set_failed(&self, task_id: &str, message: &str) {
        self.update(task_id, TaskStatus::Failed, message);
    }

    fn update(&self, task_id: &str, status: TaskStatus, message: &str) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = status;
            task.message = message.to_string();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_duplicate_without_mutating_first() {
        let registry = TaskRegistry::new();
        registry.create("t1", 1, "first").unwrap();
        registry.set_processing("t1", "working");

        let err = registry.create("t1", 0, "second").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTaskId(_)));

        let task = registry.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.message, "working");
        assert_eq!(task.label, 1);
    }

    #[test]
    fn failed_task_visible_exactly_once() {
        let registry = TaskRegistry::new();
        registry.create("t1", 0, "queued").unwrap();
        registry.set_failed("t1", "boom");

        let first = registry.read_and_evict_if_failed("t1").unwrap();
        assert_eq!(first.status, TaskStatus::Failed);
        assert_eq!(first.message, "boom");

        assert!(registry.read_and_evict_if_failed("t1").is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn concurrent_readers_observe_failure_at_most_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};

        let registry = Arc::new(TaskRegistry::new());
        for round in 0..200 {
            let task_id = format!("t{round}");
            registry.create(&task_id, 0, "queued").unwrap();
            registry.set_failed(&task_id, "boom");

            let barrier = Arc::new(Barrier::new(4));
            let seen = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    let barrier = Arc::clone(&barrier);
                    let seen = Arc::clone(&seen);
                    let task_id = task_id.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        if registry.read_and_evict_if_failed(&task_id).is_some() {
                            seen.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(seen.load(Ordering::SeqCst), 1, "round {round}");
            assert!(registry.get(&task_id).is_none());
        }
    }

    #[test]
    fn non_failed_reads_do_not_evict() {
        let registry = TaskRegistry::new();
        registry.create("t1", 0, "queued").unwrap();
        assert!(registry.read_and_evict_if_failed("t1").is_some());
        assert!(registry.read_and_evict_if_failed("t1").is_some());

        registry.set_completed("t1", HashMap::new());
        assert!(registry.read_and_evict_if_failed("t1").is_some());
        assert!(registry.read_and_evict_if_failed("t1").is_some());
    }
}

// Task registry
//
// Concurrent map from source URL to the task currently tracking it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use super::task::{TransferState, TransferTask};

/// Number of registered tasks per state
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StateCounts {
    pub total: usize,
    pub idle: usize,
    pub running: usize,
    pub paused: usize,
    pub failed: usize,
}

/// Concurrency-safe store of active transfers keyed by source id
///
/// Entries leave the registry only when their transfer completes or is
/// cancelled; paused and failed transfers stay inspectable.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, Arc<TransferTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, replacing any previous entry for the same source id
    pub fn register(&self, task: Arc<TransferTask>) -> Option<Arc<TransferTask>> {
        self.tasks.insert(task.source_id(), task)
    }

    /// Insert a task unless one is already registered for its source id
    ///
    /// Returns the registered task and whether `task` was inserted.
    pub fn get_or_register(&self, task: Arc<TransferTask>) -> (Arc<TransferTask>, bool) {
        match self.tasks.entry(task.source_id()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                (task, true)
            }
        }
    }

    pub fn lookup(&self, source_id: &str) -> Option<Arc<TransferTask>> {
        self.tasks.get(source_id).map(|entry| entry.value().clone())
    }

    /// Remove the entry for `source_id`; absent keys are ignored
    pub fn remove(&self, source_id: &str) -> Option<Arc<TransferTask>> {
        self.tasks.remove(source_id).map(|(_, task)| task)
    }

    /// Remove `task` only if it is still the registered entry for its source
    pub fn remove_if_same(&self, task: &Arc<TransferTask>) -> bool {
        self.tasks
            .remove_if(&task.source_id(), |_, current| Arc::ptr_eq(current, task))
            .is_some()
    }

    /// Task for a source other than `source_id` that writes to `path`
    pub fn destination_owner(&self, path: &Path, source_id: &str) -> Option<Arc<TransferTask>> {
        self.tasks
            .iter()
            .filter(|entry| entry.key() != source_id)
            .find(|entry| entry.value().destination_path() == path)
            .map(|entry| entry.value().clone())
    }

    pub fn list_all(&self) -> Vec<Arc<TransferTask>> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count_by_state(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for task in self.list_all() {
            counts.total += 1;
            match task.state() {
                TransferState::Idle => counts.idle += 1,
                TransferState::Running => counts.running += 1,
                TransferState::Paused => counts.paused += 1,
                TransferState::Failed => counts.failed += 1,
                TransferState::Completed | TransferState::Cancelled => {}
            }
        }
        counts
    }
}

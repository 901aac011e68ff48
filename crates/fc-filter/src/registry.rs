//! Per-event-type worker registry (§4.D). A thin concurrent map from
//! event type to a live worker's mailbox handle — the supervisor's only
//! shared mutable state.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::worker::WorkerMessage;

/// Mailbox + task handle for one running `FilterWorker`.
pub struct WorkerHandle {
    pub mailbox: mpsc::Sender<WorkerMessage>,
    pub task: JoinHandle<()>,
}

/// `event_type -> WorkerHandle`. Entries are removed by the supervisor
/// once it observes a worker's task has finished (idle timeout or a
/// liveness-driven self-shutdown), never by the worker itself.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: DashMap<String, WorkerHandle>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
        }
    }

    pub fn get_mailbox(&self, event_type: &str) -> Option<mpsc::Sender<WorkerMessage>> {
        self.workers.get(event_type).map(|h| h.mailbox.clone())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.workers.contains_key(event_type)
    }

    pub fn insert(&self, event_type: String, handle: WorkerHandle) {
        self.workers.insert(event_type, handle);
    }

    pub fn remove(&self, event_type: &str) {
        self.workers.remove(event_type);
    }

    /// Drops registry entries whose worker task has already exited, so a
    /// crashed or idled-out worker doesn't linger as a dead mailbox that
    /// silently swallows sends (§5).
    pub fn reap_finished(&self) {
        self.workers.retain(|_, handle| !handle.task.is_finished());
    }

    pub fn event_types(&self) -> Vec<String> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

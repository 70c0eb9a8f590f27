//! Process-wide map of running tasks.
//!
//! The registry is the only structure touched concurrently by intake, cancel
//! requests and executor loops. Entries are created by [`TaskRegistry::register`]
//! and removed when the returned [`Registration`] is dropped, so an entry exists
//! exactly while its executor loop runs.

use crate::error::ExecutorError;
use crate::task::TaskId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A live OS process owned by a task, as far as the registry needs to know.
#[async_trait::async_trait]
pub trait OwnedProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Short description for logs (script name, case, round).
    fn label(&self) -> &str;

    /// Terminate the process and its descendants. Must not fail.
    async fn terminate(&self);
}

/// Observer side of a task's cancellation flag.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone without cancelling: never resolves.
                std::future::pending::<()>().await;
            }
        }
    }

    /// A signal that never fires, for running outside a registry.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }
}

/// Mutable live state of one running task.
pub struct TaskRuntimeState {
    task_id: TaskId,
    started_at: DateTime<Utc>,
    cancel_tx: watch::Sender<bool>,
    processes: Mutex<HashMap<u64, Arc<dyn OwnedProcess>>>,
    next_key: AtomicU64,
}

impl TaskRuntimeState {
    fn new(task_id: TaskId) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            task_id,
            started_at: Utc::now(),
            cancel_tx,
            processes: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(0),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.cancel_tx.subscribe(),
        }
    }

    /// Start owning `process`. Ownership ends when the returned guard drops.
    pub fn track(self: &Arc<Self>, process: Arc<dyn OwnedProcess>) -> ProcessTracking {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %self.task_id, pid = ?process.pid(), process = process.label(), "tracking process");
        self.lock_processes().insert(key, process);
        ProcessTracking {
            state: Arc::clone(self),
            key,
        }
    }

    pub fn active_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .lock_processes()
            .values()
            .filter_map(|p| p.pid())
            .collect();
        pids.sort_unstable();
        pids
    }

    pub fn active_process_count(&self) -> usize {
        self.lock_processes().len()
    }

    /// Raise the flag and terminate every owned process tree.
    /// Returns false if cancellation had already been requested.
    pub async fn cancel(&self) -> bool {
        let first = !self.cancel_tx.send_replace(true);

        // Snapshot so no lock is held across the termination awaits.
        let owned: Vec<Arc<dyn OwnedProcess>> = self.lock_processes().values().cloned().collect();
        for process in owned {
            info!(task_id = %self.task_id, pid = ?process.pid(), process = process.label(), "terminating owned process");
            process.terminate().await;
        }
        first
    }

    fn lock_processes(&self) -> MutexGuard<'_, HashMap<u64, Arc<dyn OwnedProcess>>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes a tracked process from its task when dropped.
pub struct ProcessTracking {
    state: Arc<TaskRuntimeState>,
    key: u64,
}

impl Drop for ProcessTracking {
    fn drop(&mut self) {
        self.state.lock_processes().remove(&self.key);
    }
}

pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, Arc<TaskRuntimeState>>>,
    max_concurrent: usize,
}

impl TaskRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Admit a task. Rejects duplicates and anything over the concurrency ceiling.
    pub fn register(self: &Arc<Self>, task_id: &TaskId) -> Result<Registration, ExecutorError> {
        let mut tasks = self.lock_tasks();
        if tasks.contains_key(task_id) {
            return Err(ExecutorError::TaskAlreadyRunning(task_id.to_string()));
        }
        if tasks.len() >= self.max_concurrent {
            return Err(ExecutorError::CapacityExceeded {
                running: tasks.len(),
                limit: self.max_concurrent,
            });
        }

        let state = Arc::new(TaskRuntimeState::new(task_id.clone()));
        tasks.insert(task_id.clone(), Arc::clone(&state));
        info!(task_id = %task_id, running = tasks.len(), "task registered");

        Ok(Registration {
            registry: Arc::clone(self),
            state,
        })
    }

    pub fn lookup(&self, task_id: &TaskId) -> Option<Arc<TaskRuntimeState>> {
        self.lock_tasks().get(task_id).cloned()
    }

    /// Cancel a live task. True iff an entry was found; repeated calls are harmless.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        let Some(state) = self.lookup(task_id) else {
            warn!(task_id = %task_id, "cancel requested for unknown or finished task");
            return false;
        };

        if state.cancel().await {
            info!(task_id = %task_id, "task cancellation initiated");
        } else {
            debug!(task_id = %task_id, "task already cancelling");
        }
        true
    }

    /// Remove an entry regardless of who owns it. Normally the [`Registration`]
    /// guard does this.
    pub fn unregister(&self, task_id: &TaskId) -> bool {
        self.lock_tasks().remove(task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock_tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock_tasks().keys().cloned().collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<TaskRuntimeState>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Proof of a live registry entry. Dropping it removes the entry, but only if
/// the entry is still this registration's (a later task may reuse the id).
pub struct Registration {
    registry: Arc<TaskRegistry>,
    state: Arc<TaskRuntimeState>,
}

impl Registration {
    pub fn state(&self) -> &Arc<TaskRuntimeState> {
        &self.state
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut tasks = self.registry.lock_tasks();
        let ours = tasks
            .get(self.state.task_id())
            .is_some_and(|current| Arc::ptr_eq(current, &self.state));
        if ours {
            tasks.remove(self.state.task_id());
            info!(task_id = %self.state.task_id(), running = tasks.len(), "task unregistered");
        }
    }
}

//! Cooperative task scheduler.
//!
//! Every handler invocation runs as its own task. Tasks give up the thread
//! only at suspension points ([`suspend`], [`yield_now`]); a task that never
//! reaches one runs to completion. The scheduler runs on the host's tokio
//! runtime, and the bot binary uses a current-thread runtime so that exactly
//! one task executes at a time.
//!
//! Failures stay inside the task that produced them: an `Err` or a panic is
//! caught at the task boundary, logged as a [`DispatchFault`] together with
//! the owner and triggering event, and the task is marked
//! [`TaskState::Failed`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sprocket_core::scheduler::{Scheduler, SuspendReason, TaskMeta, suspend};
//!
//! let scheduler = Scheduler::new();
//! let handle = scheduler.spawn(TaskMeta::new("karma", "message from alice"), async {
//!     let rows = suspend(SuspendReason::Query, run_query()).await;
//!     Ok(())
//! });
//! handle.wait().await;
//! ```

mod suspend;
mod task;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span, error, trace, warn};

pub use suspend::{current_task, suspend, yield_now};
pub use task::{SuspendReason, TaskHandle, TaskMeta, TaskState};

use crate::error::{BoxError, DispatchFault};
use crate::id::{PluginId, TaskId};
use task::{TaskRecord, Tracked};

/// A point-in-time view of one live task.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub plugin: Option<PluginId>,
    pub owner: Arc<str>,
    pub label: String,
    pub state: TaskState,
}

#[derive(Default)]
struct SchedulerInner {
    tracker: TaskTracker,
    live: Mutex<HashMap<TaskId, Arc<TaskRecord>>>,
}

/// Spawns and tracks handler tasks. Cloning yields another handle to the
/// same scheduler.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task. Must be called from within a tokio runtime.
    ///
    /// The returned handle is informational; nothing ever needs to await it.
    pub fn spawn<F>(&self, meta: TaskMeta, body: F) -> TaskHandle
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let id = TaskId::next();
        let record = Arc::new(TaskRecord::new(id, meta));
        self.inner.live.lock().insert(id, Arc::clone(&record));

        let span = debug_span!(
            "task",
            task = %id,
            owner = %record.meta().owner,
        );
        let tracked = suspend::scope(
            Arc::clone(&record),
            Tracked::new(Arc::clone(&record), Box::pin(body)),
        );
        let finished = Arc::clone(&record);
        let inner = Arc::clone(&self.inner);

        self.inner.tracker.spawn(
            async move {
                let fault = match AssertUnwindSafe(tracked).catch_unwind().await {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(DispatchFault::Error(err)),
                    Err(payload) => Some(DispatchFault::from_panic(payload)),
                };

                match fault {
                    None => {
                        finished.set_state(TaskState::Completed);
                        trace!("Task completed");
                    }
                    Some(fault) => {
                        finished.set_state(TaskState::Failed);
                        let meta = finished.meta();
                        error!(
                            plugin = %meta.owner,
                            plugin_id = ?meta.plugin,
                            event = %meta.label,
                            panic = fault.is_panic(),
                            error = %fault,
                            "Handler task failed"
                        );
                    }
                }
                inner.live.lock().remove(&id);
            }
            .instrument(span),
        );

        trace!(task = %id, "Task spawned");
        TaskHandle { record }
    }

    /// Handles to every task that has not finished yet, oldest first.
    pub fn handles(&self) -> Vec<TaskHandle> {
        let mut records: Vec<_> = self.inner.live.lock().values().cloned().collect();
        records.sort_by_key(|record| record.id());
        records
            .into_iter()
            .map(|record| TaskHandle { record })
            .collect()
    }

    /// Snapshots of every unfinished task, oldest first.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.handles()
            .into_iter()
            .map(|handle| {
                let meta = handle.meta();
                TaskSnapshot {
                    id: handle.id(),
                    plugin: meta.plugin,
                    owner: Arc::clone(&meta.owner),
                    label: meta.label.clone(),
                    state: handle.state(),
                }
            })
            .collect()
    }

    /// Number of unfinished tasks owned by `plugin`.
    pub fn in_flight(&self, plugin: PluginId) -> usize {
        self.inner
            .live
            .lock()
            .values()
            .filter(|record| record.meta().plugin == Some(plugin))
            .count()
    }

    /// Number of unfinished tasks.
    pub fn len(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tracker.is_empty()
    }

    /// Waits until every task spawned so far, and every task they spawn, has
    /// finished.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Waits up to `grace` for outstanding tasks. Returns `false` if some
    /// were still running when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let pending = self.len();
        debug!(pending, "Scheduler shutting down");
        self.inner.tracker.close();
        let drained = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                remaining = self.len(),
                grace_ms = grace.as_millis() as u64,
                "Tasks still running after shutdown grace period"
            );
        }
        drained
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.len())
            .finish()
    }
}

//! Suspension points.
//!
//! Storage and HTTP wrap their awaits in [`suspend`] so the scheduler can
//! report why a task is waiting. Outside a scheduler task the wrapper is
//! transparent.

use std::future::Future;
use std::sync::Arc;

use tracing::trace;

use super::task::{SuspendReason, TaskRecord};
use crate::id::TaskId;

tokio::task_local! {
    static CURRENT: Arc<TaskRecord>;
}

pub(crate) async fn scope<F: Future>(record: Arc<TaskRecord>, future: F) -> F::Output {
    CURRENT.scope(record, future).await
}

/// The id of the scheduler task currently being polled, if any.
pub fn current_task() -> Option<TaskId> {
    CURRENT.try_with(|record| record.id()).ok()
}

struct PointGuard {
    record: Arc<TaskRecord>,
    previous: Option<SuspendReason>,
}

impl Drop for PointGuard {
    fn drop(&mut self) {
        self.record.leave(self.previous);
    }
}

/// Awaits `future` as a suspension point of kind `reason`.
///
/// While the future is pending the current task is reported as
/// `Suspended(reason)`; other tasks run in the meantime.
pub async fn suspend<F: Future>(reason: SuspendReason, future: F) -> F::Output {
    let Ok(record) = CURRENT.try_with(Arc::clone) else {
        trace!(%reason, "Suspension point outside a scheduler task");
        return future.await;
    };
    let _guard = PointGuard {
        previous: record.enter(reason),
        record,
    };
    future.await
}

/// Gives other runnable tasks a chance to run.
pub async fn yield_now() {
    suspend(SuspendReason::Yield, tokio::task::yield_now()).await;
}

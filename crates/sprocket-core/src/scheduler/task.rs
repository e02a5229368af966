//! Task records and the polling wrapper that keeps them current.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

use futures::future::BoxFuture;
use futures::task::{ArcWake, waker};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::BoxError;
use crate::id::{PluginId, TaskId};

/// Why a task is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    /// Awaiting a storage query.
    Query,
    /// Awaiting an outbound HTTP call.
    Http,
    /// Voluntarily gave up the thread.
    Yield,
    /// Waiting on something that is not a named suspension point.
    Other,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Http => "http",
            Self::Yield => "yield",
            Self::Other => "other",
        })
    }
}

/// Lifecycle of a scheduler task.
///
/// ```text
/// Runnable -> Running -> Suspended(reason) -> Runnable -> ... -> Completed | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Runnable,
    Running,
    Suspended(SuspendReason),
    Completed,
    Failed,
}

impl TaskState {
    /// `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_suspended(self) -> bool {
        matches!(self, Self::Suspended(_))
    }
}

/// Who a task belongs to and what triggered it.
#[derive(Debug, Clone)]
pub struct TaskMeta {
    /// Owning plugin, if any.
    pub plugin: Option<PluginId>,
    /// Owner name used in logs (plugin name or a subsystem).
    pub owner: Arc<str>,
    /// Free-form label, usually the triggering event's summary.
    pub label: String,
}

impl TaskMeta {
    pub fn new(owner: impl Into<Arc<str>>, label: impl Into<String>) -> Self {
        Self {
            plugin: None,
            owner: owner.into(),
            label: label.into(),
        }
    }

    pub fn with_plugin(mut self, plugin: PluginId) -> Self {
        self.plugin = Some(plugin);
        self
    }
}

/// Shared, observable state of one task.
pub(crate) struct TaskRecord {
    id: TaskId,
    meta: TaskMeta,
    state: watch::Sender<TaskState>,
    point: Mutex<Option<SuspendReason>>,
    woken: AtomicBool,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId, meta: TaskMeta) -> Self {
        Self {
            id,
            meta,
            state: watch::Sender::new(TaskState::Runnable),
            point: Mutex::new(None),
            woken: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.send_replace(state);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    /// Marks entry into a suspension point, returning the enclosing one.
    pub(crate) fn enter(&self, reason: SuspendReason) -> Option<SuspendReason> {
        self.point.lock().replace(reason)
    }

    /// Restores the suspension point that was active before [`enter`](Self::enter).
    pub(crate) fn leave(&self, previous: Option<SuspendReason>) {
        *self.point.lock() = previous;
    }

    fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        self.state.send_if_modified(|state| {
            if state.is_suspended() {
                *state = TaskState::Runnable;
                true
            } else {
                false
            }
        });
    }

    fn park(&self) {
        let next = if self.woken.load(Ordering::Acquire) {
            TaskState::Runnable
        } else {
            TaskState::Suspended(self.point.lock().unwrap_or(SuspendReason::Other))
        };
        self.set_state(next);
    }
}

/// Forwards wakeups to the executor after flagging the task runnable.
struct WakeProxy {
    record: Arc<TaskRecord>,
    inner: Waker,
}

impl ArcWake for WakeProxy {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.record.wake();
        arc_self.inner.wake_by_ref();
    }
}

/// Wraps a task body and mirrors each poll into its [`TaskRecord`].
pub(crate) struct Tracked {
    record: Arc<TaskRecord>,
    body: BoxFuture<'static, Result<(), BoxError>>,
}

impl Tracked {
    pub(crate) fn new(record: Arc<TaskRecord>, body: BoxFuture<'static, Result<(), BoxError>>) -> Self {
        Self { record, body }
    }
}

impl Future for Tracked {
    type Output = Result<(), BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.record.woken.store(false, Ordering::Release);
        this.record.set_state(TaskState::Running);

        let proxy = waker(Arc::new(WakeProxy {
            record: Arc::clone(&this.record),
            inner: cx.waker().clone(),
        }));
        let mut proxied = Context::from_waker(&proxy);

        match this.body.as_mut().poll(&mut proxied) {
            Poll::Ready(output) => Poll::Ready(output),
            Poll::Pending => {
                this.record.park();
                Poll::Pending
            }
        }
    }
}

/// A handle to a spawned task. Dropping it does not cancel the task.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) record: Arc<TaskRecord>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.record.id()
    }

    pub fn meta(&self) -> &TaskMeta {
        self.record.meta()
    }

    /// The task's current state.
    pub fn state(&self) -> TaskState {
        self.record.state()
    }

    /// Waits until the task reaches a state accepted by `predicate` and
    /// returns that state.
    pub async fn wait_until(&self, predicate: impl Fn(TaskState) -> bool) -> TaskState {
        let mut rx = self.record.subscribe();
        match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            Err(_) => self.record.state(),
        }
    }

    /// Waits for the task to complete or fail.
    pub async fn wait(&self) -> TaskState {
        self.wait_until(TaskState::is_terminal).await
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("owner", &self.meta().owner)
            .field("state", &self.state())
            .finish()
    }
}

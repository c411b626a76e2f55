//! Task handles and the bodies they wrap.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use taskweave_core::{TaskId, TaskOwner, WorkerId};
use tokio::sync::mpsc;

use super::worker::WorkerCommand;

/// Body of a one-shot task.
pub(crate) type OnceBody = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Body of a periodic task. Shared so pooled firings can borrow it in turn.
pub(crate) type RepeatingBody = Arc<Mutex<Box<dyn FnMut() -> anyhow::Result<()> + Send + 'static>>>;

/// Router-owned map of every task that has not yet finished or been cancelled.
pub(crate) type TaskRegistry = DashMap<TaskId, TaskHandle>;

pub(crate) enum TaskBody {
    Once(OnceBody),
    Repeating(RepeatingBody),
}

impl TaskBody {
    pub(crate) fn once<F>(body: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self::Once(Box::new(body))
    }

    pub(crate) fn repeating<F>(body: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self::Repeating(Arc::new(Mutex::new(Box::new(body))))
    }
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

struct TaskInner {
    id: TaskId,
    owner: TaskOwner,
    worker: WorkerId,
    period: Option<Duration>,
    cancelled: AtomicBool,
    running: AtomicBool,
    notify: mpsc::UnboundedSender<WorkerCommand>,
}

/// Cancellable, inspectable reference to one scheduled unit of work.
///
/// Read-only apart from [`cancel`](Self::cancel). Cloning is cheap and every
/// clone observes the same task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        owner: TaskOwner,
        worker: WorkerId,
        period: Option<Duration>,
        notify: mpsc::UnboundedSender<WorkerCommand>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                owner,
                worker,
                period,
                cancelled: AtomicBool::new(false),
                running: AtomicBool::new(false),
                notify,
            }),
        }
    }

    /// Router-unique id of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The context that submitted this task.
    #[must_use]
    pub fn owner(&self) -> &TaskOwner {
        &self.inner.owner
    }

    /// The worker this task was routed to at submission time.
    #[must_use]
    pub fn domain(&self) -> WorkerId {
        self.inner.worker
    }

    /// Repeat period, or `None` for a one-shot task.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.inner.period
    }

    /// Returns `true` for periodic tasks.
    #[must_use]
    pub fn is_periodic(&self) -> bool {
        self.inner.period.is_some()
    }

    /// Prevents every future firing of this task.
    ///
    /// A body that is already executing runs to completion. The owning worker
    /// is told to drop the queued entry. Calling this more than once is a no-op.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            // Worker may already be gone; the flag alone still blocks firing.
            let _ = self.inner.notify.send(WorkerCommand::Cancel(self.inner.id));
        }
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called. Never reverts.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `true` only while the body is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.inner.running.store(running, Ordering::SeqCst);
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("worker", &self.inner.worker)
            .field("period", &self.inner.period)
            .field("cancelled", &self.is_cancelled())
            .field("running", &self.is_running())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_handle() -> (TaskHandle, mpsc::UnboundedReceiver<WorkerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TaskHandle::new(
            TaskId(7),
            TaskOwner::new("test"),
            WorkerId::Global,
            Some(Duration::from_millis(100)),
            tx,
        );
        (handle, rx)
    }

    #[test]
    fn accessors() {
        let (handle, _rx) = make_handle();
        assert_eq!(handle.id(), TaskId(7));
        assert_eq!(handle.owner().name(), "test");
        assert_eq!(handle.domain(), WorkerId::Global);
        assert_eq!(handle.period(), Some(Duration::from_millis(100)));
        assert!(handle.is_periodic());
        assert!(!handle.is_cancelled());
        assert!(!handle.is_running());
    }

    #[test]
    fn cancel_notifies_worker_once() {
        let (handle, mut rx) = make_handle();
        handle.cancel();
        handle.clone().cancel();
        assert!(handle.is_cancelled());

        assert!(matches!(rx.try_recv(), Ok(WorkerCommand::Cancel(TaskId(7)))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cancel_after_worker_gone_still_sets_flag() {
        let (handle, rx) = make_handle();
        drop(rx);
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn running_flag_is_shared_between_clones() {
        let (handle, _rx) = make_handle();
        let observer = handle.clone();
        handle.set_running(true);
        assert!(observer.is_running());
        handle.set_running(false);
        assert!(!observer.is_running());
    }
}

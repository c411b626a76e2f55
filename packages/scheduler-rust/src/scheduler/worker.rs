//! Domain workers: one tokio task per execution context.
//!
//! Each `DomainWorker` owns a command channel and a deadline-ordered timer
//! heap. The worker loop:
//! 1. Stops when the router's shutdown signal fires (or the router is dropped)
//! 2. Fires every timer whose deadline has passed, in `(deadline, sequence)` order
//! 3. Receives commands: due tasks fire on receipt, later ones join the heap
//!
//! Serial workers run bodies inline, one at a time. The background worker
//! uses the same timing rules but hands each firing to tokio's blocking pool.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskweave_core::{TaskId, WorkerId};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, debug_span, error};

use super::task::{TaskBody, TaskHandle, TaskRegistry};
use crate::config::PeriodicFailurePolicy;
use crate::error::{panic_message, TaskExecutionError};

/// Identifies one router instance, so nested routers never answer
/// `is_current_domain` for each other.
pub(crate) type RouterId = u64;

tokio::task_local! {
    static CURRENT: (RouterId, WorkerId);
}

/// The router and worker the calling code is executing on, if any.
pub(crate) fn current() -> Option<(RouterId, WorkerId)> {
    CURRENT.try_with(|current| *current).ok()
}

/// Worker the calling code is executing on, or `None` outside any task body.
#[must_use]
pub fn current_worker() -> Option<WorkerId> {
    current().map(|(_, worker)| worker)
}

/// Deadlines further out than this are clamped (roughly 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + delay`, clamped so huge delays never overflow the clock.
pub(crate) fn deadline_after(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

// ---------------------------------------------------------------------------
// Commands and timers
// ---------------------------------------------------------------------------

pub(crate) enum WorkerCommand {
    Schedule(ScheduledTask),
    Cancel(TaskId),
}

pub(crate) struct ScheduledTask {
    pub(crate) handle: TaskHandle,
    pub(crate) body: TaskBody,
    pub(crate) deadline: Instant,
}

/// Heap entry ordered by deadline, then by arrival on this worker.
struct Timer {
    deadline: Instant,
    seq: u64,
    task: ScheduledTask,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

// ---------------------------------------------------------------------------
// WorkerContext
// ---------------------------------------------------------------------------

/// Everything a worker loop needs from its router.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) router: RouterId,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) periodic_failure: PeriodicFailurePolicy,
    pub(crate) runtime: Handle,
}

// ---------------------------------------------------------------------------
// DomainWorker
// ---------------------------------------------------------------------------

/// Handle to one running worker loop.
pub(crate) struct DomainWorker {
    id: WorkerId,
    tx: mpsc::UnboundedSender<WorkerCommand>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl DomainWorker {
    /// Spawn the worker loop on the context's runtime.
    pub(crate) fn spawn(
        id: WorkerId,
        ctx: WorkerContext,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = ctx.runtime.clone();
        let worker = WorkerLoop {
            id,
            ctx,
            timers: BinaryHeap::new(),
            next_seq: 0,
        };
        let join = runtime.spawn(worker.run(rx, shutdown));
        debug!(worker = %id, "worker started");
        Self {
            id,
            tx,
            join: Mutex::new(Some(join)),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Sender that task handles use to reach this worker.
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<WorkerCommand> {
        self.tx.clone()
    }

    /// Take the join handle so the caller can wait for the loop to exit.
    pub(crate) fn take_join(&self) -> Option<JoinHandle<()>> {
        self.join.lock().take()
    }
}

// ---------------------------------------------------------------------------
// WorkerLoop
// ---------------------------------------------------------------------------

struct WorkerLoop {
    id: WorkerId,
    ctx: WorkerContext,
    timers: BinaryHeap<Reverse<Timer>>,
    next_seq: u64,
}

impl WorkerLoop {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<WorkerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let next_deadline = self.timers.peek().map(|Reverse(timer)| timer.deadline);

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                () = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                    if next_deadline.is_some() =>
                {
                    self.fire_due();
                }
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        let dropped = self.timers.len();
        self.timers.clear();
        debug!(worker = %self.id, dropped, "worker stopped");
    }

    fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Schedule(task) => {
                if task.deadline <= Instant::now() {
                    self.fire(task);
                } else {
                    self.push(task);
                }
            }
            WorkerCommand::Cancel(id) => {
                self.timers.retain(|Reverse(timer)| timer.task.handle.id() != id);
                self.ctx.registry.remove(&id);
            }
        }
    }

    fn push(&mut self, task: ScheduledTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Reverse(Timer {
            deadline: task.deadline,
            seq,
            task,
        }));
    }

    /// Fire every timer due as of now. Overdue periodic tasks catch up one
    /// firing per elapsed period.
    fn fire_due(&mut self) {
        let now = Instant::now();
        while self
            .timers
            .peek()
            .is_some_and(|Reverse(timer)| timer.deadline <= now)
        {
            if let Some(Reverse(timer)) = self.timers.pop() {
                self.fire(timer.task);
            }
        }
    }

    fn fire(&mut self, task: ScheduledTask) {
        let ScheduledTask {
            handle,
            body,
            deadline,
        } = task;

        if handle.is_cancelled() {
            self.ctx.registry.remove(&handle.id());
            return;
        }

        match body {
            TaskBody::Once(body) => {
                if self.id.is_serial() {
                    execute(&self.ctx, &handle, body);
                    self.ctx.registry.remove(&handle.id());
                } else {
                    let ctx = self.ctx.clone();
                    self.ctx.runtime.spawn_blocking(move || {
                        execute(&ctx, &handle, body);
                        ctx.registry.remove(&handle.id());
                    });
                }
            }
            TaskBody::Repeating(body) => {
                let period = handle.period().unwrap_or(Duration::ZERO);
                if self.id.is_serial() {
                    fire_repeating(&self.ctx, &handle, &body);
                } else {
                    let ctx = self.ctx.clone();
                    let handle = handle.clone();
                    let body = Arc::clone(&body);
                    self.ctx.runtime.spawn_blocking(move || {
                        fire_repeating(&ctx, &handle, &body);
                    });
                }

                // Next firing is measured from the scheduled time, not the
                // actual one, so execution latency never accumulates.
                if handle.is_cancelled() || period.is_zero() {
                    self.ctx.registry.remove(&handle.id());
                } else {
                    self.push(ScheduledTask {
                        handle,
                        body: TaskBody::Repeating(body),
                        deadline: deadline_after(deadline, period),
                    });
                }
            }
        }
    }
}

/// Run one firing of a periodic task and apply the failure policy.
fn fire_repeating(
    ctx: &WorkerContext,
    handle: &TaskHandle,
    body: &Arc<Mutex<Box<dyn FnMut() -> anyhow::Result<()> + Send + 'static>>>,
) {
    let mut body = body.lock();
    if handle.is_cancelled() {
        return;
    }
    let succeeded = execute(ctx, handle, || (*body)());
    if !succeeded && ctx.periodic_failure == PeriodicFailurePolicy::Cancel {
        debug!(task_id = handle.id().0, "cancelling periodic task after failure");
        handle.cancel();
    }
}

/// Run a body with the running flag and worker identity set, catching errors
/// and panics at the dispatch boundary. Returns `true` on success.
fn execute<F>(ctx: &WorkerContext, handle: &TaskHandle, body: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let task_id = handle.id();
    let worker = handle.domain();
    let span = debug_span!("task", task_id = task_id.0, worker = %worker);
    let _entered = span.enter();

    handle.set_running(true);
    let outcome = CURRENT.sync_scope((ctx.router, worker), || {
        panic::catch_unwind(AssertUnwindSafe(body))
    });
    handle.set_running(false);

    let failure = match outcome {
        Ok(Ok(())) => return true,
        Ok(Err(source)) => TaskExecutionError::Failed {
            task_id,
            worker,
            source,
        },
        Err(payload) => TaskExecutionError::Panicked {
            task_id,
            worker,
            message: panic_message(payload.as_ref()),
        },
    };
    error!(task_id = task_id.0, worker = %worker, error = %failure, "task body failed");
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

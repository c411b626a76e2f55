//! Future bridge: the write-once promise a chain completes and the future
//! callers await.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::{FutureExt, Shared};
use parking_lot::Mutex;
use taskweave_core::Domain;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ChainError, ChainStepError, SchedulingError};
use crate::scheduler::{DomainRouter, TaskHandle};

// ---------------------------------------------------------------------------
// ChainStatus
// ---------------------------------------------------------------------------

/// Execution state of a chain.
///
/// State machine: Pending -> Running -> {Completed, Failed, Cancelled}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChainStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl ChainStatus {
    /// Returns `true` for `Completed`, `Failed` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// ChainControl
// ---------------------------------------------------------------------------

/// State shared by a chain's driver, its promise and its future.
#[derive(Debug)]
pub(crate) struct ChainControl {
    status: AtomicU8,
    cancel_requested: AtomicBool,
    pending_step: Mutex<Option<TaskHandle>>,
}

impl ChainControl {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(ChainStatus::Pending as u8),
            cancel_requested: AtomicBool::new(false),
            pending_step: Mutex::new(None),
        }
    }

    pub(crate) fn status(&self) -> ChainStatus {
        ChainStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: ChainStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    /// Pending -> Running. Returns `false` if the chain already left `Pending`.
    pub(crate) fn start(&self) -> bool {
        self.status
            .compare_exchange(
                ChainStatus::Pending as u8,
                ChainStatus::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Flag the chain as cancelled and cancel the step waiting on a worker,
    /// if any. Returns `false` if the chain had already finished or a
    /// cancellation was already requested.
    pub(crate) fn request_cancel(&self) -> bool {
        if self.status().is_terminal() || self.cancel_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(step) = self.pending_step.lock().as_ref() {
            step.cancel();
        }
        true
    }

    /// Record the step now queued on a worker. A cancellation that raced
    /// ahead of this call still reaches the step.
    pub(crate) fn set_pending_step(&self, step: TaskHandle) {
        let mut slot = self.pending_step.lock();
        if self.is_cancel_requested() {
            step.cancel();
        }
        *slot = Some(step);
    }

    pub(crate) fn clear_pending_step(&self) {
        self.pending_step.lock().take();
    }
}

// ---------------------------------------------------------------------------
// Promise
// ---------------------------------------------------------------------------

/// Write side of a [`ChainFuture`]. Every completion method consumes the
/// promise, so a chain settles its future exactly once.
///
/// Dropping an unsettled promise resolves the future as cancelled.
#[derive(Debug)]
pub struct Promise<T> {
    tx: Option<oneshot::Sender<Result<T, ChainError>>>,
    control: Arc<ChainControl>,
}

/// Create a connected promise and future outside of any chain.
#[must_use]
pub fn promise<T>() -> (Promise<T>, ChainFuture<T>) {
    let (tx, rx) = oneshot::channel();
    let control = Arc::new(ChainControl::new());
    (
        Promise {
            tx: Some(tx),
            control: Arc::clone(&control),
        },
        ChainFuture { rx, control },
    )
}

impl<T> Promise<T> {
    /// Resolve the future with `value`.
    pub fn complete(self, value: T) {
        self.settle(ChainStatus::Completed, Ok(value));
    }

    /// Resolve the future with a step failure.
    pub fn complete_exceptionally(self, error: ChainStepError) {
        self.settle(ChainStatus::Failed, Err(ChainError::Failed(Arc::new(error))));
    }

    /// Resolve the future as cancelled.
    pub fn cancel(self) {
        self.settle(ChainStatus::Cancelled, Err(ChainError::Cancelled));
    }

    pub(crate) fn control(&self) -> &Arc<ChainControl> {
        &self.control
    }

    fn settle(mut self, status: ChainStatus, outcome: Result<T, ChainError>) {
        self.control.set_status(status);
        if let Some(tx) = self.tx.take() {
            // Nobody is awaiting; the status still records the outcome.
            let _ = tx.send(outcome);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.tx.is_some() && !self.control.status().is_terminal() {
            self.control.set_status(ChainStatus::Cancelled);
        }
    }
}

// ---------------------------------------------------------------------------
// ChainFuture
// ---------------------------------------------------------------------------

/// Read side of a chain's outcome.
///
/// Resolves to the final value, `ChainError::Failed` or
/// `ChainError::Cancelled`. Use [`shared`](Self::shared) for several readers.
#[derive(Debug)]
#[must_use = "a chain's outcome is only observable through its future"]
pub struct ChainFuture<T> {
    rx: oneshot::Receiver<Result<T, ChainError>>,
    control: Arc<ChainControl>,
}

impl<T> ChainFuture<T> {
    /// Request cancellation.
    ///
    /// Steps that have not started never run; a step already executing
    /// finishes and its result is discarded. Returns `false` if the chain has
    /// already finished or was already cancelled.
    pub fn cancel(&self) -> bool {
        self.control.request_cancel()
    }

    /// Current execution state.
    #[must_use]
    pub fn status(&self) -> ChainStatus {
        self.control.status()
    }

    /// Returns `true` once the chain reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Returns `true` if the chain ended cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == ChainStatus::Cancelled
    }

    /// Cancel the chain if it is still running after `delay`.
    ///
    /// The timer runs on the global domain. Cancel the returned handle to
    /// disarm it.
    ///
    /// # Errors
    ///
    /// Fails like [`DomainRouter::submit_delayed`].
    pub fn cancel_after(
        &self,
        router: &DomainRouter,
        delay: Duration,
    ) -> Result<TaskHandle, SchedulingError> {
        let control = Arc::clone(&self.control);
        router.submit_delayed(
            &Domain::Global,
            move || {
                if control.request_cancel() {
                    debug!(after_ms = delay.as_millis(), "chain cancelled by timeout");
                }
                Ok(())
            },
            delay,
        )
    }
}

impl<T: Clone> ChainFuture<T> {
    /// Turn this future into a cloneable one every holder can await.
    pub fn shared(self) -> Shared<Self> {
        FutureExt::shared(self)
    }
}

impl<T> Future for ChainFuture<T> {
    type Output = Result<T, ChainError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ChainError::Cancelled)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

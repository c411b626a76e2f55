//! Chain state and its three terminal transitions.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use super::future::{ChainControl, ChainStatus, Promise};
use super::link::ChainLink;
use crate::error::{panic_message, ChainStepError};

pub(crate) type ErrorHook = Box<dyn FnOnce(&ChainStepError) + Send + 'static>;
pub(crate) type RecoverHook<T> = Box<dyn FnOnce(&ChainStepError) -> T + Send + 'static>;
pub(crate) type FinallyHook = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type SuccessHook<T> = Box<dyn FnOnce(&T) + Send + 'static>;
pub(crate) type CompleteHook = Box<dyn FnOnce(ChainStatus) + Send + 'static>;

/// Callbacks attached by the builder. Each runs at most once.
pub(crate) struct Hooks<T> {
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) recover: Option<RecoverHook<T>>,
    pub(crate) finally: Option<FinallyHook>,
    pub(crate) on_success: Option<SuccessHook<T>>,
    pub(crate) on_complete: Option<CompleteHook>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_error: None,
            recover: None,
            finally: None,
            on_success: None,
            on_complete: None,
        }
    }
}

/// Everything a running chain owns apart from its carried value.
///
/// Consumed by exactly one of the `finish_*` methods.
pub(crate) struct ChainState<T> {
    id: u64,
    links: VecDeque<ChainLink<T>>,
    cursor: usize,
    hooks: Hooks<T>,
    promise: Promise<T>,
}

impl<T> ChainState<T> {
    pub(crate) fn new(id: u64, links: Vec<ChainLink<T>>, hooks: Hooks<T>, promise: Promise<T>) -> Self {
        Self {
            id,
            links: links.into(),
            cursor: 0,
            hooks,
            promise,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn control(&self) -> &Arc<ChainControl> {
        self.promise.control()
    }

    /// Take the next link with its zero-based index.
    pub(crate) fn next_link(&mut self) -> Option<(usize, ChainLink<T>)> {
        let link = self.links.pop_front()?;
        let index = self.cursor;
        self.cursor += 1;
        Some((index, link))
    }

    /// All links consumed: success callback, complete, finally, completion.
    pub(crate) fn finish_success(self, value: T) {
        let Self {
            id,
            mut hooks,
            promise,
            ..
        } = self;
        if let Some(on_success) = hooks.on_success.take() {
            guarded(id, "on_success", || on_success(&value));
        }
        promise.complete(value);
        debug!(chain = id, "chain completed");
        finish_hooks(id, hooks, ChainStatus::Completed);
    }

    /// A step failed: error handler, then recovery if one is set.
    pub(crate) fn finish_error(self, failure: ChainStepError) {
        let Self {
            id,
            mut hooks,
            promise,
            ..
        } = self;
        debug!(chain = id, step = failure.index, domain = %failure.domain, error = %failure.source, "chain step failed");

        if let Some(on_error) = hooks.on_error.take() {
            guarded(id, "exceptionally", || on_error(&failure));
        }
        let recovered = hooks
            .recover
            .take()
            .and_then(|recover| guarded(id, "recover", || recover(&failure)));

        let status = if let Some(value) = recovered {
            promise.complete(value);
            debug!(chain = id, "chain recovered");
            ChainStatus::Completed
        } else {
            promise.complete_exceptionally(failure);
            ChainStatus::Failed
        };
        finish_hooks(id, hooks, status);
    }

    /// Cancelled before the next step began, or a step was dropped unrun.
    pub(crate) fn finish_cancelled(self) {
        let Self {
            id,
            mut hooks,
            promise,
            ..
        } = self;
        promise.control().set_status(ChainStatus::Cancelled);
        if let Some(finally) = hooks.finally.take() {
            guarded(id, "finally", finally);
        }
        promise.cancel();
        debug!(chain = id, "chain cancelled");
        if let Some(on_complete) = hooks.on_complete.take() {
            guarded(id, "on_complete", || on_complete(ChainStatus::Cancelled));
        }
    }
}

fn finish_hooks<T>(id: u64, mut hooks: Hooks<T>, status: ChainStatus) {
    if let Some(finally) = hooks.finally.take() {
        guarded(id, "finally", finally);
    }
    if let Some(on_complete) = hooks.on_complete.take() {
        guarded(id, "on_complete", || on_complete(status));
    }
}

/// Run a user callback, logging a panic instead of unwinding into the driver.
fn guarded<R>(chain: u64, hook: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(payload) => {
            error!(chain, hook, message = %panic_message(payload.as_ref()), "chain callback panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use taskweave_core::Domain;

    use super::*;
    use crate::chain::future::{promise, ChainFuture};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_hooks(log: &Log, with_recover: bool) -> Hooks<i32> {
        let mut hooks = Hooks::default();
        let l = Arc::clone(log);
        hooks.on_error = Some(Box::new(move |e| l.lock().push(format!("error:{}", e.index))));
        if with_recover {
            let l = Arc::clone(log);
            hooks.recover = Some(Box::new(move |_| {
                l.lock().push("recover".into());
                -1
            }));
        }
        let l = Arc::clone(log);
        hooks.finally = Some(Box::new(move || l.lock().push("finally".into())));
        let l = Arc::clone(log);
        hooks.on_success = Some(Box::new(move |v| l.lock().push(format!("success:{v}"))));
        let l = Arc::clone(log);
        hooks.on_complete = Some(Box::new(move |s| l.lock().push(format!("complete:{s:?}"))));
        hooks
    }

    fn state(log: &Log, with_recover: bool) -> (ChainState<i32>, ChainFuture<i32>) {
        let (promise, future) = promise();
        (ChainState::new(1, Vec::new(), recording_hooks(log, with_recover), promise), future)
    }

    fn failure() -> ChainStepError {
        ChainStepError {
            index: 1,
            domain: Domain::Global,
            source: anyhow::anyhow!("boom"),
        }
    }

    #[tokio::test]
    async fn success_order() {
        let log = Log::default();
        let (state, future) = state(&log, false);
        state.finish_success(5);
        assert_eq!(future.await.unwrap(), 5);
        assert_eq!(*log.lock(), vec!["success:5", "finally", "complete:Completed"]);
    }

    #[tokio::test]
    async fn error_with_recovery_completes() {
        let log = Log::default();
        let (state, future) = state(&log, true);
        state.finish_error(failure());
        assert_eq!(future.await.unwrap(), -1);
        assert_eq!(
            *log.lock(),
            vec!["error:1", "recover", "finally", "complete:Completed"]
        );
    }

    #[tokio::test]
    async fn error_without_recovery_fails() {
        let log = Log::default();
        let (state, future) = state(&log, false);
        state.finish_error(failure());
        let err = future.await.unwrap_err();
        assert_eq!(err.step_error().map(|e| e.index), Some(1));
        assert_eq!(*log.lock(), vec!["error:1", "finally", "complete:Failed"]);
    }

    #[tokio::test]
    async fn cancelled_runs_finally_before_settling() {
        let log = Log::default();
        let (state, future) = state(&log, false);
        state.finish_cancelled();
        assert!(future.is_cancelled());
        assert!(future.await.unwrap_err().is_cancelled());
        assert_eq!(*log.lock(), vec!["finally", "complete:Cancelled"]);
    }

    #[tokio::test]
    async fn panicking_recover_falls_back_to_failure() {
        let (promise, future) = promise::<i32>();
        let mut hooks = Hooks::default();
        hooks.recover = Some(Box::new(|_| panic!("recover broke")));
        ChainState::new(1, Vec::new(), hooks, promise).finish_error(failure());
        assert!(future.await.unwrap_err().step_error().is_some());
    }
}

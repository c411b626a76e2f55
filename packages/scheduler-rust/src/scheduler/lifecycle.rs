//! Router lifecycle: accepting state and the worker stop signal.
//!
//! Uses `ArcSwap` for lock-free state transitions and a `watch` channel that
//! every worker loop selects on.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Router lifecycle state.
///
/// State machine: Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// Accepting submissions.
    Running,
    /// Shutdown requested: new submissions are refused, workers are stopping.
    Draining,
    /// All workers have exited.
    Stopped,
}

/// Owns the router state and the stop signal shared with worker loops.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    stop_signal: watch::Sender<bool>,
    state: ArcSwap<RouterState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            stop_signal: tx,
            state: ArcSwap::from_pointee(RouterState::Running),
        }
    }

    /// Receiver handed to each worker loop at spawn time.
    pub(crate) fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_signal.subscribe()
    }

    pub(crate) fn state(&self) -> RouterState {
        **self.state.load()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == RouterState::Running
    }

    /// Moves to `Draining` and signals every worker. Returns `false` if a
    /// shutdown was already under way.
    pub(crate) fn begin_shutdown(&self) -> bool {
        let current = self.state.load_full();
        if *current != RouterState::Running {
            return false;
        }
        let previous = self
            .state
            .compare_and_swap(&current, Arc::new(RouterState::Draining));
        if !Arc::ptr_eq(&*previous, &current) {
            return false;
        }
        // Receivers may have been dropped already.
        let _ = self.stop_signal.send(true);
        true
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(Arc::new(RouterState::Stopped));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), RouterState::Running);
        assert!(lifecycle.is_running());
    }

    #[tokio::test]
    async fn begin_shutdown_signals_once() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.stop_receiver();

        assert!(lifecycle.begin_shutdown());
        assert_eq!(lifecycle.state(), RouterState::Draining);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        assert!(!lifecycle.begin_shutdown());
        lifecycle.mark_stopped();
        assert_eq!(lifecycle.state(), RouterState::Stopped);
    }
}

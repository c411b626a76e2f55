//! A single chain link: one transform bound to one domain.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use taskweave_core::Domain;
use tokio::sync::oneshot;

use crate::error::panic_message;

/// Value transform applied by one link.
pub(crate) type Transform<T> = Box<dyn FnOnce(T) -> anyhow::Result<T> + Send + 'static>;

/// Predicate gating whether a link's transform runs.
pub(crate) type Guard<T> = Box<dyn FnOnce(&T) -> bool + Send + 'static>;

/// One step of a chain. Immutable once appended.
pub struct ChainLink<T> {
    domain: Domain,
    delay: Duration,
    transform: Transform<T>,
    guard: Option<Guard<T>>,
}

impl<T: Send + 'static> ChainLink<T> {
    pub(crate) fn new(
        domain: Domain,
        delay: Duration,
        transform: Transform<T>,
        guard: Option<Guard<T>>,
    ) -> Self {
        Self {
            domain,
            delay,
            transform,
            guard,
        }
    }

    /// Domain this link is dispatched to.
    #[must_use]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Delay before this link fires, counted from dispatch.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns `true` if a guard decides whether the transform runs.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.guard.is_some()
    }

    /// Turn this link into a task body carrying `value`. The outcome is sent
    /// on `reply`; errors and panics go to the chain, not the worker.
    pub(crate) fn into_task(
        self,
        value: T,
        reply: oneshot::Sender<anyhow::Result<T>>,
    ) -> impl FnOnce() -> anyhow::Result<()> + Send + 'static {
        let Self {
            transform, guard, ..
        } = self;
        move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| apply(transform, guard, value)))
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!(
                        "chain step panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                });
            // Driver gone means the chain was abandoned.
            let _ = reply.send(outcome);
            Ok(())
        }
    }
}

fn apply<T>(transform: Transform<T>, guard: Option<Guard<T>>, value: T) -> anyhow::Result<T> {
    match guard {
        Some(guard) => {
            if guard(&value) {
                transform(value)
            } else {
                Ok(value)
            }
        }
        None => transform(value),
    }
}

impl<T> fmt::Debug for ChainLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLink")
            .field("domain", &self.domain)
            .field("delay", &self.delay)
            .field("conditional", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(guard: Option<Guard<i32>>) -> ChainLink<i32> {
        ChainLink::new(
            Domain::Global,
            Duration::from_millis(100),
            Box::new(|v| Ok(v * 10)),
            guard,
        )
    }

    fn run(link: ChainLink<i32>, value: i32) -> anyhow::Result<i32> {
        let (tx, mut rx) = oneshot::channel();
        link.into_task(value, tx)().unwrap();
        rx.try_recv().unwrap()
    }

    #[test]
    fn accessors() {
        let plain = link(None);
        assert_eq!(plain.domain(), &Domain::Global);
        assert_eq!(plain.delay(), Duration::from_millis(100));
        assert!(!plain.is_conditional());
        assert!(link(Some(Box::new(|_| true))).is_conditional());
    }

    #[test]
    fn guard_controls_transform() {
        assert_eq!(run(link(None), 2).unwrap(), 20);
        assert_eq!(run(link(Some(Box::new(|v| *v > 5))), 2).unwrap(), 2);
        assert_eq!(run(link(Some(Box::new(|v| *v > 5))), 6).unwrap(), 60);
    }

    #[test]
    fn panic_becomes_step_error() {
        let panicking: ChainLink<i32> = ChainLink::new(
            Domain::Background,
            Duration::ZERO,
            Box::new(|_| panic!("kaboom")),
            None,
        );
        let err = run(panicking, 1).unwrap_err();
        assert_eq!(err.to_string(), "chain step panicked: kaboom");
    }

    #[test]
    fn reply_dropped_is_not_a_task_failure() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        assert!(link(None).into_task(1, tx)().is_ok());
    }
}

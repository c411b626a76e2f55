//! The stepping loop that drives a chain across domains.
//!
//! Each link becomes one task on the router and one `.await` on its reply, so
//! a chain of `n` links suspends exactly `n` times and never recurses. Before
//! every step the loop checks for cancellation; a step whose task is dropped
//! unrun (cancelled or shut down) also ends the chain as cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, Instrument};

use super::future::{promise, ChainControl, ChainFuture};
use super::link::ChainLink;
use super::state::{ChainState, Hooks};
use crate::error::{ChainStepError, SchedulingError};
use crate::scheduler::DomainRouter;

/// Source of chain ids for log correlation.
static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(1);

enum StepOutcome<T> {
    Advanced(T),
    Failed(ChainStepError),
    Dropped,
}

/// Validate, then spawn the driver for one chain execution.
pub(crate) fn launch<T: Send + 'static>(
    router: &DomainRouter,
    initial: T,
    links: Vec<ChainLink<T>>,
    hooks: Hooks<T>,
) -> Result<ChainFuture<T>, SchedulingError> {
    if !router.is_running() {
        return Err(SchedulingError::ShutDown);
    }

    let (promise, future) = promise();
    let id = NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed);
    let state = ChainState::new(id, links, hooks, promise);
    state.control().start();

    let span = tracing::debug_span!("chain", chain = id);
    router
        .runtime()
        .spawn(drive(router.clone(), state, initial).instrument(span));
    Ok(future)
}

async fn drive<T: Send + 'static>(router: DomainRouter, mut state: ChainState<T>, initial: T) {
    let control = Arc::clone(state.control());
    let mut value = initial;

    loop {
        if control.is_cancel_requested() {
            state.finish_cancelled();
            return;
        }
        let Some((index, link)) = state.next_link() else {
            state.finish_success(value);
            return;
        };

        match dispatch(&router, &control, state.id(), index, link, value).await {
            // A running step is never interrupted; its result is discarded.
            _ if control.is_cancel_requested() => {
                state.finish_cancelled();
                return;
            }
            StepOutcome::Advanced(next) => value = next,
            StepOutcome::Failed(failure) => {
                state.finish_error(failure);
                return;
            }
            StepOutcome::Dropped => {
                debug!(chain = state.id(), step = index, "chain step dropped before running");
                state.finish_cancelled();
                return;
            }
        }
    }
}

/// Queue one link on its domain and wait for its reply.
async fn dispatch<T: Send + 'static>(
    router: &DomainRouter,
    control: &ChainControl,
    chain: u64,
    index: usize,
    link: ChainLink<T>,
    value: T,
) -> StepOutcome<T> {
    let domain = link.domain().clone();
    let delay = link.delay();
    let (reply_tx, reply_rx) = oneshot::channel();

    let step = match router.submit_delayed(&domain, link.into_task(value, reply_tx), delay) {
        Ok(step) => step,
        Err(err) => {
            return StepOutcome::Failed(ChainStepError {
                index,
                domain,
                source: err.into(),
            })
        }
    };
    debug!(chain, step = index, %domain, task_id = step.id().0, "chain step dispatched");

    control.set_pending_step(step);
    let reply = reply_rx.await;
    control.clear_pending_step();

    match reply {
        Ok(Ok(next)) => StepOutcome::Advanced(next),
        Ok(Err(source)) => StepOutcome::Failed(ChainStepError {
            index,
            domain,
            source,
        }),
        Err(_) => StepOutcome::Dropped,
    }
}

//! Error types for task dispatch and chain execution.

use std::any::Any;
use std::sync::Arc;

use taskweave_core::{Domain, TaskId, WorkerId, ZeroGranularity};

/// Errors raised synchronously by `submit*`, `execute()` and `start()`,
/// before any asynchronous work is queued.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    /// `submit_periodic` was given a zero period.
    #[error("period must be at least one tick")]
    ZeroPeriod,
    /// No region owns the key and the policy is `Reject`.
    #[error("no region owns {domain}")]
    UnresolvedAffinity { domain: Domain },
    /// The router is draining or stopped.
    #[error("router is shut down")]
    ShutDown,
    /// The target worker's loop has already exited.
    #[error("worker {worker} is no longer accepting tasks")]
    WorkerUnavailable { worker: WorkerId },
    /// `start` was called outside a tokio runtime.
    #[error("router must be started inside a tokio runtime")]
    NoRuntime,
    /// The configured tick length is zero.
    #[error(transparent)]
    InvalidTick(#[from] ZeroGranularity),
}

/// A failure escaping a task body. Caught at the dispatch boundary, logged,
/// and never propagated to the submitter or to sibling tasks.
#[derive(Debug, thiserror::Error)]
pub enum TaskExecutionError {
    #[error("{task_id} on {worker} failed: {source}")]
    Failed {
        task_id: TaskId,
        worker: WorkerId,
        #[source]
        source: anyhow::Error,
    },
    #[error("{task_id} on {worker} panicked: {message}")]
    Panicked {
        task_id: TaskId,
        worker: WorkerId,
        message: String,
    },
}

/// A failure inside one chain link's transform, or in dispatching it.
#[derive(Debug, thiserror::Error)]
#[error("chain step {index} on {domain} failed: {source}")]
pub struct ChainStepError {
    /// Zero-based position of the failing link.
    pub index: usize,
    /// Domain the link was declared on.
    pub domain: Domain,
    #[source]
    pub source: anyhow::Error,
}

/// Terminal failure of a chain as seen through its future.
///
/// Cloneable so that shared futures can hand the same outcome to every reader.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Failed(Arc<ChainStepError>),
    #[error("chain was cancelled")]
    Cancelled,
}

impl ChainError {
    /// The step error, if the chain failed rather than being cancelled.
    #[must_use]
    pub fn step_error(&self) -> Option<&ChainStepError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Cancelled => None,
        }
    }

    /// Returns `true` for [`ChainError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

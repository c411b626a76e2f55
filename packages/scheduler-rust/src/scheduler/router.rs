//! Domain routing: resolves a `Domain` to a worker and queues work on it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use taskweave_core::{
    AffinityResolver, Domain, RegionId, TaskId, TaskOwner, TickGranularity, WorkerId,
};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::lifecycle::{Lifecycle, RouterState};
use super::task::{TaskBody, TaskHandle, TaskRegistry};
use super::worker::{self, DomainWorker, RouterId, ScheduledTask, WorkerCommand, WorkerContext};
use crate::chain::Chain;
use crate::config::{SchedulerConfig, UnresolvedAffinityPolicy};
use crate::error::SchedulingError;

/// Source of router instance ids.
static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// DomainRouter
// ---------------------------------------------------------------------------

/// Routes units of work to the global worker, the background pool, or a
/// region worker chosen by the host's [`AffinityResolver`].
///
/// Cheap to clone; all clones share the same workers and task registry.
/// Every submission returns immediately with a [`TaskHandle`].
///
/// Ordering: on one serial worker, immediate tasks run in submission order
/// and timed tasks run in `(deadline, arrival)` order. Nothing is promised
/// across workers, and nothing within the background pool.
#[derive(Clone)]
pub struct DomainRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    id: RouterId,
    config: SchedulerConfig,
    granularity: TickGranularity,
    owner: TaskOwner,
    next_task_id: AtomicU64,
    registry: Arc<TaskRegistry>,
    resolver: Arc<dyn AffinityResolver>,
    worker_ctx: WorkerContext,
    global: DomainWorker,
    background: DomainWorker,
    regions: DashMap<RegionId, DomainWorker>,
    lifecycle: Lifecycle,
}

impl DomainRouter {
    /// Start a router on the current tokio runtime.
    ///
    /// The global and background workers start immediately. Region workers
    /// start the first time a key resolves to their region.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::NoRuntime`] outside a tokio runtime and
    /// [`SchedulingError::InvalidTick`] for a zero tick length.
    pub fn start(
        config: SchedulerConfig,
        resolver: Arc<dyn AffinityResolver>,
    ) -> Result<Self, SchedulingError> {
        let runtime = Handle::try_current().map_err(|_| SchedulingError::NoRuntime)?;
        let granularity = TickGranularity::new(config.tick)?;
        let id = NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::new(TaskRegistry::new());
        let lifecycle = Lifecycle::new();

        let worker_ctx = WorkerContext {
            router: id,
            registry: Arc::clone(&registry),
            periodic_failure: config.periodic_failure,
            runtime,
        };
        let global = DomainWorker::spawn(
            WorkerId::Global,
            worker_ctx.clone(),
            lifecycle.stop_receiver(),
        );
        let background = DomainWorker::spawn(
            WorkerId::Background,
            worker_ctx.clone(),
            lifecycle.stop_receiver(),
        );

        info!(router = id, owner = %config.owner, tick_ms = config.tick.as_millis(), "router started");

        Ok(Self {
            inner: Arc::new(RouterInner {
                id,
                owner: TaskOwner::new(&config.owner),
                config,
                granularity,
                next_task_id: AtomicU64::new(1),
                registry,
                resolver,
                worker_ctx,
                global,
                background,
                regions: DashMap::new(),
                lifecycle,
            }),
        })
    }

    // -- submission ---------------------------------------------------------

    /// Run `body` in `domain` at the next opportunity.
    ///
    /// # Errors
    ///
    /// See [`SchedulingError`]; nothing is queued on error.
    pub fn submit<F>(&self, domain: &Domain, body: F) -> Result<TaskHandle, SchedulingError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule(domain, TaskBody::once(body), Duration::ZERO, None)
    }

    /// Run `body` once in `domain`, no earlier than `delay` from now.
    ///
    /// The delay is rounded up to whole ticks.
    ///
    /// # Errors
    ///
    /// See [`SchedulingError`]; nothing is queued on error.
    pub fn submit_delayed<F>(
        &self,
        domain: &Domain,
        body: F,
        delay: Duration,
    ) -> Result<TaskHandle, SchedulingError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule(domain, TaskBody::once(body), delay, None)
    }

    /// Run `body` repeatedly in `domain`: first no earlier than `delay`, then
    /// every `period` measured from the previous scheduled firing.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::ZeroPeriod`] for a zero period, otherwise
    /// see [`SchedulingError`].
    pub fn submit_periodic<F>(
        &self,
        domain: &Domain,
        body: F,
        delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle, SchedulingError>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(SchedulingError::ZeroPeriod);
        }
        self.schedule(domain, TaskBody::repeating(body), delay, Some(period))
    }

    fn schedule(
        &self,
        domain: &Domain,
        body: TaskBody,
        delay: Duration,
        period: Option<Duration>,
    ) -> Result<TaskHandle, SchedulingError> {
        let inner = &self.inner;
        if !inner.lifecycle.is_running() {
            return Err(SchedulingError::ShutDown);
        }

        let worker_id = self.resolve(domain)?;
        let sender = self.worker_sender(worker_id)?;
        let id = TaskId(inner.next_task_id.fetch_add(1, Ordering::Relaxed));
        let period = period.map(|p| inner.granularity.align(p));
        let handle = TaskHandle::new(id, inner.owner.clone(), worker_id, period, sender.clone());
        let deadline = worker::deadline_after(Instant::now(), inner.granularity.align(delay));

        inner.registry.insert(id, handle.clone());
        let task = ScheduledTask {
            handle: handle.clone(),
            body,
            deadline,
        };
        if sender.send(WorkerCommand::Schedule(task)).is_err() {
            inner.registry.remove(&id);
            return Err(SchedulingError::WorkerUnavailable { worker: worker_id });
        }

        debug!(
            task_id = id.0,
            %domain,
            worker = %worker_id,
            delay_ms = delay.as_millis(),
            periodic = period.is_some(),
            "task scheduled"
        );
        Ok(handle)
    }

    // -- routing ------------------------------------------------------------

    /// Resolve a domain to the worker that would run it right now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::UnresolvedAffinity`] only under
    /// [`UnresolvedAffinityPolicy::Reject`].
    pub fn resolve(&self, domain: &Domain) -> Result<WorkerId, SchedulingError> {
        let region = match domain {
            Domain::Global => return Ok(WorkerId::Global),
            Domain::Background => return Ok(WorkerId::Background),
            Domain::Entity(entity) => self.inner.resolver.resolve_entity(*entity),
            Domain::Location(key) => self.inner.resolver.resolve_location(key),
        };

        match (region, self.inner.config.unresolved_affinity) {
            (Some(region), _) => Ok(WorkerId::Region(region)),
            (None, UnresolvedAffinityPolicy::FallbackToGlobal) => {
                debug!(%domain, "affinity unresolved, falling back to global");
                Ok(WorkerId::Global)
            }
            (None, UnresolvedAffinityPolicy::Reject) => Err(SchedulingError::UnresolvedAffinity {
                domain: domain.clone(),
            }),
        }
    }

    /// Returns `true` if the caller is running inside a body on the worker
    /// `domain` resolves to, on this router.
    #[must_use]
    pub fn is_current_domain(&self, domain: &Domain) -> bool {
        let Some((router, current)) = worker::current() else {
            return false;
        };
        router == self.inner.id && self.resolve(domain).is_ok_and(|worker| worker == current)
    }

    /// Sender for `worker`, spawning a region worker on first use.
    ///
    /// A region worker is only spawned while the stop signal is unset, checked
    /// under the map entry lock, so `shutdown` always sees and joins it.
    fn worker_sender(
        &self,
        worker: WorkerId,
    ) -> Result<tokio::sync::mpsc::UnboundedSender<WorkerCommand>, SchedulingError> {
        let inner = &self.inner;
        let region = match worker {
            WorkerId::Global => return Ok(inner.global.sender()),
            WorkerId::Background => return Ok(inner.background.sender()),
            WorkerId::Region(region) => region,
        };
        if let Some(existing) = inner.regions.get(&region) {
            return Ok(existing.sender());
        }
        match inner.regions.entry(region) {
            Entry::Occupied(entry) => Ok(entry.get().sender()),
            Entry::Vacant(entry) => {
                let stop = inner.lifecycle.stop_receiver();
                if *stop.borrow() {
                    return Err(SchedulingError::ShutDown);
                }
                let spawned = DomainWorker::spawn(worker, inner.worker_ctx.clone(), stop);
                Ok(entry.insert(spawned).sender())
            }
        }
    }

    /// Regions that currently have a running worker, sorted.
    #[must_use]
    pub fn active_regions(&self) -> Vec<RegionId> {
        let mut regions: Vec<RegionId> = self.inner.regions.iter().map(|e| *e.key()).collect();
        regions.sort_unstable();
        regions
    }

    // -- registry -----------------------------------------------------------

    /// Look up a tracked task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<TaskHandle> {
        self.inner.registry.get(&id).map(|entry| entry.value().clone())
    }

    /// Every task not yet finished or cancelled, in id order.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<TaskHandle> {
        let mut tasks: Vec<TaskHandle> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_unstable_by_key(TaskHandle::id);
        tasks
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Cancel a task by id. Returns `false` if it is not tracked.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.inner.registry.remove(&id) {
            Some((_, handle)) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every tracked task. Running bodies finish; nothing fires again.
    /// Idempotent.
    pub fn cancel_all(&self) {
        let handles = self.pending_tasks();
        let count = handles.len();
        for handle in handles {
            handle.cancel();
            self.inner.registry.remove(&handle.id());
        }
        if count > 0 {
            debug!(count, "cancelled all tasks");
        }
    }

    // -- chains -------------------------------------------------------------

    /// Start building a chain that carries `initial` through its links.
    pub fn chain<T: Send + 'static>(&self, initial: T) -> Chain<T> {
        Chain::new(self, initial)
    }

    // -- lifecycle & accessors ----------------------------------------------

    /// The owner stamped on every task this router creates.
    #[must_use]
    pub fn owner(&self) -> &TaskOwner {
        &self.inner.owner
    }

    /// The configuration this router was started with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Tick granularity all delays are rounded to.
    #[must_use]
    pub fn granularity(&self) -> TickGranularity {
        self.inner.granularity
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RouterState {
        self.inner.lifecycle.state()
    }

    /// Returns `true` while submissions are accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.worker_ctx.runtime
    }

    /// Stop accepting work, cancel every task, and wait up to `timeout` for
    /// all workers to exit.
    ///
    /// Returns `true` if every worker stopped in time (state becomes
    /// `Stopped`). Returns `false` on timeout or if a shutdown was already
    /// under way.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let inner = &self.inner;
        if !inner.lifecycle.begin_shutdown() {
            return false;
        }
        self.cancel_all();

        // Collected before awaiting so no map guard is held across the wait.
        let joins: Vec<_> = [&inner.global, &inner.background]
            .into_iter()
            .map(|worker| (worker.id(), worker.take_join()))
            .chain(
                inner
                    .regions
                    .iter()
                    .map(|entry| (entry.value().id(), entry.value().take_join())),
            )
            .filter_map(|(worker, join)| join.map(|join| (worker, join)))
            .collect();

        let wait_all = async {
            for (worker, join) in joins {
                if join.await.is_err() {
                    warn!(router = inner.id, %worker, "worker task panicked");
                }
            }
        };
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            warn!(router = inner.id, "workers did not stop within {timeout:?}");
            return false;
        }

        inner.lifecycle.mark_stopped();
        info!(router = inner.id, "router stopped");
        true
    }

    /// [`shutdown`](Self::shutdown) with the configured timeout.
    pub async fn shutdown_default(&self) -> bool {
        self.shutdown(self.inner.config.shutdown_timeout).await
    }
}

impl fmt::Debug for DomainRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainRouter")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("regions", &self.inner.regions.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Fluent builder for chains.

use std::fmt;
use std::time::Duration;

use taskweave_core::{Domain, EntityId, LocationKey};

use super::executor;
use super::future::{ChainFuture, ChainStatus};
use super::link::{ChainLink, Guard};
use super::state::Hooks;
use crate::error::{ChainStepError, SchedulingError};
use crate::scheduler::DomainRouter;

/// An ordered list of domain-routed transforms sharing one carried value.
///
/// Build with [`DomainRouter::chain`], then [`execute`](Self::execute).
/// Nothing runs until `execute` is called.
///
/// `delay` and `when` apply to the next link appended after them.
///
/// ```
/// use std::sync::Arc;
///
/// use taskweave_scheduler::{DomainRouter, SchedulerConfig, Unresolved};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let router = DomainRouter::start(SchedulerConfig::default(), Arc::new(Unresolved))?;
///     let future = router
///         .chain(0)
///         .global(|v| Ok(v + 1))
///         .background(|v| Ok(v + 1))
///         .execute()?;
///     assert_eq!(future.await?, 2);
///     Ok(())
/// }
/// ```
pub struct Chain<T> {
    router: DomainRouter,
    initial: T,
    links: Vec<ChainLink<T>>,
    next_delay: Duration,
    next_guard: Option<Guard<T>>,
    hooks: Hooks<T>,
}

impl<T: Send + 'static> Chain<T> {
    pub(crate) fn new(router: &DomainRouter, initial: T) -> Self {
        Self {
            router: router.clone(),
            initial,
            links: Vec::new(),
            next_delay: Duration::ZERO,
            next_guard: None,
            hooks: Hooks::default(),
        }
    }

    // -- links --------------------------------------------------------------

    /// Append a transform that runs in `domain`.
    #[must_use]
    pub fn step<F>(mut self, domain: Domain, transform: F) -> Self
    where
        F: FnOnce(T) -> anyhow::Result<T> + Send + 'static,
    {
        let delay = std::mem::take(&mut self.next_delay);
        let guard = self.next_guard.take();
        self.links
            .push(ChainLink::new(domain, delay, Box::new(transform), guard));
        self
    }

    /// Append a side effect that runs in `domain` and passes the value on.
    #[must_use]
    pub fn step_run<F>(self, domain: Domain, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.step(domain, move |value| {
            action()?;
            Ok(value)
        })
    }

    #[must_use]
    pub fn global<F>(self, transform: F) -> Self
    where
        F: FnOnce(T) -> anyhow::Result<T> + Send + 'static,
    {
        self.step(Domain::Global, transform)
    }

    #[must_use]
    pub fn global_run<F>(self, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.step_run(Domain::Global, action)
    }

    #[must_use]
    pub fn background<F>(self, transform: F) -> Self
    where
        F: FnOnce(T) -> anyhow::Result<T> + Send + 'static,
    {
        self.step(Domain::Background, transform)
    }

    #[must_use]
    pub fn background_run<F>(self, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.step_run(Domain::Background, action)
    }

    /// Transform on whichever region owns `entity` when the step fires.
    #[must_use]
    pub fn entity<F>(self, entity: EntityId, transform: F) -> Self
    where
        F: FnOnce(T) -> anyhow::Result<T> + Send + 'static,
    {
        self.step(Domain::Entity(entity), transform)
    }

    #[must_use]
    pub fn entity_run<F>(self, entity: EntityId, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.step_run(Domain::Entity(entity), action)
    }

    /// Transform on the region owning `location` when the step fires.
    #[must_use]
    pub fn location<F>(self, location: LocationKey, transform: F) -> Self
    where
        F: FnOnce(T) -> anyhow::Result<T> + Send + 'static,
    {
        self.step(Domain::Location(location), transform)
    }

    #[must_use]
    pub fn location_run<F>(self, location: LocationKey, action: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.step_run(Domain::Location(location), action)
    }

    // -- link modifiers -----------------------------------------------------

    /// Delay the next link by `delay` after the previous one finishes.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.next_delay = delay;
        self
    }

    /// Gate the next link: when `predicate` is false at step time the value
    /// passes through untouched. The step is still dispatched to its domain.
    #[must_use]
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.next_guard = Some(Box::new(predicate));
        self
    }

    // -- hooks --------------------------------------------------------------

    /// Observe a step failure before recovery or failure.
    #[must_use]
    pub fn exceptionally<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&ChainStepError) + Send + 'static,
    {
        self.hooks.on_error = Some(Box::new(handler));
        self
    }

    /// Turn a step failure into a successful result.
    #[must_use]
    pub fn recover<F>(mut self, recover: F) -> Self
    where
        F: FnOnce(&ChainStepError) -> T + Send + 'static,
    {
        self.hooks.recover = Some(Box::new(recover));
        self
    }

    /// Run once when the chain ends, whatever the outcome.
    #[must_use]
    pub fn finally<F>(mut self, block: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.finally = Some(Box::new(block));
        self
    }

    /// Run with the final value before the future resolves.
    #[must_use]
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.hooks.on_success = Some(Box::new(callback));
        self
    }

    /// Run last, with the terminal status.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ChainStatus) + Send + 'static,
    {
        self.hooks.on_complete = Some(Box::new(callback));
        self
    }

    // -- inspection & execution ---------------------------------------------

    /// Links appended so far.
    #[must_use]
    pub fn links(&self) -> &[ChainLink<T>] {
        &self.links
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Start the chain. Returns immediately; the outcome arrives through the
    /// returned future.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulingError::ShutDown`] if the router no longer accepts
    /// work.
    pub fn execute(self) -> Result<ChainFuture<T>, SchedulingError> {
        executor::launch(&self.router, self.initial, self.links, self.hooks)
    }
}

impl<T> fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("links", &self.links)
            .field("next_delay", &self.next_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskweave_core::Unresolved;

    use super::*;
    use crate::config::SchedulerConfig;

    #[tokio::test]
    async fn modifiers_apply_to_next_link_only() {
        let router = DomainRouter::start(SchedulerConfig::default(), Arc::new(Unresolved)).unwrap();
        let entity = EntityId::random();
        let chain = router
            .chain(1_u32)
            .global(Ok)
            .delay(Duration::from_millis(200))
            .when(|v| *v > 0)
            .background_run(|| Ok(()))
            .entity(entity, Ok)
            .location_run(LocationKey::new("world", 0, 0), || Ok(()));

        assert_eq!(chain.len(), 4);
        let links = chain.links();
        assert_eq!(links[0].delay(), Duration::ZERO);
        assert!(!links[0].is_conditional());
        assert_eq!(links[1].domain(), &Domain::Background);
        assert_eq!(links[1].delay(), Duration::from_millis(200));
        assert!(links[1].is_conditional());
        assert_eq!(links[2].domain(), &Domain::Entity(entity));
        assert_eq!(links[2].delay(), Duration::ZERO);
        assert!(!links[2].is_conditional());
        assert!(matches!(links[3].domain(), Domain::Location(_)));
    }

    #[tokio::test]
    async fn empty_chain_yields_initial_value() {
        let router = DomainRouter::start(SchedulerConfig::default(), Arc::new(Unresolved)).unwrap();
        let chain = router.chain("same");
        assert!(chain.is_empty());
        assert_eq!(chain.execute().unwrap().await.unwrap(), "same");
    }
}

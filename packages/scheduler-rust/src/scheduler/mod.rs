//! Domain-routed task scheduling.
//!
//! A [`DomainRouter`] owns one serial worker for the global domain, one pooled
//! worker for background work, and one serial worker per active region. Work
//! is routed by resolving its [`Domain`](taskweave_core::Domain) through the
//! host's affinity resolver.

pub mod lifecycle;
pub mod region;
pub mod router;
pub mod task;
pub mod worker;

pub use lifecycle::RouterState;
pub use region::SharedRegionTable;
pub use router::DomainRouter;
pub use task::TaskHandle;
pub use worker::current_worker;

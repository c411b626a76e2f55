//! Chains: ordered, domain-routed transforms over one carried value.
//!
//! A chain is plain data (a list of [`ChainLink`]s plus callbacks) until
//! [`Chain::execute`] hands it to a driver task that dispatches one link at a
//! time through the [`DomainRouter`](crate::DomainRouter).

pub mod builder;
mod executor;
pub mod future;
pub mod link;
mod state;

pub use builder::Chain;
pub use future::{promise, ChainFuture, ChainStatus, Promise};
pub use link::ChainLink;

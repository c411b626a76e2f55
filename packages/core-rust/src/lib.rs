//! Taskweave core: domains, affinity keys, region hashing and scheduler ticks.

pub mod affinity;
pub mod domain;
pub mod hash;
pub mod task;
pub mod ticks;

pub use affinity::{hash_to_region, AffinityResolver, RegionTable, Unresolved, DEFAULT_REGION_COUNT};
pub use domain::{Domain, EntityId, LocationKey, RegionId, WorkerId};
pub use task::{TaskId, TaskOwner};
pub use ticks::{TickGranularity, Ticks, ZeroGranularity, DEFAULT_TICK};

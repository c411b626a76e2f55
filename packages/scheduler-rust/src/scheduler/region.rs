//! Thread-safe wrapper making a `RegionTable` usable as the router's resolver.

use std::sync::Arc;

use parking_lot::RwLock;
use taskweave_core::{AffinityResolver, EntityId, LocationKey, RegionId, RegionTable};

use crate::config::SchedulerConfig;

/// A [`RegionTable`] behind a read-write lock.
///
/// Clones share the same table, so the host can keep one clone to update
/// entity positions and world loads while the router resolves through another.
#[derive(Debug, Clone, Default)]
pub struct SharedRegionTable {
    table: Arc<RwLock<RegionTable>>,
}

impl SharedRegionTable {
    /// Creates an empty shared table spreading chunks over `region_count` regions.
    #[must_use]
    pub fn new(region_count: u32) -> Self {
        Self::from_table(RegionTable::new(region_count))
    }

    /// Creates an empty shared table sized by `config.region_count`.
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.region_count)
    }

    /// Wraps an existing table.
    #[must_use]
    pub fn from_table(table: RegionTable) -> Self {
        Self {
            table: Arc::new(RwLock::new(table)),
        }
    }

    /// Marks a world as loaded.
    pub fn load_world(&self, world: impl Into<String>) {
        self.table.write().load_world(world);
    }

    /// Unloads a world and forgets the entities inside it.
    pub fn unload_world(&self, world: &str) {
        self.table.write().unload_world(world);
    }

    /// Records (or moves) an entity to a location.
    pub fn place_entity(&self, entity: EntityId, location: LocationKey) {
        self.table.write().place_entity(entity, location);
    }

    /// Forgets an entity.
    pub fn remove_entity(&self, entity: EntityId) -> Option<LocationKey> {
        self.table.write().remove_entity(entity)
    }

    /// Runs `f` with read access to the underlying table.
    pub fn with_table<R>(&self, f: impl FnOnce(&RegionTable) -> R) -> R {
        f(&self.table.read())
    }
}

impl AffinityResolver for SharedRegionTable {
    fn resolve_entity(&self, entity: EntityId) -> Option<RegionId> {
        self.table.read().resolve_entity(entity)
    }

    fn resolve_location(&self, key: &LocationKey) -> Option<RegionId> {
        self.table.read().resolve_location(key)
    }
}

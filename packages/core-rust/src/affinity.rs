//! Affinity resolution: mapping entity and location keys onto region workers.
//!
//! The host environment decides which region owns a key. This module provides:
//!
//! - [`DEFAULT_REGION_COUNT`]: the default number of region workers
//! - [`hash_to_region`]: maps a [`LocationKey`] to a region in `[0, region_count)`
//! - [`AffinityResolver`]: the read-only contract the router consults
//! - [`RegionTable`]: a ready-made table tracking loaded worlds and entity positions

use std::collections::{HashMap, HashSet};

use crate::domain::{EntityId, LocationKey, RegionId};
use crate::hash::fnv1a_hash;

/// Default number of region workers.
pub const DEFAULT_REGION_COUNT: u32 = 64;

// ---------------------------------------------------------------------------
// hash_to_region
// ---------------------------------------------------------------------------

/// Compute the region owning a chunk.
///
/// Hashes the key's `world:chunk_x:chunk_z` form with FNV-1a and reduces it
/// modulo `region_count`. A `region_count` of zero is treated as one.
///
/// # Examples
///
/// ```
/// use taskweave_core::{hash_to_region, LocationKey, RegionId};
///
/// assert_eq!(hash_to_region(&LocationKey::new("world", 0, 0), 64), RegionId(35));
/// ```
#[must_use]
pub fn hash_to_region(key: &LocationKey, region_count: u32) -> RegionId {
    RegionId(fnv1a_hash(&key.to_string()) % region_count.max(1))
}

// ---------------------------------------------------------------------------
// AffinityResolver trait
// ---------------------------------------------------------------------------

/// Read-only ownership queries supplied by the host.
///
/// Returning `None` means the key currently has no owner (the entity was
/// removed, the world is unloaded). The router then applies its
/// unresolved-affinity policy.
pub trait AffinityResolver: Send + Sync {
    /// Region currently owning the entity, if any.
    fn resolve_entity(&self, entity: EntityId) -> Option<RegionId>;

    /// Region currently owning the chunk, if any.
    fn resolve_location(&self, key: &LocationKey) -> Option<RegionId>;
}

/// Resolver that never resolves anything. Every affine submission falls under
/// the router's unresolved-affinity policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unresolved;

impl AffinityResolver for Unresolved {
    fn resolve_entity(&self, _entity: EntityId) -> Option<RegionId> {
        None
    }

    fn resolve_location(&self, _key: &LocationKey) -> Option<RegionId> {
        None
    }
}

// ---------------------------------------------------------------------------
// RegionTable
// ---------------------------------------------------------------------------

/// Hash-partitioned region table with entity tracking.
///
/// Locations resolve only while their world is loaded. Entities resolve to
/// the region of the chunk they were last placed in, until removed.
#[derive(Debug, Clone)]
pub struct RegionTable {
    region_count: u32,
    worlds: HashSet<String>,
    entities: HashMap<EntityId, LocationKey>,
}

impl RegionTable {
    /// Creates an empty table with no loaded worlds.
    #[must_use]
    pub fn new(region_count: u32) -> Self {
        Self {
            region_count: region_count.max(1),
            worlds: HashSet::new(),
            entities: HashMap::new(),
        }
    }

    /// Number of regions keys are spread across.
    #[must_use]
    pub fn region_count(&self) -> u32 {
        self.region_count
    }

    /// Marks a world as loaded so its chunks resolve.
    pub fn load_world(&mut self, world: impl Into<String>) {
        self.worlds.insert(world.into());
    }

    /// Unloads a world. Its chunks and every entity inside it stop resolving.
    pub fn unload_world(&mut self, world: &str) {
        self.worlds.remove(world);
        self.entities.retain(|_, loc| loc.world != world);
    }

    /// Returns `true` if the world is loaded.
    #[must_use]
    pub fn is_loaded(&self, world: &str) -> bool {
        self.worlds.contains(world)
    }

    /// Records (or moves) an entity to a location.
    pub fn place_entity(&mut self, entity: EntityId, location: LocationKey) {
        self.entities.insert(entity, location);
    }

    /// Forgets an entity. Returns its last known location.
    pub fn remove_entity(&mut self, entity: EntityId) -> Option<LocationKey> {
        self.entities.remove(&entity)
    }

    /// Last known location of an entity.
    #[must_use]
    pub fn entity_location(&self, entity: EntityId) -> Option<&LocationKey> {
        self.entities.get(&entity)
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_COUNT)
    }
}

impl AffinityResolver for RegionTable {
    fn resolve_entity(&self, entity: EntityId) -> Option<RegionId> {
        self.entities
            .get(&entity)
            .and_then(|loc| self.resolve_location(loc))
    }

    fn resolve_location(&self, key: &LocationKey) -> Option<RegionId> {
        self.worlds
            .contains(&key.world)
            .then(|| hash_to_region(key, self.region_count))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn hash_to_region_known_vectors() {
        // fnv1a("world:0:0") = 3_965_916_515
        assert_eq!(hash_to_region(&LocationKey::new("world", 0, 0), 64), RegionId(35));
        assert_eq!(hash_to_region(&LocationKey::new("world", 3, -7), 64), RegionId(34));
        assert_eq!(hash_to_region(&LocationKey::new("nether", -1, 12), 64), RegionId(10));
    }

    #[test]
    fn hash_to_region_zero_count_is_single_region() {
        assert_eq!(hash_to_region(&LocationKey::new("world", 9, 9), 0), RegionId(0));
    }

    #[test]
    fn location_resolves_only_when_world_loaded() {
        let mut table = RegionTable::new(64);
        let key = LocationKey::new("world", 0, 0);
        assert_eq!(table.resolve_location(&key), None);

        table.load_world("world");
        assert_eq!(table.resolve_location(&key), Some(RegionId(35)));

        table.unload_world("world");
        assert_eq!(table.resolve_location(&key), None);
    }

    #[test]
    fn entity_follows_its_location() {
        let mut table = RegionTable::new(64);
        table.load_world("world");
        let id = EntityId::random();
        assert_eq!(table.resolve_entity(id), None);

        table.place_entity(id, LocationKey::new("world", 0, 0));
        assert_eq!(table.resolve_entity(id), Some(RegionId(35)));

        table.place_entity(id, LocationKey::new("world", 3, -7));
        assert_eq!(table.resolve_entity(id), Some(RegionId(34)));

        assert_eq!(table.remove_entity(id), Some(LocationKey::new("world", 3, -7)));
        assert_eq!(table.resolve_entity(id), None);
    }

    #[test]
    fn unloading_world_drops_its_entities() {
        let mut table = RegionTable::default();
        table.load_world("world");
        table.load_world("nether");
        let a = EntityId::random();
        let b = EntityId::random();
        table.place_entity(a, LocationKey::new("world", 1, 1));
        table.place_entity(b, LocationKey::new("nether", 1, 1));

        table.unload_world("world");
        assert!(table.entity_location(a).is_none());
        assert!(table.entity_location(b).is_some());
        assert!(!table.is_loaded("world"));
        assert!(table.is_loaded("nether"));
    }

    #[test]
    fn unresolved_resolver_never_resolves() {
        assert_eq!(Unresolved.resolve_entity(EntityId::random()), None);
        assert_eq!(Unresolved.resolve_location(&LocationKey::new("w", 0, 0)), None);
    }

    proptest! {
        #[test]
        fn region_always_in_range(
            world in "[a-z_]{1,12}",
            x in any::<i32>(),
            z in any::<i32>(),
            count in 1u32..512,
        ) {
            let region = hash_to_region(&LocationKey::new(world, x, z), count);
            prop_assert!(region.0 < count);
        }
    }
}

//! Domain descriptors and the concrete workers they resolve to.
//!
//! A [`Domain`] names *where* a unit of work wants to run. A [`WorkerId`]
//! names the serial worker (or pool) that actually runs it once the router has
//! resolved any affinity key.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of blocks along one edge of a chunk.
pub const CHUNK_SIZE: i32 = 16;

// ---------------------------------------------------------------------------
// Affinity keys
// ---------------------------------------------------------------------------

/// Identity of a runtime entity whose owning region can move over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Generates a fresh random entity id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// A chunk-granular location inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    /// Name of the world the chunk belongs to.
    pub world: String,
    /// Chunk X coordinate.
    pub chunk_x: i32,
    /// Chunk Z coordinate.
    pub chunk_z: i32,
}

impl LocationKey {
    /// Creates a key from chunk coordinates.
    pub fn new(world: impl Into<String>, chunk_x: i32, chunk_z: i32) -> Self {
        Self {
            world: world.into(),
            chunk_x,
            chunk_z,
        }
    }

    /// Creates a key from block coordinates, flooring into the containing chunk.
    ///
    /// ```
    /// use taskweave_core::LocationKey;
    ///
    /// assert_eq!(LocationKey::from_block("world", 17, -1), LocationKey::new("world", 1, -1));
    /// ```
    pub fn from_block(world: impl Into<String>, block_x: i32, block_z: i32) -> Self {
        Self::new(
            world,
            block_x.div_euclid(CHUNK_SIZE),
            block_z.div_euclid(CHUNK_SIZE),
        )
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.world, self.chunk_x, self.chunk_z)
    }
}

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Where a unit of work asks to run.
///
/// `Global` and `Background` always resolve. The affinity variants are
/// resolved to a region by the host's
/// [`AffinityResolver`](crate::affinity::AffinityResolver) at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    /// The single global serial context.
    Global,
    /// The unbounded background pool. No ordering between tasks.
    Background,
    /// Whichever region currently owns the entity.
    Entity(EntityId),
    /// Whichever region currently owns the chunk.
    Location(LocationKey),
}

impl Domain {
    /// Returns `true` for the affinity-keyed variants.
    #[must_use]
    pub fn is_affine(&self) -> bool {
        matches!(self, Self::Entity(_) | Self::Location(_))
    }
}

impl From<EntityId> for Domain {
    fn from(id: EntityId) -> Self {
        Self::Entity(id)
    }
}

impl From<LocationKey> for Domain {
    fn from(key: LocationKey) -> Self {
        Self::Location(key)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Background => f.write_str("background"),
            Self::Entity(id) => write!(f, "{id}"),
            Self::Location(key) => write!(f, "location:{key}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved workers
// ---------------------------------------------------------------------------

/// Identifier of one spatial region worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// The concrete execution context a [`Domain`] resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerId {
    /// The global serial worker.
    Global,
    /// The background pool.
    Background,
    /// A region's serial worker.
    Region(RegionId),
}

impl WorkerId {
    /// Returns `true` if tasks on this worker run one at a time in order.
    #[must_use]
    pub fn is_serial(self) -> bool {
        !matches!(self, Self::Background)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Background => f.write_str("background"),
            Self::Region(id) => write!(f, "{id}"),
        }
    }
}

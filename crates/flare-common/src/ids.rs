//! ID types for emitters, views, and render resources.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for emitter instance IDs.
static EMITTER_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a live emitter instance.
///
/// Stable for the lifetime of the emitter; used to key per-emitter render
/// state that outlives a single frame (motion blur transforms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmitterInstanceId(u64);

impl EmitterInstanceId {
    /// Creates a new unique emitter instance ID.
    #[must_use]
    pub fn new() -> Self {
        Self(EMITTER_INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates an ID from a raw value (for deserialization).
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Null/invalid emitter instance ID.
    pub const NULL: Self = Self(0);

    /// Checks if this is a valid (non-null) ID.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for EmitterInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier for a scene view within a view family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ViewId(u32);

impl ViewId {
    /// Creates a view ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Opaque handle to a host material render proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialProxyId(u32);

impl MaterialProxyId {
    /// Creates a material proxy handle.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Per-particle identifier assigned at spawn time.
///
/// Persists for the particle's life, so it can key previous-frame data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticleId(u32);

impl ParticleId {
    /// Creates a particle ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Identifier of one vertex factory instance inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexFactoryId(u32);

impl VertexFactoryId {
    /// Creates a vertex factory ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VertexFactoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vf#{}", self.0)
    }
}

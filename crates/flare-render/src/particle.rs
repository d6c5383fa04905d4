//! Particle record and flat particle pool.
//!
//! Particles live in one contiguous byte array of fixed-stride records. Each
//! record starts with a [`BaseParticle`] and is followed by the payload
//! trailer reserved by simulation modules. An index array provides the
//! active/free permutation over the slots.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use flare_common::RenderError;

use crate::payload::{ParticleRef, PayloadOffset};

/// Maximum pool capacity addressable by 16-bit particle indices.
pub const MAX_PARTICLE_CAPACITY: usize = 65_536;

/// Alignment applied to the particle stride.
pub const PARTICLE_ALIGNMENT: usize = 16;

/// Simulation state bits stored in [`BaseParticle::flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ParticleStateFlags(u32);

impl ParticleStateFlags {
    /// Simulation leaves the particle untouched.
    pub const FREEZE: Self = Self(0x0000_0001);
    /// Collision checks are skipped.
    pub const IGNORE_COLLISIONS: Self = Self(0x0000_0002);
    /// Location is not integrated.
    pub const FREEZE_TRANSLATION: Self = Self(0x0000_0004);
    /// Rotation is not integrated.
    pub const FREEZE_ROTATION: Self = Self(0x0000_0008);
    /// Collision checks start after a delay.
    pub const DELAY_COLLISIONS: Self = Self(0x0000_0010);
    /// A collision happened this life.
    pub const COLLISION_HAS_OCCURRED: Self = Self(0x0000_0020);
    /// Collided with a point attractor.
    pub const COLLIDED_WITH_ATTRACTOR: Self = Self(0x0000_0040);

    /// No flags set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates flags from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Checks whether all bits of `other` are set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ParticleStateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The fixed part of every particle record.
///
/// Layout is part of the replay capture format: eight 16-byte rows, 128 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BaseParticle {
    /// Location last frame
    pub old_location: [f32; 3],
    /// Normalized age, 0 at spawn and 1 at death
    pub relative_time: f32,
    /// Current location
    pub location: [f32; 3],
    /// Reciprocal of the lifetime in seconds
    pub one_over_max_lifetime: f32,
    /// Velocity before module contributions
    pub base_velocity: [f32; 3],
    /// Sprite rotation in radians
    pub rotation: f32,
    /// Current velocity
    pub velocity: [f32; 3],
    /// Rotation rate before module contributions
    pub base_rotation_rate: f32,
    /// Size before module contributions
    pub base_size: [f32; 3],
    /// Current rotation rate
    pub rotation_rate: f32,
    /// Current size
    pub size: [f32; 3],
    /// [`ParticleStateFlags`] bits
    pub flags: u32,
    /// Current linear color
    pub color: [f32; 4],
    /// Color before module contributions
    pub base_color: [f32; 4],
}

impl Default for BaseParticle {
    fn default() -> Self {
        Self {
            old_location: [0.0; 3],
            relative_time: 0.0,
            location: [0.0; 3],
            one_over_max_lifetime: 1.0,
            base_velocity: [0.0; 3],
            rotation: 0.0,
            velocity: [0.0; 3],
            base_rotation_rate: 0.0,
            base_size: [1.0; 3],
            rotation_rate: 0.0,
            size: [1.0; 3],
            flags: 0,
            color: [1.0; 4],
            base_color: [1.0; 4],
        }
    }
}

impl BaseParticle {
    /// Size of the record in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates a particle at `location` with both old and new location set.
    #[must_use]
    pub fn at(location: Vec3) -> Self {
        Self {
            old_location: location.to_array(),
            location: location.to_array(),
            ..Self::default()
        }
    }

    /// Sets current and base size.
    #[must_use]
    pub fn with_size(mut self, size: Vec3) -> Self {
        self.size = size.to_array();
        self.base_size = size.to_array();
        self
    }

    /// Sets current and base color.
    #[must_use]
    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color.to_array();
        self.base_color = color.to_array();
        self
    }

    /// Sets the normalized age.
    #[must_use]
    pub fn with_relative_time(mut self, relative_time: f32) -> Self {
        self.relative_time = relative_time;
        self
    }

    /// Sets the current velocity.
    #[must_use]
    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity.to_array();
        self.base_velocity = velocity.to_array();
        self
    }

    /// Sets the sprite rotation in radians.
    #[must_use]
    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    /// Current location.
    #[must_use]
    pub fn location(&self) -> Vec3 {
        Vec3::from_array(self.location)
    }

    /// Location last frame.
    #[must_use]
    pub fn old_location(&self) -> Vec3 {
        Vec3::from_array(self.old_location)
    }

    /// Current velocity.
    #[must_use]
    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }

    /// Current size.
    #[must_use]
    pub fn size(&self) -> Vec3 {
        Vec3::from_array(self.size)
    }

    /// Current color.
    #[must_use]
    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }

    /// Simulation state flags.
    #[must_use]
    pub const fn state_flags(&self) -> ParticleStateFlags {
        ParticleStateFlags::from_bits(self.flags)
    }

    /// Whether the particle reached the end of its life.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.relative_time >= 1.0
    }
}

/// Rounds a byte count up to the particle alignment.
#[must_use]
pub const fn aligned_stride(bytes: usize) -> usize {
    (bytes + PARTICLE_ALIGNMENT - 1) & !(PARTICLE_ALIGNMENT - 1)
}

/// Flat particle storage with an active/free index permutation.
#[derive(Debug, Clone)]
pub struct ParticleBuffer {
    data: Vec<u8>,
    indices: Vec<u16>,
    stride: usize,
    active: usize,
}

impl ParticleBuffer {
    /// Creates a pool of `max_particles` records with `payload_bytes` of
    /// trailer after each base record.
    pub fn new(max_particles: usize, payload_bytes: usize) -> Result<Self, RenderError> {
        if max_particles == 0 || max_particles > MAX_PARTICLE_CAPACITY {
            return Err(RenderError::InvalidCapacity(max_particles));
        }
        let stride = aligned_stride(BaseParticle::SIZE + payload_bytes);
        let indices = (0..max_particles).map(|i| i as u16).collect();
        Ok(Self {
            data: vec![0; max_particles * stride],
            indices,
            stride,
            active: 0,
        })
    }

    /// Bytes per particle record.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Number of live particles.
    #[must_use]
    pub const fn active_count(&self) -> usize {
        self.active
    }

    /// Pool capacity.
    #[must_use]
    pub fn max_particles(&self) -> usize {
        self.indices.len()
    }

    /// Raw particle bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Full index array; `[0, active)` are live slots.
    #[must_use]
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Live slots in index order.
    #[must_use]
    pub fn active_indices(&self) -> &[u16] {
        &self.indices[..self.active]
    }

    /// Claims a free slot and writes `particle` into it.
    ///
    /// Returns the slot, or `None` when the pool is full. The payload trailer
    /// of the claimed slot is zeroed.
    pub fn spawn(&mut self, particle: BaseParticle) -> Option<u16> {
        if self.active >= self.indices.len() {
            debug!("Particle pool full ({} slots)", self.indices.len());
            return None;
        }
        let slot = self.indices[self.active];
        self.active += 1;
        let start = usize::from(slot) * self.stride;
        self.data[start..start + self.stride].fill(0);
        self.write_particle(slot, &particle);
        Some(slot)
    }

    /// Kills the particle at `active_position` in the index array.
    ///
    /// The last live index is swapped into its place, so index order is not
    /// preserved.
    pub fn kill(&mut self, active_position: usize) {
        if active_position >= self.active {
            return;
        }
        let last = self.active - 1;
        self.indices.swap(active_position, last);
        self.active = last;
    }

    /// Kills every particle whose relative time reached 1.
    ///
    /// Returns the number of particles removed.
    pub fn kill_dead(&mut self) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.active {
            if self.particle_at(i).is_some_and(|p| p.is_dead()) {
                self.kill(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Reads the base record of `slot`.
    #[must_use]
    pub fn particle(&self, slot: u16) -> Option<BaseParticle> {
        self.particle_ref(slot).map(|p| p.base())
    }

    /// Reads the base record at `active_position` in the index array.
    #[must_use]
    pub fn particle_at(&self, active_position: usize) -> Option<BaseParticle> {
        if active_position >= self.active {
            return None;
        }
        self.particle(self.indices[active_position])
    }

    /// Borrows the full record (base and payload) of `slot`.
    #[must_use]
    pub fn particle_ref(&self, slot: u16) -> Option<ParticleRef<'_>> {
        let start = usize::from(slot) * self.stride;
        self.data
            .get(start..start + self.stride)
            .and_then(ParticleRef::new)
    }

    /// Reads a payload value of `slot`.
    #[must_use]
    pub fn read_payload<T: Pod>(&self, slot: u16, offset: PayloadOffset<T>) -> Option<T> {
        self.particle_ref(slot)?.payload(offset)
    }

    /// Overwrites the base record of `slot`.
    pub fn write_particle(&mut self, slot: u16, particle: &BaseParticle) {
        let start = usize::from(slot) * self.stride;
        if let Some(dst) = self.data.get_mut(start..start + BaseParticle::SIZE) {
            dst.copy_from_slice(bytemuck::bytes_of(particle));
        }
    }

    /// Writes a payload value at `offset` bytes into the record of `slot`.
    pub fn write_payload<T: Pod>(&mut self, slot: u16, offset: usize, value: &T) -> Result<(), RenderError> {
        self.write_payload_bytes(slot, offset, bytemuck::bytes_of(value))
    }

    /// Writes a run of payload values starting at `offset`.
    pub fn write_payload_slice<T: Pod>(&mut self, slot: u16, offset: usize, values: &[T]) -> Result<(), RenderError> {
        self.write_payload_bytes(slot, offset, bytemuck::cast_slice(values))
    }

    fn write_payload_bytes(&mut self, slot: u16, offset: usize, bytes: &[u8]) -> Result<(), RenderError> {
        if offset + bytes.len() > self.stride {
            return Err(RenderError::PayloadOutOfBounds {
                offset,
                size: bytes.len(),
                stride: self.stride,
            });
        }
        let start = usize::from(slot) * self.stride + offset;
        let dst = self
            .data
            .get_mut(start..start + bytes.len())
            .ok_or(RenderError::PayloadOutOfBounds {
                offset,
                size: bytes.len(),
                stride: self.stride,
            })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Checks the index-array invariant: live entries are distinct and in
    /// range.
    #[must_use]
    pub fn validate_indices(&self) -> bool {
        if self.active > self.indices.len() {
            return false;
        }
        let mut seen = vec![false; self.indices.len()];
        for &slot in &self.indices[..self.active] {
            let slot = usize::from(slot);
            if slot >= seen.len() || seen[slot] {
                return false;
            }
            seen[slot] = true;
        }
        true
    }
}

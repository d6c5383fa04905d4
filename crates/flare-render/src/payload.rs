//! Typed access to the payload trailer that follows each base particle.
//!
//! Simulation modules reserve payload bytes at offsets fixed when the emitter
//! is set up. Snapshots carry those offsets as [`PayloadOffset<T>`] so the
//! render side can read them back without knowing the module stack. Every
//! read is bounds-checked against the record length.

use std::fmt;
use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::particle::{aligned_stride, BaseParticle};

/// Byte offset of a payload of type `T` inside a particle record.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct PayloadOffset<T> {
    offset: u32,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> PayloadOffset<T> {
    /// Creates an offset.
    #[must_use]
    pub const fn new(offset: u32) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// Byte offset from the start of the record.
    #[must_use]
    pub const fn get(self) -> usize {
        self.offset as usize
    }

    /// Reinterprets the offset as pointing at another payload type.
    #[must_use]
    pub const fn cast<U>(self) -> PayloadOffset<U> {
        PayloadOffset::new(self.offset)
    }
}

impl<T> Clone for PayloadOffset<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PayloadOffset<T> {}

impl<T> PartialEq for PayloadOffset<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for PayloadOffset<T> {}

impl<T> fmt::Debug for PayloadOffset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadOffset({})", self.offset)
    }
}

/// Borrowed view of one particle record.
#[derive(Debug, Clone, Copy)]
pub struct ParticleRef<'a> {
    bytes: &'a [u8],
}

impl<'a> ParticleRef<'a> {
    /// Wraps a record. Returns `None` when the bytes cannot hold a base
    /// particle.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        (bytes.len() >= BaseParticle::SIZE).then_some(Self { bytes })
    }

    /// Reads the base particle.
    #[must_use]
    pub fn base(&self) -> BaseParticle {
        bytemuck::pod_read_unaligned(&self.bytes[..BaseParticle::SIZE])
    }

    /// Record length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a record holds at least a base particle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads the payload at `offset`, or `None` when it does not fit.
    #[must_use]
    pub fn payload<T: Pod>(&self, offset: PayloadOffset<T>) -> Option<T> {
        let start = offset.get();
        let end = start.checked_add(std::mem::size_of::<T>())?;
        self.bytes.get(start..end).map(bytemuck::pod_read_unaligned)
    }

    /// Reads element `index` of a payload array starting at `offset`.
    #[must_use]
    pub fn payload_at<T: Pod>(&self, offset: PayloadOffset<T>, index: usize) -> Option<T> {
        let size = std::mem::size_of::<T>();
        let start = offset.get().checked_add(index.checked_mul(size)?)?;
        self.bytes
            .get(start..start.checked_add(size)?)
            .map(bytemuck::pod_read_unaligned)
    }

    /// Reads `count` consecutive payload values starting at `offset`.
    #[must_use]
    pub fn payload_array<T: Pod>(&self, offset: PayloadOffset<T>, count: usize) -> Option<Vec<T>> {
        let size = std::mem::size_of::<T>();
        let start = offset.get();
        let end = start.checked_add(size.checked_mul(count)?)?;
        let bytes = self.bytes.get(start..end)?;
        Some(
            bytes
                .chunks_exact(size)
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        )
    }
}

/// Logs the first out-of-bounds payload read of a packer pass.
#[derive(Debug)]
pub struct PayloadWarner {
    emitter: &'static str,
    warned: bool,
}

impl PayloadWarner {
    /// Creates a warner for one packer invocation.
    #[must_use]
    pub const fn new(emitter: &'static str) -> Self {
        Self {
            emitter,
            warned: false,
        }
    }

    /// Reads an optional payload, treating bounds failures as absent.
    pub fn read<T: Pod>(&mut self, particle: &ParticleRef<'_>, offset: Option<PayloadOffset<T>>) -> Option<T> {
        let offset = offset?;
        let value = particle.payload(offset);
        if value.is_none() {
            self.report(offset.get(), std::mem::size_of::<T>(), particle.len());
        }
        value
    }

    /// Records a failed read.
    pub fn report(&mut self, offset: usize, size: usize, stride: usize) {
        if !self.warned {
            warn!(
                "{} payload at offset {} (+{} bytes) exceeds stride {}; treating as absent",
                self.emitter, offset, size, stride
            );
            self.warned = true;
        }
    }

    /// Whether a failure was recorded.
    #[must_use]
    pub const fn warned(&self) -> bool {
        self.warned
    }
}

/// Payload categories tracked by [`PayloadLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// [`SubUvPayload`]
    SubUv,
    /// [`OrbitPayload`]
    Orbit,
    /// [`CameraOffsetPayload`]
    CameraOffset,
    /// [`DynamicParameterPayload`]
    DynamicParameter,
    /// [`MeshRotationPayload`]
    MeshRotation,
    /// [`MeshTypePayload`]
    MeshType,
    /// [`BeamPayload`]
    Beam,
    /// [`Trail2Payload`]
    Trail2,
    /// [`RibbonPayload`]
    Ribbon,
    /// [`AnimTrailPayload`]
    AnimTrail,
    /// Untyped module data
    Raw,
}

/// Assigns consecutive payload offsets after the base record.
#[derive(Debug, Clone)]
pub struct PayloadLayout {
    next: usize,
    entries: Vec<(PayloadKind, u32)>,
}

impl Default for PayloadLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadLayout {
    /// Starts a layout directly after the base particle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: BaseParticle::SIZE,
            entries: Vec::new(),
        }
    }

    /// Reserves room for one `T`.
    pub fn push<T: Pod>(&mut self, kind: PayloadKind) -> PayloadOffset<T> {
        self.push_array(kind, 1)
    }

    /// Reserves room for `count` consecutive `T` values.
    pub fn push_array<T: Pod>(&mut self, kind: PayloadKind, count: usize) -> PayloadOffset<T> {
        let offset = self.next as u32;
        self.next += std::mem::size_of::<T>() * count;
        self.entries.push((kind, offset));
        PayloadOffset::new(offset)
    }

    /// Payload bytes reserved so far, excluding the base record.
    #[must_use]
    pub const fn payload_bytes(&self) -> usize {
        self.next - BaseParticle::SIZE
    }

    /// Stride of a record using this layout.
    #[must_use]
    pub const fn stride(&self) -> usize {
        aligned_stride(self.next)
    }

    /// Offset of the first payload of `kind`.
    #[must_use]
    pub fn offset_of(&self, kind: PayloadKind) -> Option<u32> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, offset)| *offset)
    }

    /// All reserved `(kind, offset)` pairs in order.
    #[must_use]
    pub fn entries(&self) -> &[(PayloadKind, u32)] {
        &self.entries
    }
}

/// Sub-image animation state.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SubUvPayload {
    /// Random start time for the flip-book
    pub random_image_time: f32,
    /// Horizontal index, vertical index, blend factor (or raw UV offset)
    pub image_hv_interp_uv_offset: [f32; 3],
    /// Second image horizontal/vertical index (or UV size in direct mode)
    pub image2_hv_uv2_offset: [f32; 3],
}

impl SubUvPayload {
    /// First image `(h, v, interp)`.
    #[must_use]
    pub fn image_hv(&self) -> Vec3 {
        Vec3::from_array(self.image_hv_interp_uv_offset)
    }

    /// Second image `(h, v, _)`.
    #[must_use]
    pub fn image2_hv(&self) -> Vec3 {
        Vec3::from_array(self.image2_hv_uv2_offset)
    }
}

/// Orbit offset applied around the particle location.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct OrbitPayload {
    /// Offset this frame
    pub offset: [f32; 3],
    /// Offset last frame
    pub previous_offset: [f32; 3],
}

impl OrbitPayload {
    /// Offset this frame.
    #[must_use]
    pub fn offset(&self) -> Vec3 {
        Vec3::from_array(self.offset)
    }

    /// Offset last frame.
    #[must_use]
    pub fn previous_offset(&self) -> Vec3 {
        Vec3::from_array(self.previous_offset)
    }
}

/// Distance to pull the particle toward the camera.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CameraOffsetPayload {
    /// Offset at spawn
    pub base_offset: f32,
    /// Current offset
    pub offset: f32,
}

/// Per-particle material parameter.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DynamicParameterPayload {
    /// Parameter value
    pub value: [f32; 4],
    /// Curve time index used by the simulation
    pub time_index: i32,
}

impl Default for DynamicParameterPayload {
    fn default() -> Self {
        Self {
            value: [1.0; 4],
            time_index: 0,
        }
    }
}

impl DynamicParameterPayload {
    /// Parameter value.
    #[must_use]
    pub fn value(&self) -> Vec4 {
        Vec4::from_array(self.value)
    }
}

/// Per-particle mesh rotation in degrees.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct MeshRotationPayload {
    /// Current rotation (roll, pitch, yaw in degrees)
    pub rotation: [f32; 3],
    /// Current rotation rate
    pub rotation_rate: [f32; 3],
    /// Rotation rate at spawn
    pub rotation_rate_base: [f32; 3],
}

impl MeshRotationPayload {
    /// Current rotation in degrees.
    #[must_use]
    pub fn rotation(&self) -> Vec3 {
        Vec3::from_array(self.rotation)
    }
}

/// Stable particle identity for motion blur.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshTypePayload {
    /// Identifier assigned at spawn
    pub particle_id: u32,
}

/// Beam topology and tangents.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BeamPayload {
    /// Beam start
    pub source_point: [f32; 3],
    /// Start tangent
    pub source_tangent: [f32; 3],
    /// Start tangent strength
    pub source_strength: f32,
    /// Beam end
    pub target_point: [f32; 3],
    /// End tangent
    pub target_tangent: [f32; 3],
    /// End tangent strength
    pub target_strength: f32,
    /// Packed lock flag, noise-max flag, frequency and noise point count
    pub lock_max_num_noise_points: u32,
    /// Interpolated segment count
    pub interpolation_steps: i32,
    /// Step direction
    pub direction: [f32; 3],
    /// Step length
    pub step_size: f32,
    /// Segment count to render
    pub steps: i32,
    /// Fraction of the partial last segment
    pub travel_ratio: f32,
    /// Triangles per sheet
    pub triangle_count: i32,
    /// Packed chain link
    pub flags: u32,
}

impl BeamPayload {
    /// Target lock bit.
    pub const LOCKED_MASK: u32 = 0x8000_0000;
    /// Noise reached its extreme.
    pub const NOISE_MAX_MASK: u32 = 0x4000_0000;
    /// Noise point count bits.
    pub const NOISE_POINTS_MASK: u32 = 0x0000_0fff;
    /// Noise frequency bits.
    pub const FREQUENCY_MASK: u32 = 0x00ff_f000;
    /// Shift applied to the frequency bits.
    pub const FREQUENCY_SHIFT: u32 = 12;

    /// Beam start.
    #[must_use]
    pub fn source_point(&self) -> Vec3 {
        Vec3::from_array(self.source_point)
    }

    /// Start tangent.
    #[must_use]
    pub fn source_tangent(&self) -> Vec3 {
        Vec3::from_array(self.source_tangent)
    }

    /// Beam end.
    #[must_use]
    pub fn target_point(&self) -> Vec3 {
        Vec3::from_array(self.target_point)
    }

    /// End tangent.
    #[must_use]
    pub fn target_tangent(&self) -> Vec3 {
        Vec3::from_array(self.target_tangent)
    }

    /// Step direction.
    #[must_use]
    pub fn direction(&self) -> Vec3 {
        Vec3::from_array(self.direction)
    }

    /// Whether the beam target is locked.
    #[must_use]
    pub const fn locked(&self) -> bool {
        self.lock_max_num_noise_points & Self::LOCKED_MASK != 0
    }

    /// Whether the noise hit its extreme.
    #[must_use]
    pub const fn noise_max(&self) -> bool {
        self.lock_max_num_noise_points & Self::NOISE_MAX_MASK != 0
    }

    /// Number of noise points.
    #[must_use]
    pub const fn noise_points(&self) -> u32 {
        self.lock_max_num_noise_points & Self::NOISE_POINTS_MASK
    }

    /// Noise frequency.
    #[must_use]
    pub const fn frequency(&self) -> u32 {
        (self.lock_max_num_noise_points & Self::FREQUENCY_MASK) >> Self::FREQUENCY_SHIFT
    }

    /// Sets or clears the lock bit.
    pub fn set_locked(&mut self, locked: bool) {
        if locked {
            self.lock_max_num_noise_points |= Self::LOCKED_MASK;
        } else {
            self.lock_max_num_noise_points &= !Self::LOCKED_MASK;
        }
    }

    /// Sets or clears the noise-max bit.
    pub fn set_noise_max(&mut self, max: bool) {
        if max {
            self.lock_max_num_noise_points |= Self::NOISE_MAX_MASK;
        } else {
            self.lock_max_num_noise_points &= !Self::NOISE_MAX_MASK;
        }
    }

    /// Stores the noise point count.
    pub fn set_noise_points(&mut self, count: u32) {
        self.lock_max_num_noise_points =
            (self.lock_max_num_noise_points & !Self::NOISE_POINTS_MASK) | (count & Self::NOISE_POINTS_MASK);
    }

    /// Stores the noise frequency.
    pub fn set_frequency(&mut self, frequency: u32) {
        self.lock_max_num_noise_points = (self.lock_max_num_noise_points & !Self::FREQUENCY_MASK)
            | ((frequency << Self::FREQUENCY_SHIFT) & Self::FREQUENCY_MASK);
    }
}

/// Legacy trail node data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Trail2Payload {
    /// Packed chain link
    pub flags: u32,
    /// Trail this node belongs to
    pub trail_index: i32,
    /// Triangles for the whole trail (head only)
    pub triangle_count: i32,
    /// Node velocity
    pub velocity: [f32; 3],
    /// Node tangent
    pub tangent: [f32; 3],
}

impl Trail2Payload {
    /// Node tangent.
    #[must_use]
    pub fn tangent(&self) -> Vec3 {
        Vec3::from_array(self.tangent)
    }
}

/// Fields shared by ribbon and anim-trail nodes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct TrailsBasePayload {
    /// Packed chain link
    pub flags: u32,
    /// Trail this node belongs to
    pub trail_index: i32,
    /// Triangles for the whole trail (head only)
    pub triangle_count: i32,
    /// Spawn time of the node
    pub spawn_time: f32,
    /// Time since the previous node spawned
    pub spawn_delta: f32,
    /// Texture U along the trail
    pub tiled_u: f32,
    /// Tessellation points spawned with this node
    pub spawned_tessellation_points: i32,
    /// Interpolated pairs to emit before this node
    pub rendering_interp_count: i32,
    /// Width scale
    pub pinch_scale_factor: f32,
    /// Spawned by interpolation
    pub interpolated_spawn: u32,
    /// Spawned by movement
    pub movement_spawned: u32,
}

/// Ribbon node data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct RibbonPayload {
    /// Shared trail fields
    pub base: TrailsBasePayload,
    /// Node tangent
    pub tangent: [f32; 3],
    /// Stored up vector
    pub up: [f32; 3],
    /// Source particle index, or -1
    pub source_index: i32,
}

impl RibbonPayload {
    /// Node tangent.
    #[must_use]
    pub fn tangent(&self) -> Vec3 {
        Vec3::from_array(self.tangent)
    }

    /// Stored up vector.
    #[must_use]
    pub fn up(&self) -> Vec3 {
        Vec3::from_array(self.up)
    }
}

/// Anim-trail node data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct AnimTrailPayload {
    /// Shared trail fields
    pub base: TrailsBasePayload,
    /// Node direction
    pub direction: [f32; 3],
    /// Node tangent
    pub tangent: [f32; 3],
    /// First edge point
    pub first_edge: [f32; 3],
    /// Velocity of the first edge
    pub first_velocity: [f32; 3],
    /// Second edge point
    pub second_edge: [f32; 3],
    /// Velocity of the second edge
    pub second_velocity: [f32; 3],
    /// Velocity of the control point
    pub control_velocity: [f32; 3],
}

impl AnimTrailPayload {
    /// First edge point.
    #[must_use]
    pub fn first_edge(&self) -> Vec3 {
        Vec3::from_array(self.first_edge)
    }

    /// Second edge point.
    #[must_use]
    pub fn second_edge(&self) -> Vec3 {
        Vec3::from_array(self.second_edge)
    }

    /// Velocity of the first edge.
    #[must_use]
    pub fn first_velocity(&self) -> Vec3 {
        Vec3::from_array(self.first_velocity)
    }

    /// Velocity of the second edge.
    #[must_use]
    pub fn second_velocity(&self) -> Vec3 {
        Vec3::from_array(self.second_velocity)
    }
}

//! Per-frame particle snapshots handed from simulation to rendering.
//!
//! A snapshot is plain serializable data: the particle bytes, the active
//! index array, and the per-kind settings the packers need. It is built on
//! the producing thread, wrapped in an `Arc` and never mutated afterwards.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::chain::{ChainLink, ChainWalker};
use crate::culling::DistanceCulling;
use crate::particle::ParticleBuffer;
use crate::payload::{
    BeamPayload, CameraOffsetPayload, DynamicParameterPayload, MeshRotationPayload, MeshTypePayload,
    OrbitPayload, ParticleRef, PayloadOffset, SubUvPayload, Trail2Payload, TrailsBasePayload,
};
use crate::sort::SortMode;

/// Most beams one emitter may carry.
pub const MAX_BEAMS: u32 = 2048;
/// Most interpolation points along one beam.
pub const MAX_INTERPOLATION_POINTS: u32 = 250;
/// Most noise points along one beam.
pub const MAX_NOISE_FREQUENCY: u32 = 250;

/// Particle kind of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EmitterKind {
    /// Not set
    #[default]
    Unknown,
    /// Camera-facing sprites
    Sprite,
    /// Flip-book sprites
    SubUv,
    /// Static mesh instances
    Mesh,
    /// Beams between a source and a target
    Beam,
    /// Legacy trails
    Trail,
    /// Ribbon trails
    Ribbon,
    /// Animation-sampled trails
    AnimTrail,
}

impl EmitterKind {
    /// Display name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Sprite => "Sprite",
            Self::SubUv => "SubUV",
            Self::Mesh => "Mesh",
            Self::Beam => "Beam",
            Self::Trail => "Trail",
            Self::Ribbon => "Ribbon",
            Self::AnimTrail => "AnimTrail",
        }
    }
}

/// Data every snapshot carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayBase {
    /// Particle kind
    pub kind: EmitterKind,
    /// Live particles
    pub active_particle_count: u32,
    /// Bytes per particle record
    pub particle_stride: u32,
    /// Raw particle records
    pub particle_data: Vec<u8>,
    /// Slots of the live particles
    pub particle_indices: Vec<u16>,
    /// Emitter scale
    pub scale: Vec3,
    /// Draw order
    pub sort_mode: SortMode,
    /// Use the emitter's macro-UV settings over the system's
    pub override_system_macro_uv: bool,
    /// Macro-UV radius
    pub macro_uv_radius: f32,
    /// Macro-UV center
    pub macro_uv_position: Vec3,
}

impl ReplayBase {
    /// Snapshots the live particles of a pool.
    #[must_use]
    pub fn from_buffer(kind: EmitterKind, buffer: &ParticleBuffer) -> Self {
        Self {
            kind,
            active_particle_count: buffer.active_count() as u32,
            particle_stride: buffer.stride() as u32,
            particle_data: buffer.data().to_vec(),
            particle_indices: buffer.active_indices().to_vec(),
            scale: Vec3::ONE,
            ..Self::default()
        }
    }

    /// Live particles, clamped to what the index array actually holds.
    #[must_use]
    pub fn active_count(&self) -> usize {
        (self.active_particle_count as usize).min(self.particle_indices.len())
    }

    /// Number of record slots in `particle_data`.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        if self.particle_stride == 0 {
            0
        } else {
            self.particle_data.len() / self.particle_stride as usize
        }
    }

    /// Slot of live particle `i`.
    #[must_use]
    pub fn slot(&self, i: usize) -> Option<u16> {
        if i >= self.active_count() {
            return None;
        }
        self.particle_indices.get(i).copied()
    }

    /// Record in `slot`.
    #[must_use]
    pub fn particle_in_slot(&self, slot: u16) -> Option<ParticleRef<'_>> {
        let stride = self.particle_stride as usize;
        let start = slot as usize * stride;
        self.particle_data
            .get(start..start + stride)
            .and_then(ParticleRef::new)
    }

    /// Record of live particle `i`.
    #[must_use]
    pub fn particle(&self, i: usize) -> Option<ParticleRef<'_>> {
        self.slot(i).and_then(|slot| self.particle_in_slot(slot))
    }

    /// Chain link stored in the flags word at `flags` of `slot`.
    #[must_use]
    pub fn chain_link(&self, slot: u16, flags: PayloadOffset<u32>) -> Option<ChainLink> {
        if slot as usize >= self.slot_count() {
            return None;
        }
        self.particle_in_slot(slot)?.payload(flags).map(ChainLink::unpack)
    }

    /// Walks the chain starting at `head`, bounded by the live count.
    pub fn walk_chain(
        &self,
        head: u16,
        flags: PayloadOffset<u32>,
    ) -> ChainWalker<impl FnMut(u16) -> Option<ChainLink> + '_> {
        ChainWalker::new(head, self.active_count(), move |slot| self.chain_link(slot, flags))
    }
}

/// How sprites orient toward the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScreenAlignment {
    /// Square sprites
    #[default]
    Square,
    /// Independent width and height
    Rectangle,
    /// Stretched along velocity
    Velocity,
    /// Decided by the type data (mesh facing)
    TypeSpecific,
}

/// Axis a sprite or mesh is locked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AxisLock {
    /// Free
    #[default]
    None,
    /// +X
    X,
    /// +Y
    Y,
    /// +Z
    Z,
    /// -X
    NegX,
    /// -Y
    NegY,
    /// -Z
    NegZ,
    /// Rotate about X
    RotateX,
    /// Rotate about Y
    RotateY,
    /// Rotate about Z
    RotateZ,
}

impl AxisLock {
    /// Locked direction for the six axis locks.
    #[must_use]
    pub const fn axis(self) -> Option<Vec3> {
        match self {
            Self::X => Some(Vec3::X),
            Self::Y => Some(Vec3::Y),
            Self::Z => Some(Vec3::Z),
            Self::NegX => Some(Vec3::NEG_X),
            Self::NegY => Some(Vec3::NEG_Y),
            Self::NegZ => Some(Vec3::NEG_Z),
            Self::None | Self::RotateX | Self::RotateY | Self::RotateZ => None,
        }
    }

    /// Whether this is one of the rotate locks.
    #[must_use]
    pub const fn is_rotate(self) -> bool {
        matches!(self, Self::RotateX | Self::RotateY | Self::RotateZ)
    }
}

/// How an emitter is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EmitterRenderMode {
    /// Full geometry
    #[default]
    Normal,
    /// Debug points
    Point,
    /// Debug crosses
    Cross,
}

/// Normal generation mode for lit sprites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NormalsMode {
    /// Camera facing
    #[default]
    CameraFacing,
    /// Spherical around a center
    Spherical,
    /// Cylindrical around a direction
    Cylindrical,
}

/// Settings shared by sprite, sub-UV and mesh snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpriteReplay {
    /// Particle data
    pub base: ReplayBase,
    /// Camera alignment
    pub screen_alignment: ScreenAlignment,
    /// Particles are in emitter space
    pub use_local_space: bool,
    /// Negative sizes flip UVs
    pub allow_image_flipping: bool,
    /// Vertical flip follows the horizontal one
    pub square_image_flipping: bool,
    /// Axis locking is enabled
    pub lock_axis: bool,
    /// Locked axis
    pub lock_axis_flag: AxisLock,
    /// Cap on drawn particles
    pub max_draw_count: Option<u32>,
    /// Geometry or debug drawing
    pub render_mode: EmitterRenderMode,
    /// Orbit payload
    pub orbit_offset: Option<PayloadOffset<OrbitPayload>>,
    /// Dynamic parameter payload
    pub dynamic_parameter_offset: Option<PayloadOffset<DynamicParameterPayload>>,
    /// Camera offset payload
    pub camera_payload_offset: Option<PayloadOffset<CameraOffsetPayload>>,
    /// Normal generation
    pub normals_mode: NormalsMode,
    /// Center for spherical normals
    pub normals_sphere_center: Vec3,
    /// Axis for cylindrical normals
    pub normals_cylinder_direction: Vec3,
    /// Distance fading
    pub distance_culling: DistanceCulling,
}

impl Default for SpriteReplay {
    fn default() -> Self {
        Self {
            base: ReplayBase::default(),
            screen_alignment: ScreenAlignment::Square,
            use_local_space: false,
            allow_image_flipping: false,
            square_image_flipping: true,
            lock_axis: false,
            lock_axis_flag: AxisLock::None,
            max_draw_count: None,
            render_mode: EmitterRenderMode::Normal,
            orbit_offset: None,
            dynamic_parameter_offset: None,
            camera_payload_offset: None,
            normals_mode: NormalsMode::CameraFacing,
            normals_sphere_center: Vec3::ZERO,
            normals_cylinder_direction: Vec3::Z,
            distance_culling: DistanceCulling::default(),
        }
    }
}

impl SpriteReplay {
    /// Sprite snapshot of a pool with default settings.
    #[must_use]
    pub fn from_buffer(kind: EmitterKind, buffer: &ParticleBuffer) -> Self {
        Self {
            base: ReplayBase::from_buffer(kind, buffer),
            ..Self::default()
        }
    }

    /// Particles that will be drawn.
    #[must_use]
    pub fn draw_count(&self) -> usize {
        let active = self.base.active_count();
        self.max_draw_count
            .map_or(active, |max| active.min(max as usize))
    }
}

/// Flip-book sprite snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubUvReplay {
    /// Sprite settings
    pub sprite: SpriteReplay,
    /// Sub-UV payload
    pub sub_uv_offset: Option<PayloadOffset<SubUvPayload>>,
    /// Atlas columns
    pub sub_images_horizontal: u32,
    /// Atlas rows
    pub sub_images_vertical: u32,
    /// Payload holds raw UV offsets instead of grid cells
    pub direct_uv: bool,
}

/// Flip-book interpolation used by mesh particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SubUvInterpMethod {
    /// No flip-book
    #[default]
    None,
    /// Linear
    Linear,
    /// Linear with blending
    LinearBlend,
    /// Random
    Random,
    /// Random with blending
    RandomBlend,
}

/// Camera-facing mode of mesh particles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshCameraFacing {
    /// X faces the camera, free roll
    XAxisNoUp,
    /// X faces the camera, Z toward world up
    XAxisZUp,
    /// X faces the camera, -Z toward world up
    XAxisNegZUp,
    /// X faces the camera, Y toward world up
    XAxisYUp,
    /// X faces the camera, -Y toward world up
    XAxisNegYUp,
    /// X on the locked axis, Z toward the camera
    LockedAxisZ,
    /// X on the locked axis, -Z toward the camera
    LockedAxisNegZ,
    /// X on the locked axis, Y toward the camera
    LockedAxisY,
    /// X on the locked axis, -Y toward the camera
    LockedAxisNegY,
    /// X along velocity, Z toward the camera
    VelocityAlignedZ,
    /// X along velocity, -Z toward the camera
    VelocityAlignedNegZ,
    /// X along velocity, Y toward the camera
    VelocityAlignedY,
    /// X along velocity, -Y toward the camera
    VelocityAlignedNegY,
}

impl MeshCameraFacing {
    /// Local axis turned toward the desired direction; `None` for the free
    /// roll mode.
    #[must_use]
    pub const fn op_vector(self) -> Option<Vec3> {
        match self {
            Self::XAxisNoUp => None,
            Self::XAxisZUp | Self::LockedAxisZ | Self::VelocityAlignedZ => Some(Vec3::Z),
            Self::XAxisNegZUp | Self::LockedAxisNegZ | Self::VelocityAlignedNegZ => Some(Vec3::NEG_Z),
            Self::XAxisYUp | Self::LockedAxisY | Self::VelocityAlignedY => Some(Vec3::Y),
            Self::XAxisNegYUp | Self::LockedAxisNegY | Self::VelocityAlignedNegY => Some(Vec3::NEG_Y),
        }
    }

    /// X-axis facing modes.
    #[must_use]
    pub const fn is_x_axis(self) -> bool {
        matches!(
            self,
            Self::XAxisNoUp | Self::XAxisZUp | Self::XAxisNegZUp | Self::XAxisYUp | Self::XAxisNegYUp
        )
    }

    /// Locked-axis facing modes.
    #[must_use]
    pub const fn is_locked_axis(self) -> bool {
        matches!(
            self,
            Self::LockedAxisZ | Self::LockedAxisNegZ | Self::LockedAxisY | Self::LockedAxisNegY
        )
    }

    /// Velocity-aligned facing modes.
    #[must_use]
    pub const fn is_velocity_aligned(self) -> bool {
        matches!(
            self,
            Self::VelocityAlignedZ | Self::VelocityAlignedNegZ | Self::VelocityAlignedY | Self::VelocityAlignedNegY
        )
    }
}

/// Facing used with [`ScreenAlignment::TypeSpecific`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MeshFacing {
    /// Face the camera, particle rotation rolls about the view direction
    #[default]
    FaceCameraWithRoll,
    /// Face the camera, particle rotation spins about the tangent
    FaceCameraWithSpin,
    /// Face the camera about the locked axis
    FaceCameraWithLockedAxis,
}

/// One section of the mesh drawn per particle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshElement {
    /// Triangles in the section
    pub num_triangles: u32,
    /// First index
    pub first_index: u32,
    /// Lowest vertex referenced
    pub min_vertex_index: u32,
    /// Highest vertex referenced
    pub max_vertex_index: u32,
}

/// Mesh drawn for every particle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshDescription {
    /// Sections, one material each
    pub elements: Vec<MeshElement>,
    /// Mesh faces are mirrored
    pub reverse_culling: bool,
}

/// Mesh particle snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshReplay {
    /// Sprite settings
    pub sprite: SpriteReplay,
    /// Flip-book interpolation
    pub sub_uv_interp_method: SubUvInterpMethod,
    /// Sub-UV payload
    pub sub_uv_offset: Option<PayloadOffset<SubUvPayload>>,
    /// Atlas columns
    pub sub_images_horizontal: u32,
    /// Atlas rows
    pub sub_images_vertical: u32,
    /// Scale UVs to one atlas cell
    pub scale_uv: bool,
    /// Mesh rotation payload
    pub mesh_rotation_offset: Option<PayloadOffset<MeshRotationPayload>>,
    /// Facing for type-specific alignment
    pub mesh_alignment: MeshFacing,
    /// Use the mesh rotation payload
    pub mesh_rotation_active: bool,
    /// Locked axis, when axis locking applies
    pub locked_axis: Option<Vec3>,
    /// Particle id payload, for motion blur
    pub mesh_type_offset: Option<PayloadOffset<MeshTypePayload>>,
    /// Camera facing
    pub camera_facing: Option<MeshCameraFacing>,
    /// Particle rotation spins about the facing direction
    pub apply_particle_rotation_as_spin: bool,
    /// Rotation applied before everything else, euler degrees (roll, pitch, yaw)
    pub pre_rotation: Option<Vec3>,
    /// Keep last frame's transforms for velocity rendering
    pub allow_motion_blur: bool,
    /// Mesh
    pub mesh: MeshDescription,
    /// Draw all particles as one instanced batch
    pub instancing: bool,
}

impl Default for MeshReplay {
    fn default() -> Self {
        Self {
            sprite: SpriteReplay::default(),
            sub_uv_interp_method: SubUvInterpMethod::None,
            sub_uv_offset: None,
            sub_images_horizontal: 1,
            sub_images_vertical: 1,
            scale_uv: false,
            mesh_rotation_offset: None,
            mesh_alignment: MeshFacing::FaceCameraWithRoll,
            mesh_rotation_active: false,
            locked_axis: None,
            mesh_type_offset: None,
            camera_facing: None,
            apply_particle_rotation_as_spin: false,
            pre_rotation: None,
            allow_motion_blur: false,
            mesh: MeshDescription::default(),
            instancing: false,
        }
    }
}

impl MeshReplay {
    /// Locked axis in use: the explicit one, or +X when a locked-axis
    /// camera facing mode needs one.
    #[must_use]
    pub fn effective_locked_axis(&self) -> Option<Vec3> {
        match (self.locked_axis, self.camera_facing) {
            (Some(axis), _) => Some(axis),
            (None, Some(facing)) if facing.is_locked_axis() => Some(Vec3::X),
            _ => None,
        }
    }
}

/// How a beam narrows along its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaperMethod {
    /// Constant width
    #[default]
    None,
    /// Taper over the full source-target distance
    Full,
    /// Taper over the current length
    Partial,
}

/// Beam snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamReplay {
    /// Particle data
    pub base: ReplayBase,
    /// Particles are in emitter space
    pub use_local_space: bool,
    /// Vertices the emitter needs
    pub vertex_count: u32,
    /// Indices the emitter needs
    pub index_count: u32,
    /// Triangles per sheet of each beam
    pub triangles_per_sheet: Vec<u32>,
    /// 0 recomputes the up vector per step, 1 once for the first beam
    pub up_vector_step_size: u32,
    /// Beam payload
    pub beam_data_offset: Option<PayloadOffset<BeamPayload>>,
    /// Interpolated spine points
    pub interpolated_points_offset: Option<PayloadOffset<[f32; 3]>>,
    /// Noise speed multiplier
    pub noise_rate_offset: Option<PayloadOffset<f32>>,
    /// Noise time step
    pub noise_delta_time_offset: Option<PayloadOffset<f32>>,
    /// Current noise points
    pub target_noise_points_offset: Option<PayloadOffset<[f32; 3]>>,
    /// Noise points being moved toward
    pub next_noise_points_offset: Option<PayloadOffset<[f32; 3]>>,
    /// Taper factor per step
    pub taper_values_offset: Option<PayloadOffset<f32>>,
    /// Noise scale by beam length
    pub noise_distance_scale_offset: Option<PayloadOffset<f32>>,
    /// Low frequency noise is enabled
    pub low_freq_noise: bool,
    /// Noise points move smoothly toward their targets
    pub smooth_noise: bool,
    /// Beams have a source module
    pub use_source: bool,
    /// Beams have a target module
    pub use_target: bool,
    /// Noise applies to the target point
    pub target_noise: bool,
    /// Radial copies of each beam
    pub sheets: u32,
    /// Noise points along each beam
    pub frequency: u32,
    /// Tessellation between noise points
    pub noise_tessellation: u32,
    /// Noise amplitude scale
    pub noise_range_scale: f32,
    /// Tangent strength at noise points
    pub noise_tangent_strength: f32,
    /// Noise point speed
    pub noise_speed: f32,
    /// Noise lock time, negative disables locking
    pub noise_lock_time: f32,
    /// Distance at which a noise point snaps to its target
    pub noise_lock_radius: f32,
    /// Tension of noise tangents
    pub noise_tension: f32,
    /// Texture tiles along a beam
    pub texture_tile: f32,
    /// World distance per texture tile
    pub texture_tile_distance: f32,
    /// Taper mode
    pub taper_method: TaperMethod,
    /// Interpolation points along the spine
    pub interpolation_points: u32,
}

impl Default for BeamReplay {
    fn default() -> Self {
        Self {
            base: ReplayBase::default(),
            use_local_space: false,
            vertex_count: 0,
            index_count: 0,
            triangles_per_sheet: Vec::new(),
            up_vector_step_size: 0,
            beam_data_offset: None,
            interpolated_points_offset: None,
            noise_rate_offset: None,
            noise_delta_time_offset: None,
            target_noise_points_offset: None,
            next_noise_points_offset: None,
            taper_values_offset: None,
            noise_distance_scale_offset: None,
            low_freq_noise: false,
            smooth_noise: false,
            use_source: false,
            use_target: false,
            target_noise: false,
            sheets: 1,
            frequency: 1,
            noise_tessellation: 1,
            noise_range_scale: 1.0,
            noise_tangent_strength: 0.0,
            noise_speed: 0.0,
            noise_lock_time: -1.0,
            noise_lock_radius: 0.0,
            noise_tension: 0.0,
            texture_tile: 1.0,
            texture_tile_distance: 0.0,
            taper_method: TaperMethod::None,
            interpolation_points: 0,
        }
    }
}

/// Legacy trail snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailReplay {
    /// Particle data
    pub base: ReplayBase,
    /// Vertices the emitter needs
    pub vertex_count: u32,
    /// Indices the emitter needs
    pub index_count: u32,
    /// Trail payload
    pub trail_data_offset: Option<PayloadOffset<Trail2Payload>>,
    /// Taper factor
    pub taper_values_offset: Option<PayloadOffset<f32>>,
    /// Trails in the emitter
    pub trail_count: u32,
    /// Radial copies of each trail
    pub sheets: u32,
    /// Tessellation steps per segment
    pub tess_factor: u32,
    /// Tangent strength
    pub tess_strength: f32,
    /// Segment length at which the full tessellation applies
    pub tess_factor_distance: f32,
    /// Source point of each trail
    pub source_positions: Vec<Vec3>,
    /// Emitter X axis, the tangent at each trail's source
    pub source_direction: Vec3,
}

impl Default for TrailReplay {
    fn default() -> Self {
        Self {
            base: ReplayBase::default(),
            vertex_count: 0,
            index_count: 0,
            trail_data_offset: None,
            taper_values_offset: None,
            trail_count: 0,
            sheets: 1,
            tess_factor: 1,
            tess_strength: 1.0,
            tess_factor_distance: 0.0,
            source_positions: Vec::new(),
            source_direction: Vec3::X,
        }
    }
}

/// Settings shared by ribbon and anim-trail snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailsReplay {
    /// Particle data
    pub base: ReplayBase,
    /// Vertices the emitter needs
    pub vertex_count: u32,
    /// Indices the emitter needs
    pub index_count: u32,
    /// Trail payload; ribbon and anim-trail payloads start with it
    pub trail_data_offset: Option<PayloadOffset<TrailsBasePayload>>,
    /// Most live particles this emitter reaches
    pub max_active_particle_count: u32,
    /// Trails in the emitter
    pub trail_count: u32,
    /// Radial copies of each trail
    pub sheets: u32,
    /// World distance per texture tile of the second UV set
    pub texture_tile_distance: f32,
    /// Dynamic parameter payload
    pub dynamic_parameter_offset: Option<PayloadOffset<DynamicParameterPayload>>,
}

impl TrailsReplay {
    /// Offset of the chain flags word.
    #[must_use]
    pub fn flags_offset(&self) -> Option<PayloadOffset<u32>> {
        self.trail_data_offset.map(PayloadOffset::cast)
    }
}

/// Which vector ribbons are expanded along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderAxis {
    /// Perpendicular to the tangent, facing the camera
    #[default]
    CameraUp,
    /// Source up vector stored per particle
    SourceUp,
    /// Source tangent stored per particle
    SourceTangent,
}

/// Ribbon snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RibbonReplay {
    /// Trail settings
    pub trails: TrailsReplay,
    /// Most interpolated pairs between two particles
    pub max_tessellation_between_particles: u32,
    /// Expansion axis
    pub render_axis: RenderAxis,
}

/// Anim-trail snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnimTrailReplay {
    /// Trail settings
    pub trails: TrailsReplay,
    /// Time between animation samples, scales edge velocities
    pub anim_sample_time_step: f32,
}

/// Snapshot of one emitter of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmitterReplay {
    /// Sprites
    Sprite(SpriteReplay),
    /// Flip-book sprites
    SubUv(SubUvReplay),
    /// Meshes
    Mesh(MeshReplay),
    /// Beams
    Beam(BeamReplay),
    /// Legacy trails
    Trail(TrailReplay),
    /// Ribbons
    Ribbon(RibbonReplay),
    /// Anim trails
    AnimTrail(AnimTrailReplay),
}

impl EmitterReplay {
    /// Shared particle data.
    #[must_use]
    pub fn base(&self) -> &ReplayBase {
        match self {
            Self::Sprite(r) => &r.base,
            Self::SubUv(r) => &r.sprite.base,
            Self::Mesh(r) => &r.sprite.base,
            Self::Beam(r) => &r.base,
            Self::Trail(r) => &r.base,
            Self::Ribbon(r) => &r.trails.base,
            Self::AnimTrail(r) => &r.trails.base,
        }
    }

    /// Particle kind implied by the variant.
    #[must_use]
    pub const fn kind(&self) -> EmitterKind {
        match self {
            Self::Sprite(_) => EmitterKind::Sprite,
            Self::SubUv(_) => EmitterKind::SubUv,
            Self::Mesh(_) => EmitterKind::Mesh,
            Self::Beam(_) => EmitterKind::Beam,
            Self::Trail(_) => EmitterKind::Trail,
            Self::Ribbon(_) => EmitterKind::Ribbon,
            Self::AnimTrail(_) => EmitterKind::AnimTrail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TrailNodeKind;
    use crate::particle::BaseParticle;
    use crate::payload::{PayloadKind, PayloadLayout};

    fn trail_buffer(len: u16) -> (ParticleBuffer, PayloadOffset<Trail2Payload>) {
        let mut layout = PayloadLayout::new();
        let trail = layout.push::<Trail2Payload>(PayloadKind::Trail2);
        let mut buffer = ParticleBuffer::new(16, layout.payload_bytes()).expect("valid capacity");
        for i in 0..len {
            let slot = buffer
                .spawn(BaseParticle::at(Vec3::new(f32::from(i), 0.0, 0.0)))
                .expect("room");
            let kind = match i {
                0 => TrailNodeKind::Start,
                i if i + 1 == len => TrailNodeKind::End,
                _ => TrailNodeKind::Middle,
            };
            let link = ChainLink::new(kind, i.checked_sub(1), (i + 1 < len).then_some(i + 1));
            let payload = Trail2Payload {
                flags: link.pack(),
                triangle_count: 2,
                ..Trail2Payload::default()
            };
            buffer.write_payload(slot, trail.get(), &payload).expect("in bounds");
        }
        (buffer, trail)
    }

    #[test]
    fn test_from_buffer_copies_live_particles() {
        let (buffer, _) = trail_buffer(3);
        let base = ReplayBase::from_buffer(EmitterKind::Trail, &buffer);
        assert_eq!(base.active_count(), 3);
        assert_eq!(base.slot_count(), 16);
        let p = base.particle(2).expect("live").base();
        assert_eq!(p.location(), Vec3::new(2.0, 0.0, 0.0));
        assert!(base.particle(3).is_none());
    }

    #[test]
    fn test_active_count_clamped_to_indices() {
        let (buffer, _) = trail_buffer(2);
        let mut base = ReplayBase::from_buffer(EmitterKind::Trail, &buffer);
        base.active_particle_count = 50;
        assert_eq!(base.active_count(), 2);
    }

    #[test]
    fn test_walk_chain() {
        let (buffer, trail) = trail_buffer(4);
        let base = ReplayBase::from_buffer(EmitterKind::Trail, &buffer);
        let slots: Vec<u16> = base.walk_chain(0, trail.cast()).map(|(slot, _)| slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert!(base.chain_link(0, trail.cast()).is_some_and(|l| l.is_head()));
        assert!(base.chain_link(200, trail.cast()).is_none());
    }

    #[test]
    fn test_draw_count_capped() {
        let (buffer, _) = trail_buffer(4);
        let mut sprite = SpriteReplay::from_buffer(EmitterKind::Sprite, &buffer);
        assert_eq!(sprite.draw_count(), 4);
        sprite.max_draw_count = Some(2);
        assert_eq!(sprite.draw_count(), 2);
        assert!(sprite.square_image_flipping);
    }

    #[test]
    fn test_mesh_locked_axis_defaults() {
        let mut mesh = MeshReplay::default();
        assert_eq!(mesh.effective_locked_axis(), None);
        mesh.camera_facing = Some(MeshCameraFacing::LockedAxisY);
        assert_eq!(mesh.effective_locked_axis(), Some(Vec3::X));
        mesh.locked_axis = AxisLock::NegZ.axis();
        assert_eq!(mesh.effective_locked_axis(), Some(Vec3::NEG_Z));
    }

    #[test]
    fn test_camera_facing_groups() {
        assert!(MeshCameraFacing::XAxisNoUp.op_vector().is_none());
        assert_eq!(MeshCameraFacing::VelocityAlignedNegY.op_vector(), Some(Vec3::NEG_Y));
        assert!(MeshCameraFacing::XAxisYUp.is_x_axis());
        assert!(!MeshCameraFacing::LockedAxisZ.is_velocity_aligned());
    }

    #[test]
    fn test_replay_serializes() {
        let (buffer, trail) = trail_buffer(2);
        let replay = EmitterReplay::Trail(TrailReplay {
            base: ReplayBase::from_buffer(EmitterKind::Trail, &buffer),
            trail_data_offset: Some(trail),
            ..TrailReplay::default()
        });
        let bytes = bincode::serialize(&replay).expect("serialize");
        let back: EmitterReplay = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(back, replay);
        assert_eq!(back.kind(), EmitterKind::Trail);
    }
}

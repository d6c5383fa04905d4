//! GPU vertex formats written by the packers.
//!
//! All formats are `#[repr(C)]` POD structs made of 4-byte fields, so they
//! can be appended to a byte buffer with [`bytemuck::bytes_of`].

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// UV coordinate of each sprite corner, indexed by sizer index.
pub const SPRITE_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];

/// Indices of the two triangles of a sprite quad, relative to its first
/// vertex.
pub const SPRITE_QUAD_INDICES: [u16; 6] = [0, 2, 3, 0, 1, 2];

/// Mirroring applied to a sprite's UV assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UvFlip {
    /// No mirroring
    #[default]
    None,
    /// Mirrored horizontally
    X,
    /// Mirrored vertically
    Y,
    /// Mirrored on both axes
    Xy,
}

impl UvFlip {
    /// Picks the flip from the signs of a particle size.
    ///
    /// With square flipping the vertical flip follows the horizontal one.
    #[must_use]
    pub fn from_size(size: Vec3, square: bool) -> Self {
        let flip_x = size.x < 0.0;
        let flip_y = if square { flip_x } else { size.y < 0.0 };
        match (flip_x, flip_y) {
            (true, true) => Self::Xy,
            (true, false) => Self::X,
            (false, true) => Self::Y,
            (false, false) => Self::None,
        }
    }

    /// UV table permutation for this flip.
    #[must_use]
    pub const fn uv_indices(self) -> [usize; 4] {
        match self {
            Self::None => [0, 1, 2, 3],
            Self::X => [3, 2, 1, 0],
            Self::Y => [1, 0, 3, 2],
            Self::Xy => [2, 3, 0, 1],
        }
    }

    /// UV of `corner` after flipping.
    #[must_use]
    pub const fn uv(self, corner: usize) -> [f32; 2] {
        SPRITE_UVS[self.uv_indices()[corner % 4]]
    }
}

/// Camera-facing sprite vertex; every corner carries the particle center and
/// the vertex shader expands it by `sizer_index`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SpriteVertex {
    /// Particle center
    pub position: [f32; 3],
    /// Particle center last frame
    pub old_position: [f32; 3],
    /// Particle size
    pub size: [f32; 3],
    /// Texture U
    pub tex_u: f32,
    /// Texture V
    pub tex_v: f32,
    /// Rotation in radians
    pub rotation: f32,
    /// Corner 0..3
    pub sizer_index: u32,
    /// Linear color
    pub color: [f32; 4],
}

impl SpriteVertex {
    /// Position of this corner once expanded on the view plane.
    ///
    /// Mirrors the vertex shader: the corner's UV decides its side of the
    /// quad, scaled by size and rotated in the camera plane.
    #[must_use]
    pub fn corner_position(&self, camera_right: Vec3, camera_up: Vec3) -> Vec3 {
        let [u, v] = SPRITE_UVS[self.sizer_index as usize % 4];
        let local = Vec2::new((u - 0.5) * self.size[0], (0.5 - v) * self.size[1]);
        let rotated = Vec2::from_angle(self.rotation).rotate(local);
        Vec3::from_array(self.position) + camera_right * rotated.x + camera_up * rotated.y
    }

    /// Particle color.
    #[must_use]
    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }
}

/// Sprite vertex with a material dynamic parameter.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SpriteVertexDynamicParameter {
    /// Sprite fields
    pub sprite: SpriteVertex,
    /// Dynamic parameter
    pub dynamic_value: [f32; 4],
}

/// Sprite vertex with two flip-book frames.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SubUvVertex {
    /// Sprite fields; `tex_u`/`tex_v` address the first frame
    pub sprite: SpriteVertex,
    /// Second frame U
    pub tex_u2: f32,
    /// Second frame V
    pub tex_v2: f32,
    /// Blend factor between the frames
    pub interp: f32,
    /// Unused
    pub padding: f32,
    /// Horizontal size sign
    pub size_u: f32,
    /// Vertical size sign
    pub size_v: f32,
}

/// Sub-UV vertex with a material dynamic parameter.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SubUvVertexDynamicParameter {
    /// Sub-UV fields
    pub sub_uv: SubUvVertex,
    /// Dynamic parameter
    pub dynamic_value: [f32; 4],
}

/// Beam and trail strip vertex; `position` is the final strip position.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BeamTrailVertex {
    /// Strip position
    pub position: [f32; 3],
    /// Strip position last frame
    pub old_position: [f32; 3],
    /// Size
    pub size: [f32; 3],
    /// Texture U
    pub tex_u: f32,
    /// Texture V
    pub tex_v: f32,
    /// Rotation
    pub rotation: f32,
    /// Unused by strips
    pub sizer_index: u32,
    /// Linear color
    pub color: [f32; 4],
    /// Second texture U
    pub tex_u2: f32,
    /// Second texture V
    pub tex_v2: f32,
}

impl BeamTrailVertex {
    /// Strip position.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

/// Strip vertex with a material dynamic parameter.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BeamTrailVertexDynamicParameter {
    /// Strip fields
    pub vertex: BeamTrailVertex,
    /// Dynamic parameter
    pub dynamic_value: [f32; 4],
}

/// Point sprite vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PointSpriteVertex {
    /// Particle center
    pub position: [f32; 3],
    /// Point size
    pub size: f32,
    /// RGBA8 color
    pub color: u32,
}

/// One instance of an instanced mesh particle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct MeshInstance {
    /// Translation
    pub location: [f32; 3],
    /// Scaled rotation X axis
    pub x_axis: [f32; 3],
    /// Scaled rotation Y axis
    pub y_axis: [f32; 3],
    /// Scaled rotation Z axis
    pub z_axis: [f32; 3],
    /// Linear color
    pub color: [f32; 4],
}

/// Packs a linear color into RGBA8.
#[must_use]
pub fn pack_color_rgba8(color: Vec4) -> u32 {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    u32::from_le_bytes([c.x as u8, c.y as u8, c.z as u8, c.w as u8])
}

/// Appends one vertex to a byte buffer.
pub fn push_vertex<T: Pod>(buffer: &mut Vec<u8>, vertex: &T) {
    buffer.extend_from_slice(bytemuck::bytes_of(vertex));
}

/// Reads vertex `index` back from a byte buffer.
#[must_use]
pub fn read_vertex<T: Pod>(buffer: &[u8], index: usize) -> Option<T> {
    let size = std::mem::size_of::<T>();
    let start = index.checked_mul(size)?;
    buffer
        .get(start..start.checked_add(size)?)
        .map(bytemuck::pod_read_unaligned)
}

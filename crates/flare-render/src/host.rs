//! Interfaces to the host renderer and material system.
//!
//! The render core never owns scene, material, or shader state. It reads
//! views as plain data, resolves materials to opaque proxy handles, and
//! submits [`MeshBatch`]es through a [`DrawInterface`].

use std::fmt;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};

use flare_common::{MaterialProxyId, VertexFactoryId, ViewId};

use crate::replay::{AxisLock, NormalsMode, ScreenAlignment};

/// Blend/shading properties a material reports to the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterialRelevance {
    /// Opaque blend mode
    pub opaque: bool,
    /// Masked blend mode
    pub masked: bool,
    /// Translucent blend mode; requires back-to-front sorting
    pub translucent: bool,
    /// Writes distortion
    pub distortion: bool,
    /// Lit shading model
    pub lit: bool,
}

impl MaterialRelevance {
    /// Relevance of a plain translucent material.
    #[must_use]
    pub const fn translucent() -> Self {
        Self {
            opaque: false,
            masked: false,
            translucent: true,
            distortion: false,
            lit: false,
        }
    }

    /// Relevance of a plain opaque material.
    #[must_use]
    pub const fn opaque() -> Self {
        Self {
            opaque: true,
            masked: false,
            translucent: false,
            distortion: false,
            lit: true,
        }
    }
}

/// Authoring-side material, resolved once to render proxies.
pub trait MaterialInterface: Send + Sync + fmt::Debug {
    /// Render proxy for the normal or selected draw.
    fn render_proxy(&self, selected: bool) -> Option<MaterialProxyId>;

    /// Blend/shading properties.
    fn relevance(&self) -> MaterialRelevance;
}

/// Shared handle to a material.
pub type MaterialRef = Arc<dyn MaterialInterface>;

/// Material with fixed proxies, for tools and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticMaterial {
    /// Proxy for normal draws
    pub proxy: Option<MaterialProxyId>,
    /// Proxy for selected draws
    pub selected_proxy: Option<MaterialProxyId>,
    /// Reported relevance
    pub relevance: MaterialRelevance,
}

impl StaticMaterial {
    /// A translucent material with one proxy for both draws.
    #[must_use]
    pub const fn translucent(proxy: MaterialProxyId) -> Self {
        Self {
            proxy: Some(proxy),
            selected_proxy: Some(proxy),
            relevance: MaterialRelevance::translucent(),
        }
    }

    /// An opaque material with one proxy for both draws.
    #[must_use]
    pub const fn opaque(proxy: MaterialProxyId) -> Self {
        Self {
            proxy: Some(proxy),
            selected_proxy: Some(proxy),
            relevance: MaterialRelevance::opaque(),
        }
    }

    /// Wraps the material in a shared handle.
    #[must_use]
    pub fn into_ref(self) -> MaterialRef {
        Arc::new(self)
    }
}

impl MaterialInterface for StaticMaterial {
    fn render_proxy(&self, selected: bool) -> Option<MaterialProxyId> {
        if selected {
            self.selected_proxy
        } else {
            self.proxy
        }
    }

    fn relevance(&self) -> MaterialRelevance {
        self.relevance
    }
}

/// Show flags that affect particle drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowFlags {
    /// Particles are drawn at all
    pub particles: bool,
    /// Selection highlighting is shown
    pub selection: bool,
    /// Wireframe view mode
    pub wireframe: bool,
}

impl Default for ShowFlags {
    fn default() -> Self {
        Self {
            particles: true,
            selection: false,
            wireframe: false,
        }
    }
}

/// One view the scene is rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneView {
    /// View identifier
    pub id: ViewId,
    /// Camera position in world space
    pub origin: Vec3,
    /// World to view transform
    pub view_matrix: Mat4,
    /// World to clip transform
    pub view_projection: Mat4,
    /// Scale applied to LOD distances
    pub lod_distance_factor: f32,
    /// Show flags of the owning family
    pub show_flags: ShowFlags,
}

impl SceneView {
    /// Builds a perspective view looking from `eye` at `target`.
    #[must_use]
    pub fn look_at(id: ViewId, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let view_matrix = Mat4::look_at_rh(eye, target, up);
        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 16.0 / 9.0, 0.1, 100_000.0);
        Self {
            id,
            origin: eye,
            view_matrix,
            view_projection: projection * view_matrix,
            lod_distance_factor: 1.0,
            show_flags: ShowFlags::default(),
        }
    }

    /// Camera right axis in world space.
    #[must_use]
    pub fn camera_right(&self) -> Vec3 {
        self.view_matrix.row(0).truncate()
    }

    /// Camera up axis in world space.
    #[must_use]
    pub fn camera_up(&self) -> Vec3 {
        self.view_matrix.row(1).truncate()
    }

    /// Camera forward axis in world space.
    #[must_use]
    pub fn camera_forward(&self) -> Vec3 {
        -self.view_matrix.row(2).truncate()
    }
}

/// A set of views rendered together.
#[derive(Debug, Clone, Default)]
pub struct ViewFamily {
    /// Views in the family
    pub views: Vec<SceneView>,
    /// Frame counter
    pub frame_number: u64,
    /// Render time in seconds
    pub current_time: f32,
}

impl ViewFamily {
    /// Family of a single view.
    #[must_use]
    pub fn single(view: SceneView, frame_number: u64) -> Self {
        Self {
            views: vec![view],
            frame_number,
            current_time: 0.0,
        }
    }

    /// Position of `view` in the family.
    #[must_use]
    pub fn view_index(&self, view: ViewId) -> Option<usize> {
        self.views.iter().position(|v| v.id == view)
    }

    /// Bit mask with one bit set per view.
    #[must_use]
    pub fn all_visible(&self) -> u32 {
        match self.views.len() {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }
}

/// Depth layer a batch draws in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthPriorityGroup {
    /// Regular scene depth
    #[default]
    World,
    /// Drawn over the world
    Foreground,
}

/// Primitive topology of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// Independent triangles
    TriangleList,
    /// Triangle strip with degenerate stitching
    TriangleStrip,
}

/// Per-draw material parameters of a mesh particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshElementParams {
    /// Particle color
    pub vertex_color: Vec4,
    /// Sub-UV offset of the first image
    pub texture_offset: Vec4,
    /// Sub-UV offset of the second image
    pub texture_offset1: Vec4,
    /// Sub-UV scale
    pub texture_scale: Vec4,
    /// Dynamic parameter
    pub dynamic_parameter: Vec4,
}

impl Default for MeshElementParams {
    fn default() -> Self {
        Self {
            vertex_color: Vec4::ONE,
            texture_offset: Vec4::ZERO,
            texture_offset1: Vec4::ZERO,
            texture_scale: Vec4::new(1.0, 1.0, 0.0, 0.0),
            dynamic_parameter: Vec4::ONE,
        }
    }
}

/// Sprite vertex-factory settings a batch is drawn with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteBatchParams {
    /// Camera alignment
    pub screen_alignment: ScreenAlignment,
    /// Locked axis
    pub lock_axis_flag: AxisLock,
    /// `(up, right)` replacing the camera axes when an axis is locked
    pub lock_axes: Option<(Vec3, Vec3)>,
    /// Normal generation
    pub normals_mode: NormalsMode,
    /// Spherical normal center in world space
    pub normals_sphere_center: Vec3,
    /// Cylindrical normal axis in world space
    pub normals_cylinder_direction: Vec3,
}

/// A draw submitted to the host renderer.
#[derive(Debug, Clone)]
pub struct MeshBatch<'a> {
    /// Material proxy to draw with
    pub material: MaterialProxyId,
    /// Vertex layout, absent for host-owned mesh data
    pub vertex_factory: Option<VertexFactoryId>,
    /// Topology
    pub primitive_type: PrimitiveType,
    /// Vertex bytes, empty for host-owned mesh data
    pub vertices: &'a [u8],
    /// Bytes per vertex
    pub vertex_stride: usize,
    /// Index data, empty for host-owned mesh data
    pub indices: &'a [u16],
    /// First index to draw
    pub first_index: u32,
    /// Primitives to draw
    pub num_primitives: u32,
    /// Lowest referenced vertex
    pub min_vertex_index: u32,
    /// Highest referenced vertex
    pub max_vertex_index: u32,
    /// Instances to draw
    pub instance_count: u32,
    /// Object transform
    pub local_to_world: Mat4,
    /// Object transform last frame, for velocity rendering
    pub previous_local_to_world: Option<Mat4>,
    /// Mesh particle material parameters
    pub element_params: Option<MeshElementParams>,
    /// Sprite vertex-factory settings
    pub sprite_params: Option<SpriteBatchParams>,
    /// Depth layer
    pub depth_priority_group: DepthPriorityGroup,
    /// Draw with reversed winding
    pub reverse_culling: bool,
    /// Casts shadows
    pub cast_shadow: bool,
}

impl<'a> MeshBatch<'a> {
    /// A batch over core-generated vertex and index data.
    #[must_use]
    pub fn dynamic(
        material: MaterialProxyId,
        primitive_type: PrimitiveType,
        vertices: &'a [u8],
        vertex_stride: usize,
        indices: &'a [u16],
        num_primitives: u32,
    ) -> Self {
        let vertex_count = if vertex_stride == 0 {
            0
        } else {
            vertices.len() / vertex_stride
        };
        Self {
            material,
            vertex_factory: None,
            primitive_type,
            vertices,
            vertex_stride,
            indices,
            first_index: 0,
            num_primitives,
            min_vertex_index: 0,
            max_vertex_index: vertex_count.saturating_sub(1) as u32,
            instance_count: 1,
            local_to_world: Mat4::IDENTITY,
            previous_local_to_world: None,
            element_params: None,
            sprite_params: None,
            depth_priority_group: DepthPriorityGroup::World,
            reverse_culling: false,
            cast_shadow: false,
        }
    }
}

/// Host-side draw submission.
pub trait DrawInterface {
    /// Submits a batch; returns the number of draws issued.
    fn draw_mesh(&mut self, batch: &MeshBatch<'_>) -> usize;

    /// Whether draws with `material` are filtered out of this pass.
    fn is_material_ignored(&self, material: MaterialProxyId) -> bool;

    /// Whether this pass renders velocities.
    fn is_rendering_velocities(&self) -> bool {
        false
    }
}

/// Summary of a submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    /// Material proxy
    pub material: MaterialProxyId,
    /// Vertex layout
    pub vertex_factory: Option<VertexFactoryId>,
    /// Topology
    pub primitive_type: PrimitiveType,
    /// Primitives drawn
    pub num_primitives: u32,
    /// Vertices supplied
    pub vertex_count: usize,
    /// Indices supplied
    pub index_count: usize,
    /// Instances drawn
    pub instance_count: u32,
    /// Object transform
    pub local_to_world: Mat4,
    /// Previous object transform
    pub previous_local_to_world: Option<Mat4>,
    /// Mesh particle parameters
    pub element_params: Option<MeshElementParams>,
    /// Sprite settings
    pub sprite_params: Option<SpriteBatchParams>,
    /// Depth layer
    pub depth_priority_group: DepthPriorityGroup,
}

/// Draw interface that records every batch, for tools and tests.
#[derive(Debug, Default)]
pub struct RecordingDrawInterface {
    /// Recorded draws in submission order
    pub draws: Vec<RecordedDraw>,
    /// Materials to report as ignored
    pub ignored: Vec<MaterialProxyId>,
    /// Report a velocity pass
    pub rendering_velocities: bool,
}

impl RecordingDrawInterface {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total primitives across recorded draws.
    #[must_use]
    pub fn total_primitives(&self) -> u64 {
        self.draws.iter().map(|d| u64::from(d.num_primitives)).sum()
    }
}

impl DrawInterface for RecordingDrawInterface {
    fn draw_mesh(&mut self, batch: &MeshBatch<'_>) -> usize {
        let vertex_count = if batch.vertex_stride == 0 {
            0
        } else {
            batch.vertices.len() / batch.vertex_stride
        };
        self.draws.push(RecordedDraw {
            material: batch.material,
            vertex_factory: batch.vertex_factory,
            primitive_type: batch.primitive_type,
            num_primitives: batch.num_primitives,
            vertex_count,
            index_count: batch.indices.len(),
            instance_count: batch.instance_count,
            local_to_world: batch.local_to_world,
            previous_local_to_world: batch.previous_local_to_world,
            element_params: batch.element_params,
            sprite_params: batch.sprite_params,
            depth_priority_group: batch.depth_priority_group,
        });
        1
    }

    fn is_material_ignored(&self, material: MaterialProxyId) -> bool {
        self.ignored.contains(&material)
    }

    fn is_rendering_velocities(&self) -> bool {
        self.rendering_velocities
    }
}

//! Per-kind vertex packers and draw submission.
//!
//! Every emitter kind follows the same frame: `pre_render_view` sorts and
//! submits one fill task for all visible views, `render` waits for the
//! view's buffer and submits the batch. Packers run on fill workers and only
//! read the immutable snapshot.

pub mod anim_trail;
pub mod beam;
pub mod mesh;
pub mod ribbon;
pub mod sprite;
pub mod subuv;
pub mod trail;
pub mod trails;

use std::sync::Arc;

use glam::Mat4;

use crate::config::RenderConfig;
use crate::dynamic_data::SpriteRenderState;
use crate::fill::BufferFiller;
use crate::host::{DrawInterface, MeshBatch, PrimitiveType, SceneView, ViewFamily};
use crate::render_context::RenderContext;
use crate::replay::ReplayBase;
use crate::scene_proxy::PrimitiveInfo;
use crate::sort::{ParticleOrder, SortContext};

/// Values a packer needs besides the snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackParams {
    /// Emitter transform
    pub local_to_world: Mat4,
    /// Push for camera-offset particles that pass the camera
    pub behind_camera_push_scale: f32,
    /// Default distance-fade collapse threshold
    pub cull_alpha_threshold: f32,
}

impl PackParams {
    /// Params from the active configuration.
    #[must_use]
    pub fn new(config: &RenderConfig, local_to_world: Mat4) -> Self {
        Self {
            local_to_world,
            behind_camera_push_scale: config.behind_camera_push_scale,
            cull_alpha_threshold: config.cull_alpha_threshold,
        }
    }
}

impl Default for PackParams {
    fn default() -> Self {
        Self::new(&RenderConfig::default(), Mat4::IDENTITY)
    }
}

/// Snapshot position drawn `i`-th: the sorted entry when sorted, else `i`.
#[must_use]
pub(crate) fn draw_index(order: &[ParticleOrder], i: usize) -> usize {
    order.get(i).map_or(i, |o| o.particle_index as usize)
}

/// Sorts per view (when the material needs it) and submits the fill task.
///
/// `sort_local_to_world` is the emitter transform for local-space emitters.
pub(crate) fn submit_fill(
    state: &mut SpriteRenderState,
    ctx: &mut RenderContext,
    family: &ViewFamily,
    visibility_mask: u32,
    base: &ReplayBase,
    sort_local_to_world: Option<Mat4>,
    vertex_count: usize,
    vertex_stride: usize,
    filler: Arc<dyn BufferFiller>,
) {
    let sort = state.needs_sort(base.sort_mode);
    let RenderContext {
        config,
        order_pool,
        fill_pool,
        ..
    } = ctx;
    state.fill.build_view_fill_data_and_submit(
        fill_pool.as_ref(),
        family,
        visibility_mask,
        config.single_view_fill,
        vertex_count,
        vertex_stride,
        filler,
        |view, out| {
            if !sort {
                return;
            }
            let context = SortContext {
                mode: base.sort_mode,
                view_origin: view.origin,
                view_projection: view.view_projection,
                local_to_world: sort_local_to_world,
            };
            out.extend_from_slice(order_pool.sort(&context, base.active_count(), |i| base.particle(i)));
        },
    );
}

/// Submits a fill that draws particles in snapshot order.
pub(crate) fn submit_strip_fill(
    state: &mut SpriteRenderState,
    ctx: &mut RenderContext,
    family: &ViewFamily,
    visibility_mask: u32,
    vertex_count: usize,
    vertex_stride: usize,
    filler: Arc<dyn BufferFiller>,
) {
    let RenderContext { config, fill_pool, .. } = ctx;
    state.fill.build_view_fill_data_and_submit(
        fill_pool.as_ref(),
        family,
        visibility_mask,
        config.single_view_fill,
        vertex_count,
        vertex_stride,
        filler,
        |_, _| {},
    );
}

/// Draws the view's strip buffer as one triangle strip.
///
/// With `round_to_even` a trailing half quad is never drawn.
pub(crate) fn render_strip_batch(
    state: &mut SpriteRenderState,
    primitive: &PrimitiveInfo,
    pdi: &mut dyn DrawInterface,
    view: &SceneView,
    use_local_space: bool,
    round_to_even: bool,
) -> usize {
    let Some(proxy) = state.drawable_proxy(pdi, view) else {
        return 0;
    };
    let vertex_factory = state.vertex_factory_id();
    let Some(buffer) = state.fill.ensure_fill_completion(view.id) else {
        return 0;
    };
    let triangles = if round_to_even {
        buffer.out_triangle_count & !1
    } else {
        buffer.out_triangle_count
    };
    if triangles == 0 || buffer.index_count == 0 {
        return 0;
    }

    let mut batch = MeshBatch::dynamic(
        proxy,
        PrimitiveType::TriangleStrip,
        &buffer.vertices,
        buffer.vertex_stride,
        &buffer.indices[..buffer.index_count],
        triangles,
    );
    batch.vertex_factory = vertex_factory;
    if use_local_space {
        batch.local_to_world = primitive.local_to_world;
    }
    batch.reverse_culling = primitive.local_to_world.determinant() < 0.0;
    batch.depth_priority_group = primitive.depth_priority_group;
    batch.cast_shadow = primitive.cast_shadow;
    pdi.draw_mesh(&batch)
}

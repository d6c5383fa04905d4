//! Camera-facing sprite packing.
//!
//! Every sprite becomes four vertices carrying the particle center; the
//! vertex shader expands them by corner. Two triangles per sprite are
//! indexed with [`SPRITE_QUAD_INDICES`].

use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use tracing::warn;

use crate::culling::apply_camera_offset;
use crate::dynamic_data::SpriteRenderState;
use crate::emitters::{draw_index, submit_fill, PackParams};
use crate::fill::{BufferFiller, FillBuffer, MAX_INDEXED_VERTICES};
use crate::host::{
    DrawInterface, MaterialRef, MeshBatch, PrimitiveType, SceneView, SpriteBatchParams, ViewFamily,
};
use crate::payload::{ParticleRef, PayloadWarner};
use crate::render_context::RenderContext;
use crate::replay::{AxisLock, EmitterRenderMode, ReplayBase, ScreenAlignment, SpriteReplay};
use crate::scene_proxy::PrimitiveInfo;
use crate::sort::ParticleOrder;
use crate::vertex::{push_vertex, SpriteVertex, SpriteVertexDynamicParameter, UvFlip, SPRITE_QUAD_INDICES};
use crate::vertex_factory::VertexFactoryKind;

/// Most sprites one draw can index.
pub const MAX_SPRITES_PER_DRAW: usize = MAX_INDEXED_VERTICES / 4;

/// One particle resolved to what its four corners share.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PreparedSprite {
    pub position: Vec3,
    pub old_position: Vec3,
    pub size: Vec3,
    pub rotation: f32,
    pub color: Vec4,
    pub flip: UvFlip,
    pub dynamic: [f32; 4],
}

impl PreparedSprite {
    /// Corner `corner` as a plain sprite vertex.
    pub fn vertex(&self, corner: usize) -> SpriteVertex {
        let [tex_u, tex_v] = self.flip.uv(corner);
        SpriteVertex {
            position: self.position.to_array(),
            old_position: self.old_position.to_array(),
            size: self.size.to_array(),
            tex_u,
            tex_v,
            rotation: self.rotation,
            sizer_index: corner as u32,
            color: self.color.to_array(),
        }
    }
}

/// Resolves flip, size, orbit, camera offset and distance fade of one
/// particle.
pub(crate) fn prepare_sprite(
    source: &SpriteReplay,
    params: &PackParams,
    view: &SceneView,
    particle: &ParticleRef<'_>,
    warner: &mut PayloadWarner,
) -> PreparedSprite {
    let base = particle.base();
    let raw_size = base.size();

    let flip = if source.allow_image_flipping {
        UvFlip::from_size(raw_size, source.square_image_flipping)
    } else {
        UvFlip::None
    };

    let mut size = raw_size * source.base.scale;
    if source.allow_image_flipping {
        size = size.abs();
    }
    if source.screen_alignment == ScreenAlignment::Square {
        size.y = size.x;
    }

    let mut position = base.location();
    let mut old_position = base.old_location();
    if let Some(orbit) = warner.read(particle, source.orbit_offset) {
        if source.use_local_space {
            position += orbit.offset();
            old_position += orbit.previous_offset();
        } else {
            // Only the current offset is taken to world space.
            position += params.local_to_world.transform_vector3(orbit.offset());
            old_position += orbit.previous_offset();
        }
    }

    let local_to_world = source.use_local_space.then_some(&params.local_to_world);
    if let Some(camera) = warner.read(particle, source.camera_payload_offset) {
        if source.screen_alignment == ScreenAlignment::Velocity {
            old_position = apply_camera_offset(
                position,
                old_position,
                camera.offset,
                view.origin,
                local_to_world,
                params.behind_camera_push_scale,
            );
        }
        position = apply_camera_offset(
            position,
            position,
            camera.offset,
            view.origin,
            local_to_world,
            params.behind_camera_push_scale,
        );
    }

    let dynamic = warner
        .read(particle, source.dynamic_parameter_offset)
        .map_or([1.0; 4], |d| d.value);

    let world_position = local_to_world.map_or(position, |m| m.transform_point3(position));
    let culled = source.distance_culling.apply(
        world_position,
        view.origin,
        base.color(),
        size,
        params.cull_alpha_threshold,
    );

    PreparedSprite {
        position,
        old_position,
        size: culled.size,
        rotation: base.rotation,
        color: culled.color,
        flip,
        dynamic,
    }
}

/// Sprites to pack, clamped to what 16-bit indices can address.
pub(crate) fn clamped_draw_count(emitter: &str, requested: usize) -> usize {
    if requested > MAX_SPRITES_PER_DRAW {
        warn!(
            "{} emitter requested {} sprites, clamping to {}",
            emitter, requested, MAX_SPRITES_PER_DRAW
        );
        MAX_SPRITES_PER_DRAW
    } else {
        requested
    }
}

/// Appends the two quad triangles of sprite `sprite`.
pub(crate) fn push_quad_indices(indices: &mut Vec<u16>, sprite: usize) {
    let first = (sprite * 4) as u16;
    indices.extend(SPRITE_QUAD_INDICES.iter().map(|i| first + i));
}

/// Packs sprite vertices and indices in draw order; returns the number of
/// sprites packed.
pub fn pack_sprites(
    source: &SpriteReplay,
    params: &PackParams,
    view: &SceneView,
    order: &[ParticleOrder],
    with_dynamic: bool,
    vertices: &mut Vec<u8>,
    indices: &mut Vec<u16>,
) -> usize {
    if source.render_mode != EmitterRenderMode::Normal {
        return 0;
    }
    let count = clamped_draw_count("Sprite", source.draw_count());
    let mut warner = PayloadWarner::new("Sprite");
    let mut packed = 0;
    for i in 0..count {
        let Some(particle) = source.base.particle(draw_index(order, i)) else {
            continue;
        };
        let sprite = prepare_sprite(source, params, view, &particle, &mut warner);
        for corner in 0..4 {
            let vertex = sprite.vertex(corner);
            if with_dynamic {
                push_vertex(
                    vertices,
                    &SpriteVertexDynamicParameter {
                        sprite: vertex,
                        dynamic_value: sprite.dynamic,
                    },
                );
            } else {
                push_vertex(vertices, &vertex);
            }
        }
        push_quad_indices(indices, packed);
        packed += 1;
    }
    packed
}

/// Camera `(up, right)` replacement for an axis-locked emitter.
#[must_use]
pub fn axis_lock_values(source: &SpriteReplay, local_to_world: &Mat4) -> (Vec3, Vec3) {
    let axes = if source.use_local_space {
        *local_to_world
    } else {
        Mat4::IDENTITY
    };
    let axis = |i: usize| axes.col(i).truncate();
    let (up, right) = match source.lock_axis_flag {
        AxisLock::None => (Vec3::ZERO, Vec3::ZERO),
        AxisLock::X => (axis(2), axis(1)),
        AxisLock::Y => (axis(2), -axis(0)),
        AxisLock::Z => (axis(0), -axis(1)),
        AxisLock::NegX => (axis(2), -axis(1)),
        AxisLock::NegY => (axis(2), axis(0)),
        AxisLock::NegZ => (axis(0), axis(1)),
        AxisLock::RotateX => {
            let up = if source.use_local_space { axis(0).normalize_or_zero() } else { Vec3::X };
            (up, Vec3::ZERO)
        },
        AxisLock::RotateY => {
            let up = if source.use_local_space { axis(1).normalize_or_zero() } else { Vec3::Y };
            (up, Vec3::ZERO)
        },
        AxisLock::RotateZ => {
            let right = if source.use_local_space { -axis(2).normalize_or_zero() } else { Vec3::NEG_Z };
            (Vec3::ZERO, right)
        },
    };
    if source.use_local_space && source.lock_axis_flag.axis().is_some() {
        (up.normalize_or_zero(), right.normalize_or_zero())
    } else {
        (up, right)
    }
}

/// Vertex-factory settings of a sprite batch.
#[must_use]
pub fn sprite_batch_params(source: &SpriteReplay, local_to_world: &Mat4) -> SpriteBatchParams {
    let lock_axes = (source.lock_axis_flag != AxisLock::None).then(|| axis_lock_values(source, local_to_world));
    SpriteBatchParams {
        screen_alignment: source.screen_alignment,
        lock_axis_flag: source.lock_axis_flag,
        lock_axes,
        normals_mode: source.normals_mode,
        normals_sphere_center: local_to_world.transform_point3(source.normals_sphere_center),
        normals_cylinder_direction: local_to_world.transform_vector3(source.normals_cylinder_direction),
    }
}

/// Submits the batch a sprite-style fill built for `view`.
pub(crate) fn render_sprite_batch(
    state: &mut SpriteRenderState,
    source: &SpriteReplay,
    primitive: &PrimitiveInfo,
    pdi: &mut dyn DrawInterface,
    view: &SceneView,
) -> usize {
    if source.render_mode != EmitterRenderMode::Normal {
        return 0;
    }
    let Some(proxy) = state.drawable_proxy(pdi, view) else {
        return 0;
    };
    let vertex_factory = state.vertex_factory_id();
    let Some(buffer) = state.fill.ensure_fill_completion(view.id) else {
        return 0;
    };
    if buffer.out_triangle_count == 0 {
        return 0;
    }

    let mut batch = MeshBatch::dynamic(
        proxy,
        PrimitiveType::TriangleList,
        &buffer.vertices,
        buffer.vertex_stride,
        &buffer.indices[..buffer.index_count],
        buffer.out_triangle_count,
    );
    batch.vertex_factory = vertex_factory;
    batch.sprite_params = Some(sprite_batch_params(source, &primitive.local_to_world));
    if source.use_local_space {
        batch.local_to_world = primitive.local_to_world;
    }
    batch.depth_priority_group = primitive.depth_priority_group;
    batch.cast_shadow = primitive.cast_shadow;
    pdi.draw_mesh(&batch)
}

/// Starts the sprite-style fill for the visible views.
pub(crate) fn submit_sprite_fill(
    state: &mut SpriteRenderState,
    ctx: &mut RenderContext,
    source: &ReplayBase,
    use_local_space: bool,
    primitive: &PrimitiveInfo,
    family: &ViewFamily,
    visibility_mask: u32,
    sprite_count: usize,
    vertex_stride: usize,
    filler: Arc<dyn BufferFiller>,
) {
    let sort_local_to_world = use_local_space.then_some(primitive.local_to_world);
    submit_fill(
        state,
        ctx,
        family,
        visibility_mask,
        source,
        sort_local_to_world,
        sprite_count * 4,
        vertex_stride,
        filler,
    );
}

struct SpriteFiller {
    source: Arc<SpriteReplay>,
    params: PackParams,
    with_dynamic: bool,
}

impl BufferFiller for SpriteFiller {
    fn fill(&self, buffer: &mut FillBuffer) {
        let packed = pack_sprites(
            &self.source,
            &self.params,
            &buffer.view,
            &buffer.order,
            self.with_dynamic,
            &mut buffer.vertices,
            &mut buffer.indices,
        );
        buffer.out_triangle_count = (packed * 2) as u32;
    }
}

/// Dynamic data of a sprite emitter.
#[derive(Debug)]
pub struct SpriteDynamicData {
    /// Shared render state
    pub state: SpriteRenderState,
    source: Arc<SpriteReplay>,
}

impl SpriteDynamicData {
    /// Wraps a snapshot.
    #[must_use]
    pub fn new(source: Arc<SpriteReplay>, material: Option<MaterialRef>) -> Self {
        let uses_dynamic_parameter = source.dynamic_parameter_offset.is_some();
        Self {
            state: SpriteRenderState::new(material, uses_dynamic_parameter),
            source,
        }
    }

    /// Snapshot.
    #[must_use]
    pub fn source(&self) -> &SpriteReplay {
        &self.source
    }

    /// Shared particle data.
    #[must_use]
    pub fn source_base(&self) -> &ReplayBase {
        &self.source.base
    }

    /// Resolves materials.
    pub fn init(&mut self, selected: bool) {
        self.state.init(selected);
    }

    /// Vertex layout.
    #[must_use]
    pub fn vertex_factory_kind(&self) -> Option<VertexFactoryKind> {
        Some(if self.state.uses_dynamic_parameter {
            VertexFactoryKind::SpriteDynamicParameter
        } else {
            VertexFactoryKind::Sprite
        })
    }

    /// Sorts and submits the fill for the visible views.
    pub fn pre_render_view(
        &mut self,
        ctx: &mut RenderContext,
        primitive: &PrimitiveInfo,
        family: &ViewFamily,
        visibility_mask: u32,
    ) {
        let count = self.source.draw_count();
        if count == 0 || self.source.render_mode != EmitterRenderMode::Normal {
            return;
        }
        let with_dynamic = self.state.uses_dynamic_parameter;
        let stride = self.vertex_factory_kind().map_or(0, VertexFactoryKind::stride);
        let filler = Arc::new(SpriteFiller {
            source: Arc::clone(&self.source),
            params: PackParams::new(&ctx.config, primitive.local_to_world),
            with_dynamic,
        });
        submit_sprite_fill(
            &mut self.state,
            ctx,
            &self.source.base,
            self.source.use_local_space,
            primitive,
            family,
            visibility_mask,
            clamped_draw_count("Sprite", count),
            stride,
            filler,
        );
    }

    /// Draws into `view`.
    pub fn render(&mut self, primitive: &PrimitiveInfo, pdi: &mut dyn DrawInterface, view: &SceneView) -> usize {
        render_sprite_batch(&mut self.state, &self.source, primitive, pdi, view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::culling::{DistanceCulling, FarCull};
    use crate::emitters::test_support::{buffer_with, family_from, material, view_from};
    use crate::host::RecordingDrawInterface;
    use crate::particle::BaseParticle;
    use crate::payload::{CameraOffsetPayload, OrbitPayload, PayloadKind, PayloadLayout};
    use crate::replay::EmitterKind;
    use crate::vertex::read_vertex;
    use proptest::prelude::*;

    fn sprite_source(particles: &[BaseParticle]) -> SpriteReplay {
        let buffer = buffer_with(&PayloadLayout::new(), particles);
        SpriteReplay::from_buffer(EmitterKind::Sprite, &buffer)
    }

    fn pack(source: &SpriteReplay, view: &SceneView) -> (Vec<u8>, Vec<u16>, usize) {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let packed = pack_sprites(
            source,
            &PackParams::default(),
            view,
            &[],
            false,
            &mut vertices,
            &mut indices,
        );
        (vertices, indices, packed)
    }

    #[test]
    fn test_single_sprite() {
        let source = sprite_source(&[BaseParticle::at(Vec3::ZERO).with_size(Vec3::splat(10.0))]);
        let view = view_from(Vec3::new(0.0, 0.0, 100.0));
        let (vertices, indices, packed) = pack(&source, &view);

        assert_eq!(packed, 1);
        assert_eq!(indices, vec![0, 2, 3, 0, 1, 2]);
        let mut center = Vec3::ZERO;
        for corner in 0..4 {
            let v: SpriteVertex = read_vertex(&vertices, corner).expect("four vertices");
            assert_eq!(v.color(), Vec4::ONE);
            assert_eq!(v.size, [10.0; 3]);
            assert_eq!(v.sizer_index, corner as u32);
            center += v.corner_position(view.camera_right(), view.camera_up());
        }
        assert!((center / 4.0).length() < 1e-4);
        assert!(read_vertex::<SpriteVertex>(&vertices, 4).is_none());
    }

    #[test]
    fn test_square_alignment_and_negative_size() {
        let mut source = sprite_source(&[BaseParticle::at(Vec3::ZERO).with_size(Vec3::new(-4.0, 9.0, 1.0))]);
        source.allow_image_flipping = true;
        source.base.scale = Vec3::splat(2.0);
        let (vertices, _, _) = pack(&source, &view_from(Vec3::Z * 50.0));
        let v: SpriteVertex = read_vertex(&vertices, 0).expect("vertex");
        assert_eq!(v.size[0], 8.0);
        assert_eq!(v.size[1], 8.0);
        // square flipping mirrors both axes
        assert_eq!([v.tex_u, v.tex_v], UvFlip::Xy.uv(0));
    }

    #[test]
    fn test_negative_size_kept_without_flipping() {
        let mut source = sprite_source(&[BaseParticle::at(Vec3::ZERO).with_size(Vec3::new(-4.0, 9.0, 1.0))]);
        source.base.scale = Vec3::splat(2.0);
        let (vertices, _, _) = pack(&source, &view_from(Vec3::Z * 50.0));
        let v: SpriteVertex = read_vertex(&vertices, 0).expect("vertex");
        assert_eq!(v.size[0], -8.0);
        assert_eq!(v.size[1], -8.0);
        assert_eq!([v.tex_u, v.tex_v], UvFlip::None.uv(0));
    }

    #[test]
    fn test_world_space_orbit_moves_current_offset_only() {
        let mut layout = PayloadLayout::new();
        let orbit = layout.push::<OrbitPayload>(PayloadKind::Orbit);
        let mut buffer = buffer_with(&layout, &[BaseParticle::at(Vec3::ZERO)]);
        buffer
            .write_payload(
                0,
                orbit.get(),
                &OrbitPayload {
                    offset: [5.0, 0.0, 0.0],
                    previous_offset: [4.0, 0.0, 0.0],
                },
            )
            .expect("in bounds");
        let mut source = SpriteReplay::from_buffer(EmitterKind::Sprite, &buffer);
        source.orbit_offset = Some(orbit);
        let params = PackParams {
            local_to_world: Mat4::from_scale(Vec3::splat(2.0)),
            ..PackParams::default()
        };

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let view = view_from(Vec3::new(0.0, 0.0, 100.0));
        pack_sprites(&source, &params, &view, &[], false, &mut vertices, &mut indices);
        let v: SpriteVertex = read_vertex(&vertices, 0).expect("vertex");
        assert_eq!(v.position, [10.0, 0.0, 0.0]);
        assert_eq!(v.old_position, [4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_max_draw_count() {
        let mut source = sprite_source(&[BaseParticle::at(Vec3::ZERO); 5]);
        source.max_draw_count = Some(3);
        let (_, indices, packed) = pack(&source, &view_from(Vec3::Z * 50.0));
        assert_eq!(packed, 3);
        assert_eq!(indices.len(), 18);
    }

    #[test]
    fn test_orbit_and_camera_offset() {
        let mut layout = PayloadLayout::new();
        let orbit = layout.push::<OrbitPayload>(PayloadKind::Orbit);
        let camera = layout.push::<CameraOffsetPayload>(PayloadKind::CameraOffset);
        let mut buffer = buffer_with(&layout, &[BaseParticle::at(Vec3::ZERO)]);
        buffer
            .write_payload(
                0,
                orbit.get(),
                &OrbitPayload {
                    offset: [5.0, 0.0, 0.0],
                    previous_offset: [4.0, 0.0, 0.0],
                },
            )
            .expect("in bounds");
        buffer
            .write_payload(0, camera.get(), &CameraOffsetPayload { base_offset: 2.0, offset: 2.0 })
            .expect("in bounds");

        let mut source = SpriteReplay::from_buffer(EmitterKind::Sprite, &buffer);
        source.orbit_offset = Some(orbit);
        source.camera_payload_offset = Some(camera);
        let (vertices, _, _) = pack(&source, &view_from(Vec3::new(0.0, 0.0, 100.0)));
        let v: SpriteVertex = read_vertex(&vertices, 0).expect("vertex");
        assert_eq!(v.old_position, [4.0, 0.0, 0.0]);
        assert!(v.position[2] > 1.9 && v.position[2] < 2.0);
        assert!((v.position[0] - 5.0).abs() < 0.2);
    }

    #[test]
    fn test_far_culled_sprite_collapses() {
        let mut source = sprite_source(&[BaseParticle::at(Vec3::ZERO).with_size(Vec3::ONE)]);
        source.distance_culling = DistanceCulling {
            near: None,
            far: Some(FarCull {
                fade_distance: 10.0,
                cull_distance: 20.0,
            }),
            alpha_threshold: None,
        };
        let (vertices, _, _) = pack(&source, &view_from(Vec3::new(0.0, 0.0, 30.0)));
        let v: SpriteVertex = read_vertex(&vertices, 0).expect("vertex");
        assert_eq!(v.color[3], 0.0);
        assert_eq!(v.size, [0.0; 3]);
    }

    #[test]
    fn test_debug_modes_pack_nothing() {
        let mut source = sprite_source(&[BaseParticle::at(Vec3::ZERO)]);
        source.render_mode = EmitterRenderMode::Cross;
        let (vertices, indices, packed) = pack(&source, &view_from(Vec3::Z));
        assert_eq!(packed, 0);
        assert!(vertices.is_empty() && indices.is_empty());
    }

    #[test]
    fn test_axis_lock_values() {
        let mut source = SpriteReplay {
            lock_axis_flag: AxisLock::Y,
            ..SpriteReplay::default()
        };
        assert_eq!(axis_lock_values(&source, &Mat4::IDENTITY), (Vec3::Z, Vec3::NEG_X));
        source.lock_axis_flag = AxisLock::RotateZ;
        assert_eq!(axis_lock_values(&source, &Mat4::IDENTITY), (Vec3::ZERO, Vec3::NEG_Z));

        source.use_local_space = true;
        source.lock_axis_flag = AxisLock::X;
        let scaled = Mat4::from_scale(Vec3::splat(3.0));
        let (up, right) = axis_lock_values(&source, &scaled);
        assert!((up - Vec3::Z).length() < 1e-6);
        assert!((right - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_render_submits_triangle_list() {
        let mut ctx = RenderContext::inline();
        let primitive = PrimitiveInfo::default();
        let source = sprite_source(&[BaseParticle::at(Vec3::ZERO), BaseParticle::at(Vec3::X)]);
        let mut data = SpriteDynamicData::new(Arc::new(source), Some(material(9)));
        data.init(false);
        let family = family_from(Vec3::new(0.0, 0.0, 100.0));
        data.pre_render_view(&mut ctx, &primitive, &family, family.all_visible());

        let mut pdi = RecordingDrawInterface::new();
        let draws = data.render(&primitive, &mut pdi, &family.views[0]);
        assert_eq!(draws, 1);
        assert_eq!(pdi.draws[0].num_primitives, 4);
        assert_eq!(pdi.draws[0].vertex_count, 8);
        assert_eq!(pdi.draws[0].index_count, 12);
        assert_eq!(pdi.draws[0].primitive_type, PrimitiveType::TriangleList);
    }

    #[test]
    fn test_render_skips_ignored_material() {
        let mut ctx = RenderContext::inline();
        let primitive = PrimitiveInfo::default();
        let mut data = SpriteDynamicData::new(
            Arc::new(sprite_source(&[BaseParticle::at(Vec3::ZERO)])),
            Some(material(9)),
        );
        data.init(false);
        let family = family_from(Vec3::Z * 10.0);
        data.pre_render_view(&mut ctx, &primitive, &family, 1);
        let mut pdi = RecordingDrawInterface::new();
        pdi.ignored.push(flare_common::MaterialProxyId::new(9));
        assert_eq!(data.render(&primitive, &mut pdi, &family.views[0]), 0);
    }

    #[test]
    fn test_render_without_material_draws_nothing() {
        let mut ctx = RenderContext::inline();
        let primitive = PrimitiveInfo::default();
        let mut data = SpriteDynamicData::new(Arc::new(sprite_source(&[BaseParticle::at(Vec3::ZERO)])), None);
        data.init(false);
        let family = family_from(Vec3::Z * 10.0);
        data.pre_render_view(&mut ctx, &primitive, &family, 1);
        let mut pdi = RecordingDrawInterface::new();
        assert_eq!(data.render(&primitive, &mut pdi, &family.views[0]), 0);
        assert!(pdi.draws.is_empty());
    }

    proptest! {
        #[test]
        fn prop_quad_packing(count in 0usize..200) {
            let particles: Vec<BaseParticle> = (0..count)
                .map(|i| BaseParticle::at(Vec3::new(i as f32, 0.0, 0.0)))
                .collect();
            let source = sprite_source(&particles);
            let (vertices, indices, packed) = pack(&source, &view_from(Vec3::Z * 500.0));
            prop_assert_eq!(packed, count);
            prop_assert_eq!(vertices.len(), count * 4 * std::mem::size_of::<SpriteVertex>());
            prop_assert_eq!(indices.len(), count * 6);
            prop_assert!(indices.iter().all(|&i| usize::from(i) < count * 4));
        }
    }
}

//! Flip-book sprite packing.

use std::sync::Arc;

use crate::dynamic_data::SpriteRenderState;
use crate::emitters::sprite::{clamped_draw_count, prepare_sprite, push_quad_indices, render_sprite_batch, submit_sprite_fill};
use crate::emitters::{draw_index, PackParams};
use crate::fill::{BufferFiller, FillBuffer};
use crate::host::{DrawInterface, MaterialRef, SceneView, ViewFamily};
use crate::payload::{PayloadWarner, SubUvPayload};
use crate::render_context::RenderContext;
use crate::replay::{EmitterRenderMode, ReplayBase, SubUvReplay};
use crate::scene_proxy::PrimitiveInfo;
use crate::sort::ParticleOrder;
use crate::vertex::{push_vertex, SpriteVertex, SubUvVertex, SubUvVertexDynamicParameter};
use crate::vertex_factory::VertexFactoryKind;

/// Corner offsets inside one atlas cell, indexed by UV table entry.
const CELL_OFFSETS: [[f32; 2]; 4] = [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];

/// Atlas UVs of both flip-book frames for each UV table entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubUvCorners {
    /// First frame `(u, v)` per entry
    pub uv: [[f32; 2]; 4],
    /// Second frame `(u, v)` per entry
    pub uv2: [[f32; 2]; 4],
    /// Blend factor between the frames
    pub interp: f32,
}

/// Computes frame UVs from a sub-UV payload.
///
/// Grid mode addresses whole cells by truncated index; direct mode treats the
/// payload as a raw offset and size in cell units.
#[must_use]
pub fn sub_uv_corners(payload: &SubUvPayload, horizontal: u32, vertical: u32, direct_uv: bool) -> SubUvCorners {
    let base_u = 1.0 / horizontal.max(1) as f32;
    let base_v = 1.0 / vertical.max(1) as f32;
    let image = payload.image_hv();
    let image2 = payload.image2_hv();

    let mut uv = [[0.0; 2]; 4];
    let mut uv2 = [[0.0; 2]; 4];
    for (entry, [u_off, v_off]) in CELL_OFFSETS.into_iter().enumerate() {
        if direct_uv {
            let u = base_u * (image.x + u_off * image2.x);
            let v = base_v * (image.y + v_off * image2.y);
            uv[entry] = [u, v];
            uv2[entry] = [u, v];
        } else {
            uv[entry] = [base_u * (image.x.trunc() + u_off), base_v * (image.y.trunc() + v_off)];
            uv2[entry] = [base_u * (image2.x.trunc() + u_off), base_v * (image2.y.trunc() + v_off)];
        }
    }
    SubUvCorners {
        uv,
        uv2,
        interp: image.z,
    }
}

/// Packs flip-book sprites; returns the number of sprites packed.
pub fn pack_sub_uv_sprites(
    source: &SubUvReplay,
    params: &PackParams,
    view: &SceneView,
    order: &[ParticleOrder],
    with_dynamic: bool,
    vertices: &mut Vec<u8>,
    indices: &mut Vec<u16>,
) -> usize {
    let sprite_source = &source.sprite;
    if sprite_source.render_mode != EmitterRenderMode::Normal {
        return 0;
    }
    let count = clamped_draw_count("SubUV", sprite_source.draw_count());
    let mut warner = PayloadWarner::new("SubUV");
    let mut packed = 0;
    for i in 0..count {
        let Some(particle) = sprite_source.base.particle(draw_index(order, i)) else {
            continue;
        };
        let sprite = prepare_sprite(sprite_source, params, view, &particle, &mut warner);
        let payload = warner.read(&particle, source.sub_uv_offset).unwrap_or_default();
        let corners = sub_uv_corners(
            &payload,
            source.sub_images_horizontal,
            source.sub_images_vertical,
            source.direct_uv,
        );
        let uv_indices = sprite.flip.uv_indices();
        for corner in 0..4 {
            let entry = uv_indices[corner];
            let [tex_u, tex_v] = corners.uv[entry];
            let [tex_u2, tex_v2] = corners.uv2[entry];
            let [size_u, size_v] = CELL_OFFSETS[corner];
            let vertex = SubUvVertex {
                sprite: SpriteVertex {
                    tex_u,
                    tex_v,
                    ..sprite.vertex(corner)
                },
                tex_u2,
                tex_v2,
                interp: corners.interp,
                padding: 0.0,
                size_u,
                size_v,
            };
            if with_dynamic {
                push_vertex(
                    vertices,
                    &SubUvVertexDynamicParameter {
                        sub_uv: vertex,
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

struct SubUvFiller {
    source: Arc<SubUvReplay>,
    params: PackParams,
    with_dynamic: bool,
}

impl BufferFiller for SubUvFiller {
    fn fill(&self, buffer: &mut FillBuffer) {
        let packed = pack_sub_uv_sprites(
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

/// Dynamic data of a flip-book sprite emitter.
#[derive(Debug)]
pub struct SubUvDynamicData {
    /// Shared render state
    pub state: SpriteRenderState,
    source: Arc<SubUvReplay>,
}

impl SubUvDynamicData {
    /// Wraps a snapshot.
    #[must_use]
    pub fn new(source: Arc<SubUvReplay>, material: Option<MaterialRef>) -> Self {
        let uses_dynamic_parameter = source.sprite.dynamic_parameter_offset.is_some();
        Self {
            state: SpriteRenderState::new(material, uses_dynamic_parameter),
            source,
        }
    }

    /// Shared particle data.
    #[must_use]
    pub fn source_base(&self) -> &ReplayBase {
        &self.source.sprite.base
    }

    /// Resolves materials.
    pub fn init(&mut self, selected: bool) {
        self.state.init(selected);
    }

    /// Vertex layout.
    #[must_use]
    pub fn vertex_factory_kind(&self) -> Option<VertexFactoryKind> {
        Some(if self.state.uses_dynamic_parameter {
            VertexFactoryKind::SubUvDynamicParameter
        } else {
            VertexFactoryKind::SubUv
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
        let sprite = &self.source.sprite;
        let count = sprite.draw_count();
        if count == 0 || sprite.render_mode != EmitterRenderMode::Normal {
            return;
        }
        let stride = self.vertex_factory_kind().map_or(0, VertexFactoryKind::stride);
        let filler = Arc::new(SubUvFiller {
            source: Arc::clone(&self.source),
            params: PackParams::new(&ctx.config, primitive.local_to_world),
            with_dynamic: self.state.uses_dynamic_parameter,
        });
        submit_sprite_fill(
            &mut self.state,
            ctx,
            &sprite.base,
            sprite.use_local_space,
            primitive,
            family,
            visibility_mask,
            clamped_draw_count("SubUV", count),
            stride,
            filler,
        );
    }

    /// Draws into `view`.
    pub fn render(&mut self, primitive: &PrimitiveInfo, pdi: &mut dyn DrawInterface, view: &SceneView) -> usize {
        render_sprite_batch(&mut self.state, &self.source.sprite, primitive, pdi, view)
    }
}

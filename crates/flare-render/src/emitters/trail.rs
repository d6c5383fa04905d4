//! Legacy trail strips.
//!
//! Each trail starts at its source point and runs through its chain of
//! particles, head first. Segments between particles are Hermite curves.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use tracing::warn;

use crate::chain::{ChainLink, TrailNodeKind};
use crate::dynamic_data::SpriteRenderState;
use crate::emitters::{render_strip_batch, submit_strip_fill, PackParams};
use crate::fill::{BufferFiller, FillBuffer};
use crate::host::{DrawInterface, MaterialRef, SceneView, ViewFamily};
use crate::payload::{ParticleRef, Trail2Payload};
use crate::render_context::RenderContext;
use crate::replay::{ReplayBase, TrailReplay};
use crate::scene_proxy::PrimitiveInfo;
use crate::tessellation::{
    cubic_interp, fill_strip_indices, segment_tessellation, sheet_up, sheet_vertex_count, strip_up, StripPlan,
    StripWriter, KINDA_SMALL_NUMBER,
};
use crate::vertex::BeamTrailVertex;
use crate::vertex_factory::VertexFactoryKind;

#[derive(Debug, Clone, Copy)]
struct TrailPoint {
    position: Vec3,
    size: f32,
    color: Vec4,
    rotation: f32,
}

struct TrailHead<'a> {
    slot: u16,
    particle: ParticleRef<'a>,
    data: Trail2Payload,
}

fn trail_heads(source: &TrailReplay) -> Vec<TrailHead<'_>> {
    let Some(offset) = source.trail_data_offset else {
        warn!("Trail emitter has no trail payload");
        return Vec::new();
    };
    let mut heads = Vec::new();
    for i in 0..source.base.active_count() {
        let (Some(slot), Some(particle)) = (source.base.slot(i), source.base.particle(i)) else {
            continue;
        };
        let Some(data) = particle.payload(offset) else {
            continue;
        };
        let link = ChainLink::unpack(data.flags);
        if link.kind != TrailNodeKind::Start || data.triangle_count <= 0 {
            continue;
        }
        heads.push(TrailHead { slot, particle, data });
    }
    heads
}

fn taper(source: &TrailReplay, particle: &ParticleRef<'_>) -> f32 {
    source
        .taper_values_offset
        .and_then(|offset| particle.payload(offset))
        .unwrap_or(1.0)
}

/// Points of one trail: its source, then each chain node with tessellated
/// segments in between.
fn trail_points(source: &TrailReplay, params: &PackParams, head: &TrailHead<'_>) -> Vec<TrailPoint> {
    let Some(offset) = source.trail_data_offset else {
        return Vec::new();
    };
    let scale = source.base.scale.x;
    let head_particle = head.particle.base();
    let origin = usize::try_from(head.data.trail_index)
        .ok()
        .and_then(|i| source.source_positions.get(i).copied())
        .unwrap_or_else(|| params.local_to_world.w_axis.truncate());

    let mut points = vec![TrailPoint {
        position: origin,
        size: head_particle.size[0] * scale * taper(source, &head.particle),
        color: head_particle.color(),
        rotation: head_particle.rotation,
    }];

    let mut current: Option<(Vec3, Vec3, Vec4)> = None;
    for (slot, _) in source.base.walk_chain(head.slot, offset.cast()) {
        let Some(particle) = source.base.particle_in_slot(slot) else {
            break;
        };
        let Some(data) = particle.payload(offset) else {
            break;
        };
        let node = particle.base();
        let next_position = node.location();
        let next_tangent = data.tangent() * source.tess_strength;
        let next_color = node.color();
        let size = node.size[0] * scale * taper(source, &particle);

        match current {
            None => points.push(TrailPoint {
                position: next_position,
                size,
                color: next_color,
                rotation: node.rotation,
            }),
            Some((position, tangent, color)) => {
                let steps =
                    segment_tessellation(position, next_position, source.tess_factor, source.tess_factor_distance);
                for step in 1..=steps {
                    let alpha = step as f32 / steps as f32;
                    points.push(TrailPoint {
                        position: cubic_interp(position, tangent, next_position, next_tangent, alpha),
                        size,
                        color: color.lerp(next_color, alpha),
                        rotation: node.rotation,
                    });
                }
            },
        }
        current = Some((next_position, next_tangent, next_color));
    }
    points
}

/// Packs every trail of the emitter into one strip.
pub fn pack_trails(
    source: &TrailReplay,
    params: &PackParams,
    view: &SceneView,
    vertices: &mut Vec<u8>,
    indices: &mut Vec<u16>,
) -> StripPlan {
    let heads = trail_heads(source);
    let triangle_counts: Vec<u32> = heads
        .iter()
        .map(|head| u32::try_from(head.data.triangle_count).unwrap_or(0))
        .collect();
    let sheets = source.sheets.max(1);
    let plan = fill_strip_indices("Trail", &triangle_counts, sheets, indices);

    let tess_factor = source.tess_factor.max(1);
    let increment = 1.0 / (tess_factor as f32 * source.base.active_count() as f32 + 1.0);
    let mut writer = StripWriter::new(vertices, false);
    for (head, &triangle_count) in heads.iter().zip(&triangle_counts).take(plan.strands) {
        let points = trail_points(source, params, head);
        for sheet in 0..sheets {
            writer.begin_sheet();
            let mut u = 0.0;
            for (k, point) in points.iter().enumerate() {
                let (from, to) = match k {
                    0 => (point.position, points.get(1).map_or(point.position, |p| p.position)),
                    _ => (points[k - 1].position, point.position),
                };
                let right = (from - to).normalize_or_zero();
                let up = strip_up(right, point.position, view.origin, view.camera_up());
                let mut up = sheet_up(up, right, sheet, sheets);
                if up.length_squared() < KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER {
                    up = view.camera_forward();
                }
                let offset = up * point.size;
                for (sign, tex_v) in [(1.0, 0.0), (-1.0, 1.0)] {
                    writer.push(
                        BeamTrailVertex {
                            position: (point.position + offset * sign).to_array(),
                            old_position: point.position.to_array(),
                            size: [point.size; 3],
                            tex_u: u,
                            tex_v,
                            rotation: point.rotation,
                            color: point.color.to_array(),
                            ..BeamTrailVertex::default()
                        },
                        [1.0; 4],
                    );
                }
                u += increment;
            }
            writer.finish_sheet(sheet_vertex_count(triangle_count));
        }
    }
    plan
}

struct TrailFiller {
    source: Arc<TrailReplay>,
    params: PackParams,
}

impl BufferFiller for TrailFiller {
    fn fill(&self, buffer: &mut FillBuffer) {
        let plan = pack_trails(
            &self.source,
            &self.params,
            &buffer.view,
            &mut buffer.vertices,
            &mut buffer.indices,
        );
        buffer.out_triangle_count = plan.triangles;
        buffer.out_degenerate_triangle_count = plan.degenerates;
    }
}

/// Dynamic data of a legacy trail emitter.
#[derive(Debug)]
pub struct TrailDynamicData {
    /// Shared render state
    pub state: SpriteRenderState,
    source: Arc<TrailReplay>,
}

impl TrailDynamicData {
    /// Wraps a snapshot.
    #[must_use]
    pub fn new(source: Arc<TrailReplay>, material: Option<MaterialRef>) -> Self {
        Self {
            state: SpriteRenderState::new(material, false),
            source,
        }
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
        Some(VertexFactoryKind::BeamTrail)
    }

    /// Submits the fill for the visible views.
    pub fn pre_render_view(
        &mut self,
        ctx: &mut RenderContext,
        primitive: &PrimitiveInfo,
        family: &ViewFamily,
        visibility_mask: u32,
    ) {
        if self.source.vertex_count == 0 || self.source.base.active_count() == 0 {
            return;
        }
        let filler = Arc::new(TrailFiller {
            source: Arc::clone(&self.source),
            params: PackParams::new(&ctx.config, primitive.local_to_world),
        });
        submit_strip_fill(
            &mut self.state,
            ctx,
            family,
            visibility_mask,
            self.source.vertex_count as usize,
            VertexFactoryKind::BeamTrail.stride(),
            filler,
        );
    }

    /// Draws into `view`.
    pub fn render(&mut self, primitive: &PrimitiveInfo, pdi: &mut dyn DrawInterface, view: &SceneView) -> usize {
        if self.source.vertex_count == 0 || self.source.base.active_count() == 0 {
            return 0;
        }
        render_strip_batch(&mut self.state, primitive, pdi, view, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitters::test_support::{buffer_with, family_from, material};
    use crate::host::{PrimitiveType, RecordingDrawInterface};
    use crate::particle::BaseParticle;
    use crate::payload::{PayloadKind, PayloadLayout};
    use crate::replay::EmitterKind;
    use crate::vertex::read_vertex;
    use flare_common::ViewId;

    fn trail_source(triangle_count: i32, tess_factor: u32) -> TrailReplay {
        let mut layout = PayloadLayout::new();
        let offset = layout.push::<Trail2Payload>(PayloadKind::Trail2);
        let mut buffer = buffer_with(
            &layout,
            &[
                BaseParticle::at(Vec3::new(5.0, 0.0, 0.0)).with_size(Vec3::ONE),
                BaseParticle::at(Vec3::new(10.0, 0.0, 0.0)).with_size(Vec3::ONE),
            ],
        );
        let head = Trail2Payload {
            flags: ChainLink::new(TrailNodeKind::Start, None, Some(1)).pack(),
            triangle_count,
            ..Trail2Payload::default()
        };
        let end = Trail2Payload {
            flags: ChainLink::new(TrailNodeKind::End, Some(0), None).pack(),
            ..Trail2Payload::default()
        };
        buffer.write_payload(0, offset.get(), &head).expect("in bounds");
        buffer.write_payload(1, offset.get(), &end).expect("in bounds");
        TrailReplay {
            base: ReplayBase::from_buffer(EmitterKind::Trail, &buffer),
            vertex_count: 16,
            index_count: 16,
            trail_data_offset: Some(offset),
            trail_count: 1,
            tess_factor,
            source_positions: vec![Vec3::ZERO],
            ..TrailReplay::default()
        }
    }

    fn view() -> SceneView {
        SceneView::look_at(ViewId::new(0), Vec3::new(5.0, 0.0, 10.0), Vec3::new(5.0, 0.0, 0.0), Vec3::Y)
    }

    fn pack(source: &TrailReplay) -> (Vec<u8>, Vec<u16>, StripPlan) {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let plan = pack_trails(source, &PackParams::default(), &view(), &mut vertices, &mut indices);
        (vertices, indices, plan)
    }

    #[test]
    fn test_trail_from_source_through_nodes() {
        let (vertices, indices, plan) = pack(&trail_source(4, 1));
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(plan.strands, 1);
        assert_eq!(plan.triangles, 4);

        let v0: BeamTrailVertex = read_vertex(&vertices, 0).expect("source pair");
        let v2: BeamTrailVertex = read_vertex(&vertices, 2).expect("head pair");
        let v5: BeamTrailVertex = read_vertex(&vertices, 5).expect("end pair");
        assert_eq!(v0.position, [0.0, -1.0, 0.0]);
        assert_eq!(v2.old_position, [5.0, 0.0, 0.0]);
        assert_eq!(v5.position, [10.0, 1.0, 0.0]);
        assert!((v5.tex_u - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_segments_are_tessellated() {
        let (vertices, _, _) = pack(&trail_source(6, 2));
        assert_eq!(vertices.len() / std::mem::size_of::<BeamTrailVertex>(), 8);
        let mid: BeamTrailVertex = read_vertex(&vertices, 4).expect("tessellated pair");
        assert_eq!(mid.old_position, [7.5, 0.0, 0.0]);
    }

    #[test]
    fn test_headless_emitter_draws_nothing() {
        let (vertices, indices, plan) = pack(&trail_source(0, 1));
        assert!(vertices.is_empty());
        assert!(indices.is_empty());
        assert_eq!(plan, StripPlan::default());
    }

    #[test]
    fn test_render_strip() {
        let source = trail_source(4, 1);
        let mut ctx = RenderContext::inline();
        let primitive = PrimitiveInfo::default();
        let mut data = TrailDynamicData::new(Arc::new(source), Some(material(6)));
        data.init(false);
        let family = family_from(Vec3::new(5.0, 0.0, 10.0));
        data.pre_render_view(&mut ctx, &primitive, &family, 1);
        let mut pdi = RecordingDrawInterface::new();
        assert_eq!(data.render(&primitive, &mut pdi, &family.views[0]), 1);
        assert_eq!(pdi.draws[0].primitive_type, PrimitiveType::TriangleStrip);
        assert_eq!(pdi.draws[0].num_primitives, 4);
        assert_eq!(pdi.draws[0].index_count, 6);
    }
}

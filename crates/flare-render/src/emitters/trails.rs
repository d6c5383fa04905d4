//! Chained strips shared by ribbons and anim trails.
//!
//! Both kinds scan for chain heads, walk each chain along its `next` links
//! and emit one vertex pair per node, optionally preceded by interpolated
//! pairs. They differ only in where the two vertices of a pair go, which
//! [`TrailShape`] supplies.

use std::fmt::Debug;
use std::sync::Arc;

use bytemuck::Pod;
use glam::{Vec3, Vec4};
use tracing::warn;

use crate::chain::ChainLink;
use crate::dynamic_data::SpriteRenderState;
use crate::emitters::{render_strip_batch, submit_strip_fill};
use crate::fill::{BufferFiller, FillBuffer};
use crate::host::{DrawInterface, MaterialRef, SceneView, ViewFamily};
use crate::payload::TrailsBasePayload;
use crate::render_context::RenderContext;
use crate::replay::{ReplayBase, TrailsReplay};
use crate::scene_proxy::PrimitiveInfo;
use crate::tessellation::{fill_strip_indices, sheet_vertex_count, StripPlan, StripWriter};
use crate::vertex::BeamTrailVertex;
use crate::vertex_factory::VertexFactoryKind;

/// One chain node read out of the snapshot.
#[derive(Debug, Clone, Copy)]
pub struct TrailNode<P> {
    /// Particle location
    pub position: Vec3,
    /// Particle location last frame
    pub old_position: Vec3,
    /// Half width, already scaled
    pub size: f32,
    /// Particle color
    pub color: Vec4,
    /// Particle rotation
    pub rotation: f32,
    /// Shared trail fields
    pub trail: TrailsBasePayload,
    /// Dynamic parameter, `Vec4::ONE` when absent
    pub dynamic: Vec4,
    /// Kind-specific payload
    pub payload: P,
}

/// Geometry of one chained strip kind.
pub trait TrailShape: Debug + Send + Sync + 'static {
    /// Payload every node carries; it must start with [`TrailsBasePayload`].
    type Payload: Pod;

    /// Name used in logs.
    const NAME: &'static str;

    /// Shared trail settings.
    fn trails(&self) -> &TrailsReplay;

    /// The two vertex positions of `node`.
    fn edges(&self, node: &TrailNode<Self::Payload>, view: &SceneView) -> [Vec3; 2];

    /// The two vertex positions `alpha` of the way from `previous` to `current`.
    fn interpolated_edges(
        &self,
        previous: &TrailNode<Self::Payload>,
        current: &TrailNode<Self::Payload>,
        alpha: f32,
        view: &SceneView,
    ) -> [Vec3; 2];

    /// Interpolated pairs to emit before `node`.
    fn interp_count(&self, node: &TrailNode<Self::Payload>) -> u32 {
        u32::try_from(node.trail.rendering_interp_count).unwrap_or(0)
    }
}

/// A chain head and the triangles its strand needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailsHead {
    /// Record slot of the head
    pub slot: u16,
    /// Triangles of the strand
    pub triangle_count: u32,
}

/// Active heads that start a drawable chain, in index order.
#[must_use]
pub fn trail_heads(trails: &TrailsReplay) -> Vec<TrailsHead> {
    let Some(offset) = trails.trail_data_offset else {
        return Vec::new();
    };
    (0..trails.base.active_count())
        .filter_map(|i| {
            let slot = trails.base.slot(i)?;
            let data = trails.base.particle(i)?.payload(offset)?;
            let link = ChainLink::unpack(data.flags);
            let triangle_count = u32::try_from(data.triangle_count).ok().filter(|&tc| tc > 0)?;
            (link.is_head() && link.next.is_some()).then_some(TrailsHead { slot, triangle_count })
        })
        .collect()
}

/// Writes strip indices for every drawable chain.
pub fn fill_trail_index_data(name: &str, heads: &[TrailsHead], indices: &mut Vec<u16>) -> StripPlan {
    let counts: Vec<u32> = heads.iter().map(|head| head.triangle_count).collect();
    fill_strip_indices(name, &counts, 1, indices)
}

fn read_node<S: TrailShape>(shape: &S, slot: u16) -> Option<TrailNode<S::Payload>> {
    let trails = shape.trails();
    let offset = trails.trail_data_offset?;
    let particle = trails.base.particle_in_slot(slot)?;
    let trail = particle.payload(offset)?;
    let payload = particle.payload(offset.cast::<S::Payload>())?;
    let dynamic = trails
        .dynamic_parameter_offset
        .and_then(|o| particle.payload(o))
        .map_or(Vec4::ONE, |d| d.value());
    let base = particle.base();
    Some(TrailNode {
        position: base.location(),
        old_position: base.old_location(),
        size: base.size[0] * trails.base.scale.x,
        color: base.color(),
        rotation: base.rotation,
        trail,
        dynamic,
        payload,
    })
}

/// Per-pair attributes other than the edge positions.
#[derive(Debug, Clone, Copy)]
struct PairAttributes {
    old_position: Vec3,
    size: f32,
    color: Vec4,
    rotation: f32,
    tiled_u: f32,
    dynamic: Vec4,
}

impl PairAttributes {
    fn of<P>(node: &TrailNode<P>) -> Self {
        Self {
            old_position: node.old_position,
            size: node.size,
            color: node.color,
            rotation: node.rotation,
            tiled_u: node.trail.tiled_u,
            dynamic: node.dynamic,
        }
    }

    fn lerp(self, to: Self, alpha: f32) -> Self {
        Self {
            old_position: self.old_position.lerp(to.old_position, alpha),
            size: self.size + (to.size - self.size) * alpha,
            color: self.color.lerp(to.color, alpha),
            rotation: to.rotation,
            tiled_u: self.tiled_u + (to.tiled_u - self.tiled_u) * alpha,
            dynamic: self.dynamic.lerp(to.dynamic, alpha),
        }
    }
}

fn push_pair(writer: &mut StripWriter<'_>, edges: [Vec3; 2], attributes: &PairAttributes, u: f32, tiled: bool) {
    let u2 = if tiled { attributes.tiled_u } else { u };
    for (edge, tex_v) in edges.into_iter().zip([0.0, 1.0]) {
        writer.push(
            BeamTrailVertex {
                position: edge.to_array(),
                old_position: attributes.old_position.to_array(),
                size: [attributes.size; 3],
                tex_u: u,
                tex_v,
                rotation: attributes.rotation,
                color: attributes.color.to_array(),
                tex_u2: u2,
                tex_v2: tex_v,
                ..BeamTrailVertex::default()
            },
            attributes.dynamic.to_array(),
        );
    }
}

/// Packs every chain of `shape` into one strip.
pub fn pack_trail_strips<S: TrailShape>(
    shape: &S,
    view: &SceneView,
    vertices: &mut Vec<u8>,
    indices: &mut Vec<u16>,
) -> StripPlan {
    let trails = shape.trails();
    let Some(flags) = trails.flags_offset() else {
        warn!("{} emitter has no trail payload", S::NAME);
        return StripPlan::default();
    };
    let heads = trail_heads(trails);
    let plan = fill_trail_index_data(S::NAME, &heads, indices);
    let tiled = trails.texture_tile_distance > 0.0;

    let mut writer = StripWriter::new(vertices, trails.dynamic_parameter_offset.is_some());
    for head in heads.iter().take(plan.strands) {
        writer.begin_sheet();
        let increment = 1.0 / (head.triangle_count / 2).max(1) as f32;
        let mut u = 0.0;
        let mut previous: Option<TrailNode<S::Payload>> = None;
        for (slot, _) in trails.base.walk_chain(head.slot, flags) {
            let Some(node) = read_node(shape, slot) else {
                break;
            };
            let current = PairAttributes::of(&node);
            let interp = shape.interp_count(&node);
            match &previous {
                Some(prev) if interp > 1 => {
                    let from = PairAttributes::of(prev);
                    for step in 1..=interp {
                        let alpha = step as f32 / interp as f32;
                        let edges = shape.interpolated_edges(prev, &node, alpha, view);
                        push_pair(&mut writer, edges, &from.lerp(current, alpha), u, tiled);
                        u += increment;
                    }
                },
                _ => {
                    push_pair(&mut writer, shape.edges(&node, view), &current, u, tiled);
                    u += increment;
                },
            }
            previous = Some(node);
        }
        writer.finish_sheet(sheet_vertex_count(head.triangle_count));
    }
    plan
}

struct TrailsFiller<S> {
    source: Arc<S>,
}

impl<S: TrailShape> BufferFiller for TrailsFiller<S> {
    fn fill(&self, buffer: &mut FillBuffer) {
        let plan = pack_trail_strips(&*self.source, &buffer.view, &mut buffer.vertices, &mut buffer.indices);
        buffer.out_triangle_count = plan.triangles;
        buffer.out_degenerate_triangle_count = plan.degenerates;
    }
}

/// Dynamic data of a chained strip emitter.
#[derive(Debug)]
pub struct TrailsDynamicData<S> {
    /// Shared render state
    pub state: SpriteRenderState,
    source: Arc<S>,
}

impl<S: TrailShape> TrailsDynamicData<S> {
    /// Wraps a snapshot.
    #[must_use]
    pub fn new(source: Arc<S>, material: Option<MaterialRef>) -> Self {
        let uses_dynamic_parameter = source.trails().dynamic_parameter_offset.is_some();
        Self {
            state: SpriteRenderState::new(material, uses_dynamic_parameter),
            source,
        }
    }

    /// The snapshot.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Shared particle data.
    #[must_use]
    pub fn source_base(&self) -> &ReplayBase {
        &self.source.trails().base
    }

    /// Resolves materials.
    pub fn init(&mut self, selected: bool) {
        self.state.init(selected);
    }

    /// Vertex layout.
    #[must_use]
    pub fn vertex_factory_kind(&self) -> Option<VertexFactoryKind> {
        Some(if self.source.trails().dynamic_parameter_offset.is_some() {
            VertexFactoryKind::BeamTrailDynamicParameter
        } else {
            VertexFactoryKind::BeamTrail
        })
    }

    fn has_geometry(&self) -> bool {
        let trails = self.source.trails();
        trails.vertex_count > 0 && trails.base.active_count() > 0
    }

    /// Submits the fill for the visible views.
    pub fn pre_render_view(
        &mut self,
        ctx: &mut RenderContext,
        _primitive: &PrimitiveInfo,
        family: &ViewFamily,
        visibility_mask: u32,
    ) {
        let Some(kind) = self.vertex_factory_kind().filter(|_| self.has_geometry()) else {
            return;
        };
        let filler = Arc::new(TrailsFiller {
            source: Arc::clone(&self.source),
        });
        submit_strip_fill(
            &mut self.state,
            ctx,
            family,
            visibility_mask,
            self.source.trails().vertex_count as usize,
            kind.stride(),
            filler,
        );
    }

    /// Draws into `view`.
    pub fn render(&mut self, primitive: &PrimitiveInfo, pdi: &mut dyn DrawInterface, view: &SceneView) -> usize {
        if !self.has_geometry() || self.source.trails().index_count < 3 {
            return 0;
        }
        render_strip_batch(&mut self.state, primitive, pdi, view, false, false)
    }
}

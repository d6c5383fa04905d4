//! Anim-trail strips.
//!
//! An anim trail carries both of its edges explicitly instead of expanding a
//! center line by a half width, so each pair is the node's first and second
//! edge points. Between nodes each edge follows its own Hermite curve from
//! the current node back to the previous one, whose tangents are the edge
//! velocities scaled by the animation sample step.

use glam::Vec3;

use crate::emitters::trails::{TrailNode, TrailShape, TrailsDynamicData};
use crate::host::SceneView;
use crate::payload::AnimTrailPayload;
use crate::replay::{AnimTrailReplay, TrailsReplay};
use crate::tessellation::cubic_interp;

/// Dynamic data of an anim-trail emitter.
pub type AnimTrailDynamicData = TrailsDynamicData<AnimTrailReplay>;

impl TrailShape for AnimTrailReplay {
    type Payload = AnimTrailPayload;

    const NAME: &'static str = "AnimTrail";

    fn trails(&self) -> &TrailsReplay {
        &self.trails
    }

    fn edges(&self, node: &TrailNode<AnimTrailPayload>, _view: &SceneView) -> [Vec3; 2] {
        [node.payload.first_edge(), node.payload.second_edge()]
    }

    fn interpolated_edges(
        &self,
        previous: &TrailNode<AnimTrailPayload>,
        current: &TrailNode<AnimTrailPayload>,
        alpha: f32,
        _view: &SceneView,
    ) -> [Vec3; 2] {
        let step = self.anim_sample_time_step;
        let (from, to) = (&previous.payload, &current.payload);
        // Each curve starts at the current node and runs back to the previous one.
        let t = 1.0 - alpha;
        [
            cubic_interp(
                to.first_edge(),
                to.first_velocity() * step,
                from.first_edge(),
                from.first_velocity() * step,
                t,
            ),
            cubic_interp(
                to.second_edge(),
                to.second_velocity() * step,
                from.second_edge(),
                from.second_velocity() * step,
                t,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::emitters::test_support::{buffer_with, family_from, material, view_from};
    use crate::emitters::trails::pack_trail_strips;
    use crate::emitters::trails::test_support::{chain_base, write_nodes};
    use crate::host::RecordingDrawInterface;
    use crate::particle::BaseParticle;
    use crate::payload::{PayloadKind, PayloadLayout};
    use crate::render_context::RenderContext;
    use crate::replay::{EmitterKind, ReplayBase};
    use crate::scene_proxy::PrimitiveInfo;
    use crate::vertex::{read_vertex, BeamTrailVertex};
    use crate::vertex_factory::VertexFactoryKind;

    fn anim_trail(triangle_count: i32, interp: i32, step: f32) -> AnimTrailReplay {
        anim_trail_along(triangle_count, interp, step, 4.0, -1.0)
    }

    /// Two nodes at x = 0 and `far`, every edge moving with `velocity` along X.
    fn anim_trail_along(triangle_count: i32, interp: i32, step: f32, far: f32, velocity: f32) -> AnimTrailReplay {
        let mut layout = PayloadLayout::new();
        let offset = layout.push::<AnimTrailPayload>(PayloadKind::AnimTrail);
        let xs = [0.0, far];
        let particles: Vec<BaseParticle> = xs.iter().map(|&x| BaseParticle::at(Vec3::new(x, 0.0, 0.0))).collect();
        let mut buffer = buffer_with(&layout, &particles);
        let nodes: Vec<AnimTrailPayload> = xs
            .iter()
            .enumerate()
            .map(|(i, &x)| AnimTrailPayload {
                base: chain_base(i, xs.len(), triangle_count, interp),
                first_edge: [x, 2.0, 0.0],
                second_edge: [x, -3.0, 0.0],
                first_velocity: [velocity, 0.0, 0.0],
                second_velocity: [velocity, 0.0, 0.0],
                ..AnimTrailPayload::default()
            })
            .collect();
        write_nodes(&mut buffer, offset, &nodes);
        AnimTrailReplay {
            trails: TrailsReplay {
                base: ReplayBase::from_buffer(EmitterKind::AnimTrail, &buffer),
                vertex_count: 8,
                index_count: 8,
                trail_data_offset: Some(offset.cast()),
                trail_count: 1,
                sheets: 1,
                texture_tile_distance: 10.0,
                ..TrailsReplay::default()
            },
            anim_sample_time_step: step,
        }
    }

    fn pack(source: &AnimTrailReplay) -> Vec<u8> {
        let view = view_from(Vec3::new(0.0, 0.0, 20.0));
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        pack_trail_strips(source, &view, &mut vertices, &mut indices);
        vertices
    }

    #[test]
    fn test_pairs_are_the_stored_edges() {
        let vertices = pack(&anim_trail(2, 0, 1.0));
        let v0: BeamTrailVertex = read_vertex(&vertices, 0).expect("first edge");
        let v1: BeamTrailVertex = read_vertex(&vertices, 1).expect("second edge");
        let v2: BeamTrailVertex = read_vertex(&vertices, 2).expect("next node");
        assert_eq!(v0.position, [0.0, 2.0, 0.0]);
        assert_eq!(v1.position, [0.0, -3.0, 0.0]);
        assert_eq!(v2.position, [4.0, 2.0, 0.0]);
        // Tiled U follows the node payload.
        assert_eq!(v2.tex_u2, 1.0);
        assert_eq!(v2.tex_u, 1.0);
    }

    #[test]
    fn test_edges_follow_their_velocity_curves() {
        // Velocity x step equals the chord from the current node back to the
        // previous one, so each edge moves linearly.
        let vertices = pack(&anim_trail(4, 2, 4.0));
        let mid_first: BeamTrailVertex = read_vertex(&vertices, 2).expect("interpolated first edge");
        let mid_second: BeamTrailVertex = read_vertex(&vertices, 3).expect("interpolated second edge");
        assert!((mid_first.position[0] - 2.0).abs() < 1e-5);
        assert!((mid_first.position[1] - 2.0).abs() < 1e-5);
        assert!((mid_second.position[1] + 3.0).abs() < 1e-5);
        assert!((mid_first.tex_u2 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_curves_run_from_current_node_back() {
        let vertices = pack(&anim_trail_along(6, 3, 12.0, 12.0, -1.0));
        let xs: Vec<f32> = (0..4)
            .map(|pair| {
                let v: BeamTrailVertex = read_vertex(&vertices, pair * 2).expect("first edge");
                v.position[0]
            })
            .collect();
        for (x, expected) in xs.iter().zip([0.0, 4.0, 8.0, 12.0]) {
            assert!((x - expected).abs() < 1e-4, "first edge x {x} != {expected}");
        }
    }

    #[test]
    fn test_tangents_against_the_chord_bend_the_edge() {
        // The curve runs from x = 12 back to 0 while both tangents point +X.
        let vertices = pack(&anim_trail_along(6, 3, 12.0, 12.0, 1.0));
        let third: BeamTrailVertex = read_vertex(&vertices, 2).expect("alpha 1/3");
        let two_thirds: BeamTrailVertex = read_vertex(&vertices, 4).expect("alpha 2/3");
        assert!((third.position[0] - 60.0 / 27.0).abs() < 1e-4);
        assert!((two_thirds.position[0] - 264.0 / 27.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_step_flattens_tangents() {
        let vertices = pack(&anim_trail(4, 2, 0.0));
        let mid: BeamTrailVertex = read_vertex(&vertices, 2).expect("interpolated first edge");
        // Hermite with zero tangents is smoothstep: 0.5 stays at the midpoint.
        assert!((mid.position[0] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_render_strip() {
        let mut ctx = RenderContext::inline();
        let primitive = PrimitiveInfo::default();
        let mut data = AnimTrailDynamicData::new(Arc::new(anim_trail(2, 0, 1.0)), Some(material(3)));
        assert_eq!(data.vertex_factory_kind(), Some(VertexFactoryKind::BeamTrail));
        data.init(false);
        let family = family_from(Vec3::new(0.0, 0.0, 20.0));
        data.pre_render_view(&mut ctx, &primitive, &family, 1);
        let mut pdi = RecordingDrawInterface::new();
        assert_eq!(data.render(&primitive, &mut pdi, &family.views[0]), 1);
        assert_eq!(pdi.draws[0].num_primitives, 2);
        assert_eq!(pdi.draws[0].index_count, 4);
    }

    #[test]
    fn test_empty_snapshot_draws_nothing() {
        let mut source = anim_trail(2, 0, 1.0);
        source.trails.vertex_count = 0;
        let mut data = AnimTrailDynamicData::new(Arc::new(source), Some(material(3)));
        data.init(false);
        let mut pdi = RecordingDrawInterface::new();
        let family = family_from(Vec3::new(0.0, 0.0, 20.0));
        assert_eq!(data.render(&PrimitiveInfo::default(), &mut pdi, &family.views[0]), 0);
        assert!(pdi.draws.is_empty());
    }
}

//! Ribbon strips.

use glam::Vec3;

use crate::emitters::trails::{TrailNode, TrailShape, TrailsDynamicData};
use crate::host::SceneView;
use crate::payload::RibbonPayload;
use crate::replay::{RenderAxis, RibbonReplay, TrailsReplay};
use crate::tessellation::{cubic_interp, KINDA_SMALL_NUMBER};

/// Dynamic data of a ribbon emitter.
pub type RibbonDynamicData = TrailsDynamicData<RibbonReplay>;

impl RibbonReplay {
    /// Expansion direction of a ribbon point.
    fn ribbon_up(&self, position: Vec3, tangent: Vec3, stored_up: Vec3, view: &SceneView) -> Vec3 {
        match self.render_axis {
            RenderAxis::CameraUp => {
                let to_point = (position - view.origin).normalize_or_zero();
                let up = tangent.normalize_or_zero().cross(to_point);
                if up.length_squared() < KINDA_SMALL_NUMBER {
                    view.camera_up()
                } else {
                    up.normalize()
                }
            },
            RenderAxis::SourceUp | RenderAxis::SourceTangent => stored_up,
        }
    }
}

impl TrailShape for RibbonReplay {
    type Payload = RibbonPayload;

    const NAME: &'static str = "Ribbon";

    fn trails(&self) -> &TrailsReplay {
        &self.trails
    }

    fn edges(&self, node: &TrailNode<RibbonPayload>, view: &SceneView) -> [Vec3; 2] {
        let up = self.ribbon_up(node.position, node.payload.tangent(), node.payload.up(), view);
        let offset = up * node.size;
        [node.position + offset, node.position - offset]
    }

    fn interpolated_edges(
        &self,
        previous: &TrailNode<RibbonPayload>,
        current: &TrailNode<RibbonPayload>,
        alpha: f32,
        view: &SceneView,
    ) -> [Vec3; 2] {
        let (prev_tangent, tangent) = (previous.payload.tangent(), current.payload.tangent());
        let position = cubic_interp(current.position, tangent, previous.position, prev_tangent, 1.0 - alpha);
        let up = self.ribbon_up(
            position,
            prev_tangent.lerp(tangent, alpha),
            previous.payload.up().lerp(current.payload.up(), alpha),
            view,
        );
        let offset = up * (previous.size + (current.size - previous.size) * alpha);
        [position + offset, position - offset]
    }

    fn interp_count(&self, node: &TrailNode<RibbonPayload>) -> u32 {
        let count = u32::try_from(node.trail.rendering_interp_count).unwrap_or(0);
        match self.max_tessellation_between_particles {
            0 => count,
            max => count.min(max),
        }
    }
}

//! Per-particle distance fading and camera offset.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Default alpha below which a faded particle is collapsed to zero size.
pub const DEFAULT_CULL_ALPHA_THRESHOLD: f32 = 5.0 / 255.0;

/// Near fade band: invisible inside `cull_distance`, fully visible past
/// `fade_distance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearCull {
    /// Distance at or below which the particle is invisible
    pub cull_distance: f32,
    /// Distance past which the particle is fully visible
    pub fade_distance: f32,
}

/// Far fade band: fully visible inside `fade_distance`, invisible past
/// `cull_distance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FarCull {
    /// Distance past which the particle starts fading
    pub fade_distance: f32,
    /// Distance at or past which the particle is invisible
    pub cull_distance: f32,
}

/// Distance-based alpha fading of sprite particles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceCulling {
    /// Near band, if enabled
    pub near: Option<NearCull>,
    /// Far band, if enabled
    pub far: Option<FarCull>,
    /// Per-emitter override of the collapse threshold
    pub alpha_threshold: Option<f32>,
}

/// Outcome of culling one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullResult {
    /// Color with faded alpha
    pub color: Vec4,
    /// Size, zeroed when the particle faded out
    pub size: Vec3,
    /// Alpha multiplier that was applied
    pub adjusted_alpha: f32,
}

impl DistanceCulling {
    /// Whether either band is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.near.is_some() || self.far.is_some()
    }

    /// Alpha multiplier at squared distance `distance_sq`.
    ///
    /// When both bands apply, the far band wins, matching the order the
    /// bands are evaluated in.
    #[must_use]
    pub fn fade_alpha(&self, distance_sq: f32) -> f32 {
        let mut alpha = 1.0;
        if let Some(near) = self.near {
            let cull_sq = near.cull_distance * near.cull_distance;
            let fade_sq = near.fade_distance * near.fade_distance;
            if distance_sq <= cull_sq {
                alpha = 0.0;
            } else if distance_sq < fade_sq {
                alpha = (distance_sq - cull_sq) / (fade_sq - cull_sq);
            }
        }
        if let Some(far) = self.far {
            let fade_sq = far.fade_distance * far.fade_distance;
            let cull_sq = far.cull_distance * far.cull_distance;
            if distance_sq >= cull_sq {
                alpha = 0.0;
            } else if distance_sq > fade_sq {
                alpha = 1.0 - (distance_sq - fade_sq) / (cull_sq - fade_sq);
            }
        }
        alpha
    }

    /// Fades `color` by distance from `view_origin` and zeroes `size` once the
    /// alpha drops under the threshold. `world_position` must already be in
    /// world space.
    #[must_use]
    pub fn apply(
        &self,
        world_position: Vec3,
        view_origin: Vec3,
        color: Vec4,
        size: Vec3,
        default_threshold: f32,
    ) -> CullResult {
        if !self.is_enabled() {
            return CullResult {
                color,
                size,
                adjusted_alpha: 1.0,
            };
        }
        let alpha = self.fade_alpha(world_position.distance_squared(view_origin));
        let mut color = color;
        color.w = if alpha <= 0.0 { 0.0 } else { color.w * alpha };
        let threshold = self.alpha_threshold.unwrap_or(default_threshold);
        let size = if alpha < threshold { Vec3::ZERO } else { size };
        CullResult {
            color,
            size,
            adjusted_alpha: alpha,
        }
    }
}

/// Pulls `position` toward the camera by `offset`.
///
/// `anchor` is the point the camera direction is measured from; it differs
/// from `position` when shifting the old location of velocity-aligned
/// sprites. Positions are in local space when `local_to_world` is given.
/// When the offset would carry the particle past the camera, it is pushed
/// along the same direction scaled by `behind_camera_push_scale` instead.
#[must_use]
pub fn apply_camera_offset(
    anchor: Vec3,
    position: Vec3,
    offset: f32,
    camera_position: Vec3,
    local_to_world: Option<&Mat4>,
    behind_camera_push_scale: f32,
) -> Vec3 {
    let (anchor_world, position_world) = match local_to_world {
        Some(m) => (m.transform_point3(anchor), m.transform_point3(position)),
        None => (anchor, position),
    };
    let to_camera = camera_position - anchor_world;
    let dir = to_camera.normalize_or_zero();
    let shifted = if to_camera.length_squared() > offset * offset {
        position_world + dir * offset
    } else {
        position_world + dir * offset * behind_camera_push_scale
    };
    match local_to_world {
        Some(m) => m.inverse().transform_point3(shifted),
        None => shifted,
    }
}

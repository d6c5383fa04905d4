//! Strip geometry shared by beams and trails.
//!
//! Strips are packed as one triangle strip per sheet:
//!
//! ```text
//! 1--3--5--7--9-...
//! |\ |\ |\ |\ |\...
//! | \| \| \| \| ...
//! 0--2--4--6--8-...
//! ```
//!
//! Sheets and strands are joined by four degenerate indices, so a whole
//! emitter draws as one strip.

use std::f32::consts::PI;

use glam::{Quat, Vec3};
use tracing::{debug, warn};

use crate::fill::MAX_INDEXED_VERTICES;
use crate::vertex::{push_vertex, BeamTrailVertex, BeamTrailVertexDynamicParameter};

/// Lengths below this are treated as zero.
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

/// Cubic Hermite interpolation between `p0` and `p1`.
#[must_use]
pub fn cubic_interp(p0: Vec3, t0: Vec3, p1: Vec3, t1: Vec3, alpha: f32) -> Vec3 {
    let a2 = alpha * alpha;
    let a3 = a2 * alpha;
    p0 * (2.0 * a3 - 3.0 * a2 + 1.0)
        + t0 * (a3 - 2.0 * a2 + alpha)
        + t1 * (a3 - a2)
        + p1 * (-2.0 * a3 + 3.0 * a2)
}

/// Moves a noise point `step` units toward its target.
///
/// When the moved point lies within `radius` of the target on every axis
/// the target itself is returned, bit for bit.
#[must_use]
pub fn noise_lock_step(current: Vec3, target: Vec3, step: f32, radius: f32) -> Vec3 {
    let candidate = current + (target - current).normalize_or_zero() * step;
    let delta = (candidate - target).abs();
    if delta.x < radius && delta.y < radius && delta.z < radius {
        target
    } else {
        candidate
    }
}

/// Tessellation steps for the segment `a`..`b`.
///
/// Without a distance the full factor is used; shorter segments than
/// `factor_distance` get proportionally fewer steps, never fewer than one.
#[must_use]
pub fn segment_tessellation(a: Vec3, b: Vec3, tess_factor: u32, factor_distance: f32) -> u32 {
    let tess_factor = tess_factor.max(1);
    if factor_distance <= KINDA_SMALL_NUMBER {
        return tess_factor;
    }
    let ratio = a.distance(b) / factor_distance;
    if ratio <= 0.0 {
        1
    } else if ratio < 1.0 {
        (((tess_factor + 1) as f32 * ratio) as u32).max(1)
    } else {
        tess_factor
    }
}

/// Up vector of a strip segment facing the camera.
#[must_use]
pub fn strip_up(right: Vec3, location: Vec3, view_origin: Vec3, camera_up: Vec3) -> Vec3 {
    let up = right.cross(location - view_origin);
    if up.length_squared() <= KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER {
        camera_up
    } else {
        up.normalize()
    }
}

/// Rotates `up` about `right` for sheet `sheet` of `sheets`.
#[must_use]
pub fn sheet_up(up: Vec3, right: Vec3, sheet: u32, sheets: u32) -> Vec3 {
    if sheet == 0 || sheets == 0 {
        return up;
    }
    let axis = right.normalize_or_zero();
    if axis == Vec3::ZERO {
        return up;
    }
    let angle = PI / sheets as f32 * sheet as f32;
    Quat::from_axis_angle(axis, angle) * up
}

/// Outcome of indexing a set of strands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripPlan {
    /// Strands that fit in the index range, in order
    pub strands: usize,
    /// Triangles written, including degenerates
    pub triangles: u32,
    /// Degenerate triangles written
    pub degenerates: u32,
    /// Vertices the indices address
    pub vertices: usize,
}

/// Vertices one strand sheet needs for `triangle_count` triangles.
#[must_use]
pub const fn sheet_vertex_count(triangle_count: u32) -> usize {
    triangle_count as usize + 2
}

/// Writes strip indices for strands with the given triangle counts.
///
/// The first strand opens the strip with two indices; every further sheet
/// and strand is stitched on with four degenerate indices. Strands that
/// would address past the 16-bit index range are dropped with a warning.
/// `emitter` names the emitter kind in that warning.
pub fn fill_strip_indices(
    emitter: &str,
    triangle_counts: &[u32],
    sheets: u32,
    indices: &mut Vec<u16>,
) -> StripPlan {
    let sheets = sheets.max(1);
    let mut plan = StripPlan::default();
    let needed: usize = triangle_counts
        .iter()
        .map(|&tc| sheet_vertex_count(tc) * sheets as usize)
        .sum();
    if needed > MAX_INDEXED_VERTICES {
        warn!(
            "{} strip needs {} vertices, clamping to {}",
            emitter, needed, MAX_INDEXED_VERTICES
        );
    }

    let mut vertex: usize = 0;
    for &triangle_count in triangle_counts {
        let strand_vertices = sheet_vertex_count(triangle_count) * sheets as usize;
        if vertex + strand_vertices > MAX_INDEXED_VERTICES {
            break;
        }
        for sheet in 0..sheets {
            if plan.strands == 0 && sheet == 0 {
                indices.push(vertex as u16);
                indices.push(vertex as u16 + 1);
            } else {
                let last = vertex as u16 - 1;
                indices.extend_from_slice(&[last, vertex as u16, vertex as u16, vertex as u16 + 1]);
                plan.triangles += 4;
                plan.degenerates += 4;
            }
            vertex += 2;
            for _ in 0..triangle_count {
                indices.push(vertex as u16);
                vertex += 1;
            }
            plan.triangles += triangle_count;
        }
        plan.strands += 1;
    }
    plan.vertices = vertex;
    plan
}

/// Appends strip vertices sheet by sheet, holding each sheet to the vertex
/// count its indices expect.
pub struct StripWriter<'a> {
    out: &'a mut Vec<u8>,
    with_dynamic: bool,
    sheet_start: usize,
    last: Option<(BeamTrailVertex, [f32; 4])>,
}

impl<'a> StripWriter<'a> {
    /// Writes into `out`, with dynamic-parameter vertices when `with_dynamic`.
    pub fn new(out: &'a mut Vec<u8>, with_dynamic: bool) -> Self {
        let sheet_start = out.len();
        Self {
            out,
            with_dynamic,
            sheet_start,
            last: None,
        }
    }

    /// Bytes per vertex.
    #[must_use]
    pub const fn stride(&self) -> usize {
        if self.with_dynamic {
            std::mem::size_of::<BeamTrailVertexDynamicParameter>()
        } else {
            std::mem::size_of::<BeamTrailVertex>()
        }
    }

    /// Starts a sheet.
    pub fn begin_sheet(&mut self) {
        self.sheet_start = self.out.len();
        self.last = None;
    }

    /// Appends one vertex.
    pub fn push(&mut self, vertex: BeamTrailVertex, dynamic_value: [f32; 4]) {
        if self.with_dynamic {
            push_vertex(
                self.out,
                &BeamTrailVertexDynamicParameter {
                    vertex,
                    dynamic_value,
                },
            );
        } else {
            push_vertex(self.out, &vertex);
        }
        self.last = Some((vertex, dynamic_value));
    }

    /// Vertices written since the sheet began.
    #[must_use]
    pub fn sheet_len(&self) -> usize {
        (self.out.len() - self.sheet_start) / self.stride()
    }

    /// Ends a sheet, padding with its last vertex or truncating so exactly
    /// `expected` vertices were written.
    pub fn finish_sheet(&mut self, expected: usize) {
        let written = self.sheet_len();
        if written != expected {
            debug!("Strip sheet wrote {} vertices, indices expect {}", written, expected);
        }
        if written > expected {
            self.out.truncate(self.sheet_start + expected * self.stride());
            return;
        }
        let (vertex, dynamic) = self.last.unwrap_or_default();
        for _ in written..expected {
            self.push(vertex, dynamic);
        }
    }
}

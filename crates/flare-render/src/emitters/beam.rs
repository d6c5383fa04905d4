//! Beam strips.
//!
//! A beam runs from its source point toward its target as a camera-facing
//! strip. The spine is either the straight line, a polyline through
//! interpolated points, or a Hermite curve through noise-displaced points.
//! Each spine point becomes one vertex pair per sheet.

use std::sync::Arc;

use ahash::AHashMap;
use glam::Vec3;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::dynamic_data::SpriteRenderState;
use crate::emitters::{render_strip_batch, submit_strip_fill, PackParams};
use crate::fill::{BufferFiller, FillBuffer};
use crate::host::{DrawInterface, MaterialRef, SceneView, ViewFamily};
use crate::payload::{BeamPayload, ParticleRef};
use crate::render_context::RenderContext;
use crate::replay::{BeamReplay, ReplayBase, TaperMethod};
use crate::scene_proxy::PrimitiveInfo;
use crate::tessellation::{
    cubic_interp, fill_strip_indices, noise_lock_step, sheet_up, sheet_vertex_count, strip_up, StripPlan,
    StripWriter, KINDA_SMALL_NUMBER,
};
use crate::vertex::BeamTrailVertex;
use crate::vertex_factory::VertexFactoryKind;

/// Noise points resolved so far, per beam index.
#[derive(Debug, Default)]
pub struct NoiseState {
    points: AHashMap<usize, Vec<Vec3>>,
}

impl NoiseState {
    /// Empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves beam `beam`'s points `step` units toward `next` and returns them.
    ///
    /// A beam seen for the first time, or whose point count changed, starts
    /// from `current`.
    pub fn advance(&mut self, beam: usize, current: &[Vec3], next: &[Vec3], step: f32, radius: f32) -> Vec<Vec3> {
        let points = self.points.entry(beam).or_insert_with(|| current.to_vec());
        if points.len() != current.len() {
            *points = current.to_vec();
        }
        for (point, target) in points.iter_mut().zip(next) {
            *point = noise_lock_step(*point, *target, step, radius);
        }
        points.clone()
    }

    /// Points of `beam`, if it has been advanced.
    #[must_use]
    pub fn points(&self, beam: usize) -> Option<&[Vec3]> {
        self.points.get(&beam).map(Vec::as_slice)
    }

    /// Beams with resolved points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no beam has been advanced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// How a beam's spine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeamPath {
    /// Straight from source to the particle
    Direct,
    /// Through the interpolated points
    Interpolated,
    /// Stepped along the beam direction with noise
    Noise,
    /// Sampled from the interpolated points with noise
    InterpolatedNoise,
}

impl BeamPath {
    /// Path the snapshot's settings select.
    #[must_use]
    pub fn of(source: &BeamReplay) -> Self {
        match (source.low_freq_noise, source.interpolation_points) {
            (false, 0 | 1) => Self::Direct,
            (false, _) => Self::Interpolated,
            (true, 0) => Self::Noise,
            (true, _) => Self::InterpolatedNoise,
        }
    }

    const fn has_noise(self) -> bool {
        matches!(self, Self::Noise | Self::InterpolatedNoise)
    }
}

/// One point along a beam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinePoint {
    /// Draw position
    pub position: Vec3,
    /// Position written as the previous-frame position
    pub old_position: Vec3,
    /// Texture U
    pub u: f32,
    /// Width multiplier
    pub taper: f32,
}

impl SpinePoint {
    const fn at(position: Vec3, u: f32, taper: f32) -> Self {
        Self {
            position,
            old_position: position,
            u,
            taper,
        }
    }
}

struct BeamInput<'a> {
    index: usize,
    particle: ParticleRef<'a>,
    data: BeamPayload,
}

fn drawable_beams(source: &BeamReplay, max_beams: usize) -> Vec<BeamInput<'_>> {
    let Some(beam_offset) = source.beam_data_offset else {
        warn!("Beam emitter has no beam payload");
        return Vec::new();
    };
    let path = BeamPath::of(source);
    let mut beams = Vec::new();
    for index in 0..source.base.active_count() {
        let Some(particle) = source.base.particle(index) else {
            continue;
        };
        let Some(data) = particle.payload(beam_offset) else {
            continue;
        };
        if data.triangle_count <= 0 {
            continue;
        }
        if source.interpolation_points > 0 && data.steps <= 0 {
            continue;
        }
        if path.has_noise() && source.target_noise_points_offset.is_none() {
            trace!("Beam {} has noise enabled but no noise points", index);
            continue;
        }
        beams.push(BeamInput { index, particle, data });
    }
    if beams.len() > max_beams {
        warn!("{} beams exceed the limit of {}, dropping the rest", beams.len(), max_beams);
        beams.truncate(max_beams);
    }
    beams
}

fn taper_at(source: &BeamReplay, particle: &ParticleRef<'_>, index: usize) -> f32 {
    if source.taper_method == TaperMethod::None {
        return 1.0;
    }
    source
        .taper_values_offset
        .and_then(|offset| particle.payload_at(offset, index))
        .unwrap_or(1.0)
}

fn interpolated_points(source: &BeamReplay, particle: &ParticleRef<'_>) -> Vec<Vec3> {
    source
        .interpolated_points_offset
        .and_then(|offset| particle.payload_array(offset, source.interpolation_points as usize))
        .map(|points| points.into_iter().map(Vec3::from_array).collect())
        .unwrap_or_default()
}

fn direct_spine(source: &BeamReplay, particle: &ParticleRef<'_>, data: &BeamPayload) -> Vec<SpinePoint> {
    let base = particle.base();
    let start = data.source_point();
    let end = base.location();
    let tiles = if source.texture_tile_distance > KINDA_SMALL_NUMBER {
        start.distance(end) / source.texture_tile_distance
    } else {
        source.texture_tile
    };
    let u_end = if data.travel_ratio > KINDA_SMALL_NUMBER {
        tiles * data.travel_ratio
    } else {
        tiles
    };
    vec![
        SpinePoint::at(start, 0.0, taper_at(source, particle, 0)),
        SpinePoint {
            position: end,
            old_position: base.old_location(),
            u: u_end,
            taper: taper_at(source, particle, 1),
        },
    ]
}

fn interpolated_spine(source: &BeamReplay, particle: &ParticleRef<'_>, data: &BeamPayload) -> Vec<SpinePoint> {
    let points = interpolated_points(source, particle);
    let steps = usize::try_from(data.steps).unwrap_or(0).min(points.len());
    let count = source.interpolation_points.max(1) as f32;
    let increment = if source.texture_tile_distance > KINDA_SMALL_NUMBER {
        data.source_point().distance(data.target_point()) / source.texture_tile_distance / count
    } else {
        1.0 / count
    };

    let mut spine = Vec::with_capacity(steps + 1);
    spine.push(SpinePoint::at(data.source_point(), 0.0, taper_at(source, particle, 0)));
    for (step, point) in points.iter().take(steps).enumerate() {
        spine.push(SpinePoint::at(
            *point,
            (step + 1) as f32 * increment,
            taper_at(source, particle, step + 1),
        ));
    }
    spine
}

/// Position at `t` along `start` followed by `points`, in segment units.
fn sample_polyline(start: Vec3, points: &[Vec3], t: f32) -> Vec3 {
    let Some(last) = points.last() else {
        return start;
    };
    let segment = t.max(0.0).trunc() as usize;
    if segment >= points.len() {
        return *last;
    }
    let from = if segment == 0 { start } else { points[segment - 1] };
    from.lerp(points[segment], t.fract())
}

fn noise_spine(
    source: &BeamReplay,
    params: &PackParams,
    particle: &ParticleRef<'_>,
    data: &BeamPayload,
    noise: &[Vec3],
    interpolated: Option<&[Vec3]>,
) -> Vec<SpinePoint> {
    let tess = source.noise_tessellation.max(1);
    let frequency = source.frequency.max(1) as usize;
    let increment = 1.0 / (frequency as f32 * tess as f32);
    let steps = usize::try_from(data.steps).unwrap_or(0);
    let distance_scale = source
        .noise_distance_scale_offset
        .and_then(|offset| particle.payload(offset))
        .unwrap_or(1.0);
    let half_tension = (1.0 - source.noise_tension) / 2.0;

    let displacement = |k: usize| {
        noise.get(k).map_or(Vec3::ZERO, |n| {
            params.local_to_world.transform_vector3(*n * distance_scale) * source.noise_range_scale
        })
    };
    let start = data.source_point();
    let node = |k: usize| match interpolated {
        Some(points) if steps > 0 => {
            sample_polyline(start, points, (k + 1) as f32 * points.len() as f32 / steps as f32)
        },
        _ => start + data.direction() * data.step_size * (k + 1) as f32,
    };

    let mut last_tangent = if source.use_source {
        data.source_tangent().normalize_or_zero() * data.source_strength
    } else {
        params.local_to_world.x_axis.truncate().normalize_or_zero() * source.noise_tangent_strength
    };
    let mut target_strength = source.noise_tangent_strength;
    let locked = data.locked();

    let mut spine = Vec::with_capacity(2 + (steps + 1) * tess as usize);
    spine.push(SpinePoint::at(start, 0.0, taper_at(source, particle, 0)));
    let mut u = increment;
    let mut last_draw = start;
    let mut tessellate = |spine: &mut Vec<SpinePoint>,
                          from: Vec3,
                          from_tangent: Vec3,
                          to: Vec3,
                          to_tangent: Vec3,
                          taper_base: usize| {
        for t in 0..tess {
            let alpha = (t + 1) as f32 / tess as f32;
            let position = cubic_interp(from, from_tangent, to, to_tangent, alpha);
            spine.push(SpinePoint::at(position, u, taper_at(source, particle, taper_base + t as usize)));
            u += increment;
        }
    };

    for step in 0..steps {
        let current_draw = node(step) + displacement(step);
        let target_tangent = if locked && step + 1 == steps {
            target_strength = data.target_strength;
            data.target_tangent()
        } else {
            let next_draw = node(step + 1) + displacement(step + 1);
            (next_draw - last_draw) * half_tension
        };
        let target_tangent = target_tangent.normalize_or_zero() * target_strength;
        tessellate(
            &mut spine,
            last_draw,
            last_tangent,
            current_draw,
            target_tangent,
            step * tess as usize,
        );
        last_draw = current_draw;
        last_tangent = target_tangent;
    }

    if locked {
        let mut target_draw = data.target_point();
        if source.target_noise {
            target_draw += displacement(frequency);
        }
        let target_tangent = if source.use_target {
            data.target_tangent()
        } else {
            (node(steps) - last_draw) * half_tension
        };
        let target_tangent = target_tangent.normalize_or_zero() * target_strength;
        tessellate(
            &mut spine,
            last_draw,
            last_tangent,
            target_draw,
            target_tangent,
            steps * tess as usize,
        );
    }
    spine
}

/// Noise points of a beam, advanced when smooth noise is on.
fn resolve_noise(source: &BeamReplay, beam: &BeamInput<'_>, state: &Mutex<NoiseState>) -> Vec<Vec3> {
    let count = source.frequency.max(1) as usize + 1;
    let read = |offset: Option<_>| -> Vec<Vec3> {
        offset
            .and_then(|offset| {
                beam.particle
                    .payload_array::<[f32; 3]>(offset, count)
                    .or_else(|| beam.particle.payload_array(offset, count - 1))
            })
            .map(|points| points.into_iter().map(Vec3::from_array).collect())
            .unwrap_or_default()
    };
    let current = read(source.target_noise_points_offset);
    if source.noise_lock_time < 0.0 || !source.smooth_noise {
        return current;
    }
    let next = read(source.next_noise_points_offset);
    let rate = source
        .noise_rate_offset
        .and_then(|offset| beam.particle.payload(offset))
        .unwrap_or(1.0);
    state
        .lock()
        .advance(beam.index, &current, &next, source.noise_speed * rate, source.noise_lock_radius)
}

/// Builds the spine of one beam.
#[must_use]
pub fn beam_spine(
    source: &BeamReplay,
    params: &PackParams,
    particle: &ParticleRef<'_>,
    data: &BeamPayload,
    noise: &[Vec3],
) -> Vec<SpinePoint> {
    match BeamPath::of(source) {
        BeamPath::Direct => direct_spine(source, particle, data),
        BeamPath::Interpolated => interpolated_spine(source, particle, data),
        BeamPath::Noise => noise_spine(source, params, particle, data, noise, None),
        BeamPath::InterpolatedNoise => {
            let points = interpolated_points(source, particle);
            noise_spine(source, params, particle, data, noise, Some(&points))
        },
    }
}

/// Up vector source: per step, or computed once and shared by all beams.
struct BeamUp {
    per_step: bool,
    shared: Option<Vec3>,
}

impl BeamUp {
    fn at(&mut self, right: Vec3, location: Vec3, view: &SceneView) -> Vec3 {
        if let Some(up) = self.shared.filter(|_| !self.per_step) {
            return up;
        }
        let up = strip_up(right, location, view.origin, view.camera_up());
        if !self.per_step {
            self.shared = Some(up);
        }
        up
    }
}

/// Packs the strips of all drawable beams.
///
/// Vertex pairs per sheet are held to what the indices address, so a beam
/// whose payload triangle count disagrees with its spine still stitches
/// correctly.
pub fn pack_beams(
    source: &BeamReplay,
    params: &PackParams,
    view: &SceneView,
    noise: &Mutex<NoiseState>,
    max_beams: usize,
    vertices: &mut Vec<u8>,
    indices: &mut Vec<u16>,
) -> StripPlan {
    let beams = drawable_beams(source, max_beams);
    let triangle_counts: Vec<u32> = beams
        .iter()
        .map(|beam| u32::try_from(beam.data.triangle_count).unwrap_or(0))
        .collect();
    let sheets = source.sheets.max(1);
    let plan = fill_strip_indices("Beam", &triangle_counts, sheets, indices);

    let path = BeamPath::of(source);
    let mut ups = BeamUp {
        per_step: source.up_vector_step_size == 0,
        shared: None,
    };
    let mut writer = StripWriter::new(vertices, false);
    for (beam, &triangle_count) in beams.iter().zip(&triangle_counts).take(plan.strands) {
        let noise_points = if path.has_noise() {
            resolve_noise(source, beam, noise)
        } else {
            Vec::new()
        };
        let spine = beam_spine(source, params, &beam.particle, &beam.data, &noise_points);
        let particle = beam.particle.base();
        let size = Vec3::splat(particle.size[0] * source.base.scale.x);

        for sheet in 0..sheets {
            writer.begin_sheet();
            for (k, point) in spine.iter().enumerate() {
                let (from, to) = match k {
                    0 => (point.position, spine.get(1).map_or(point.position, |p| p.position)),
                    _ => (spine[k - 1].position, point.position),
                };
                let right = (from - to).normalize_or_zero();
                let up = sheet_up(ups.at(right, from, view), right, sheet, sheets);
                let offset = up * size * point.taper;
                for (sign, tex_v) in [(1.0, 0.0), (-1.0, 1.0)] {
                    writer.push(
                        BeamTrailVertex {
                            position: (point.position + offset * sign).to_array(),
                            old_position: point.old_position.to_array(),
                            size: size.to_array(),
                            tex_u: point.u,
                            tex_v,
                            rotation: particle.rotation,
                            color: particle.color,
                            ..BeamTrailVertex::default()
                        },
                        [1.0; 4],
                    );
                }
            }
            writer.finish_sheet(sheet_vertex_count(triangle_count));
        }
    }
    plan
}

struct BeamFiller {
    source: Arc<BeamReplay>,
    params: PackParams,
    noise: Arc<Mutex<NoiseState>>,
    max_beams: usize,
}

impl BufferFiller for BeamFiller {
    fn fill(&self, buffer: &mut FillBuffer) {
        let plan = pack_beams(
            &self.source,
            &self.params,
            &buffer.view,
            &self.noise,
            self.max_beams,
            &mut buffer.vertices,
            &mut buffer.indices,
        );
        buffer.out_triangle_count = plan.triangles;
        buffer.out_degenerate_triangle_count = plan.degenerates;
    }
}

/// Dynamic data of a beam emitter.
#[derive(Debug)]
pub struct BeamDynamicData {
    /// Shared render state
    pub state: SpriteRenderState,
    source: Arc<BeamReplay>,
    noise: Arc<Mutex<NoiseState>>,
}

impl BeamDynamicData {
    /// Wraps a snapshot.
    #[must_use]
    pub fn new(source: Arc<BeamReplay>, material: Option<MaterialRef>) -> Self {
        Self {
            state: SpriteRenderState::new(material, false),
            source,
            noise: Arc::new(Mutex::new(NoiseState::new())),
        }
    }

    /// Shared particle data.
    #[must_use]
    pub fn source_base(&self) -> &ReplayBase {
        &self.source.base
    }

    /// Noise points resolved by past fills.
    #[must_use]
    pub fn noise(&self) -> &Arc<Mutex<NoiseState>> {
        &self.noise
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
        if self.source.vertex_count == 0 && self.source.index_count == 0 {
            return;
        }
        let filler = Arc::new(BeamFiller {
            source: Arc::clone(&self.source),
            params: PackParams::new(&ctx.config, primitive.local_to_world),
            noise: Arc::clone(&self.noise),
            max_beams: ctx.config.max_beams as usize,
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
        if self.source.vertex_count == 0 && self.source.index_count == 0 {
            return 0;
        }
        render_strip_batch(&mut self.state, primitive, pdi, view, self.source.use_local_space, true)
    }
}

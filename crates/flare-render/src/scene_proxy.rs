//! Render-thread proxy of one particle system.
//!
//! The game thread publishes a [`ParticleDynamicData`] per tick through a
//! [`DynamicDataChannel`]; once per frame the render thread drains the
//! channel, retires the previous data and activates the newest. Emitters are
//! then pre-rendered once per frame and drawn once per view.

use ahash::AHashMap;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use glam::{Mat4, Vec3, Vec4};
use tracing::{debug, trace, warn};

use flare_common::{EmitterInstanceId, ParticleId, ViewId};

use crate::dynamic_data::{DynamicEmitterData, EmitterBinding};
use crate::host::{DepthPriorityGroup, DrawInterface, SceneView, ViewFamily};
use crate::render_context::RenderContext;
use crate::replay::EmitterReplay;

/// Primitive-level settings every emitter draw inherits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveInfo {
    /// Component transform
    pub local_to_world: Mat4,
    /// Depth layer
    pub depth_priority_group: DepthPriorityGroup,
    /// Draws cast shadows
    pub cast_shadow: bool,
    /// Drawn with the selection material
    pub selected: bool,
}

impl Default for PrimitiveInfo {
    fn default() -> Self {
        Self {
            local_to_world: Mat4::IDENTITY,
            depth_priority_group: DepthPriorityGroup::World,
            cast_shadow: false,
            selected: false,
        }
    }
}

#[derive(Debug, Default)]
struct ViewTransforms {
    previous: AHashMap<EmitterInstanceId, AHashMap<ParticleId, Mat4>>,
    current: AHashMap<EmitterInstanceId, AHashMap<ParticleId, Mat4>>,
}

/// Last frame's mesh particle transforms, per view.
#[derive(Debug, Default)]
pub struct MotionBlurCache {
    views: AHashMap<ViewId, ViewTransforms>,
}

impl MotionBlurCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform `particle` had in the last velocity pass of `view`.
    #[must_use]
    pub fn previous(&self, view: ViewId, emitter: EmitterInstanceId, particle: ParticleId) -> Option<Mat4> {
        self.views
            .get(&view)?
            .previous
            .get(&emitter)?
            .get(&particle)
            .copied()
    }

    /// Stores this pass's transform of `particle`.
    pub fn record(&mut self, view: ViewId, emitter: EmitterInstanceId, particle: ParticleId, transform: Mat4) {
        self.views
            .entry(view)
            .or_default()
            .current
            .entry(emitter)
            .or_default()
            .insert(particle, transform);
    }

    /// Makes this pass's transforms the previous ones; particles not drawn
    /// this pass are forgotten.
    pub fn end_pass(&mut self, view: ViewId) {
        if let Some(transforms) = self.views.get_mut(&view) {
            transforms.previous = std::mem::take(&mut transforms.current);
        }
    }

    /// Drops everything cached for `view`.
    pub fn forget_view(&mut self, view: ViewId) {
        self.views.remove(&view);
    }

    /// Particles remembered for the next pass of `view`.
    #[must_use]
    pub fn previous_count(&self, view: ViewId) -> usize {
        self.views
            .get(&view)
            .map_or(0, |t| t.previous.values().map(|m| m.len()).sum())
    }
}

/// All emitters of one particle system for one tick.
#[derive(Debug, Default)]
pub struct ParticleDynamicData {
    /// Emitters in draw order
    pub emitters: Vec<DynamicEmitterData>,
    /// System center for macro UVs
    pub system_position_for_macro_uvs: Vec3,
    /// System radius for macro UVs, 0 disables them
    pub system_radius_for_macro_uvs: f32,
    /// Emitter whose macro-UV override applies
    pub macro_uv_emitter_index: usize,
}

impl ParticleDynamicData {
    /// Wraps per-emitter snapshots with their bindings.
    #[must_use]
    pub fn from_replays(replays: impl IntoIterator<Item = (EmitterReplay, EmitterBinding)>) -> Self {
        Self {
            emitters: replays
                .into_iter()
                .map(|(replay, binding)| DynamicEmitterData::from_replay(replay, binding))
                .collect(),
            ..Self::default()
        }
    }

    /// Sets the system macro-UV sphere.
    #[must_use]
    pub fn with_macro_uv(mut self, position: Vec3, radius: f32) -> Self {
        self.system_position_for_macro_uvs = position;
        self.system_radius_for_macro_uvs = radius;
        self
    }

    fn release(&mut self, ctx: &mut RenderContext) {
        for emitter in &mut self.emitters {
            emitter.release_render_resources(ctx);
        }
    }
}

/// Where the proxy's data is in the hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandoffState {
    /// No data
    #[default]
    Empty,
    /// Data swapped in, resources not created yet
    Pending,
    /// Resources created, drawable
    Active,
}

/// Game-to-render hand-off of [`ParticleDynamicData`].
#[derive(Debug)]
pub struct DynamicDataChannel {
    sender: Sender<ParticleDynamicData>,
    receiver: Receiver<ParticleDynamicData>,
}

impl Default for DynamicDataChannel {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DynamicDataChannel {
    /// Creates a channel holding at most `capacity` undelivered ticks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Publishes a tick without blocking; when full the oldest undelivered
    /// tick is dropped.
    pub fn publish(&self, mut data: ParticleDynamicData) {
        loop {
            match self.sender.try_send(data) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.receiver.try_recv().is_ok() {
                        trace!("Dropped an undelivered particle tick");
                    }
                    data = back;
                },
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Newest published tick, releasing any older ones.
    pub fn take_latest(&self, ctx: &mut RenderContext) -> Option<ParticleDynamicData> {
        let mut latest: Option<ParticleDynamicData> = None;
        while let Ok(data) = self.receiver.try_recv() {
            if let Some(mut stale) = latest.replace(data) {
                stale.release(ctx);
            }
        }
        latest
    }

    /// Ticks waiting for the render thread.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}

/// Object position in clip space and the macro-UV scales derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectPositionAndScale {
    /// Position after the view projection
    pub post_projection_position: Vec4,
    /// Position after the perspective divide
    pub ndc_position: Vec3,
    /// Clip-space xy scales, then NDC xy scales; zero when macro UVs are off
    pub macro_uv_scales: Vec4,
}

/// Render-thread side of one particle system.
#[derive(Debug, Default)]
pub struct ParticleSystemSceneProxy {
    /// Primitive settings
    pub primitive: PrimitiveInfo,
    state: HandoffState,
    dynamic_data: Option<ParticleDynamicData>,
    motion_blur: MotionBlurCache,
    pending_lod_distance: f32,
    lod_origin: Vec3,
    last_lod_frame: Option<u64>,
}

impl ParticleSystemSceneProxy {
    /// Proxy with no data yet.
    #[must_use]
    pub fn new(primitive: PrimitiveInfo) -> Self {
        Self {
            primitive,
            ..Self::default()
        }
    }

    /// Hand-off state.
    #[must_use]
    pub const fn state(&self) -> HandoffState {
        self.state
    }

    /// Active data.
    #[must_use]
    pub fn dynamic_data(&self) -> Option<&ParticleDynamicData> {
        self.dynamic_data.as_ref()
    }

    /// Cached velocity-pass transforms.
    #[must_use]
    pub fn motion_blur(&self) -> &MotionBlurCache {
        &self.motion_blur
    }

    /// Retires the active data and activates `new_data`.
    pub fn update_data_render_thread(&mut self, ctx: &mut RenderContext, new_data: Option<ParticleDynamicData>) {
        if let Some(mut old) = self.dynamic_data.take() {
            old.release(ctx);
        }
        self.state = HandoffState::Empty;

        let Some(mut data) = new_data else {
            return;
        };
        self.state = HandoffState::Pending;
        for emitter in &mut data.emitters {
            emitter.init(self.primitive.selected);
            emitter.create_render_resources(ctx);
        }
        debug!("Activated particle data with {} emitters", data.emitters.len());
        self.dynamic_data = Some(data);
        self.state = HandoffState::Active;
    }

    /// Activates the newest tick in `channel`, if any.
    pub fn update_data(&mut self, ctx: &mut RenderContext, channel: &DynamicDataChannel) -> bool {
        match channel.take_latest(ctx) {
            Some(data) => {
                self.update_data_render_thread(ctx, Some(data));
                true
            },
            None => false,
        }
    }

    /// Releases everything; the proxy is empty afterwards.
    pub fn release(&mut self, ctx: &mut RenderContext) {
        self.update_data_render_thread(ctx, None);
    }

    /// Builds this frame's vertex data for the views in `visibility_mask`.
    pub fn pre_render_view(
        &mut self,
        ctx: &mut RenderContext,
        family: &ViewFamily,
        visibility_mask: u32,
        frame: u64,
    ) {
        for (i, view) in family.views.iter().enumerate() {
            if i < 32 && visibility_mask & (1 << i) != 0 {
                self.determine_lod_distance(view, frame);
            }
        }
        if self.state != HandoffState::Active {
            return;
        }
        let primitive = self.primitive;
        if let Some(data) = &mut self.dynamic_data {
            for emitter in &mut data.emitters {
                emitter.pre_render_view(ctx, &primitive, family, visibility_mask, frame);
            }
        }
    }

    /// Draws every valid emitter into `view`; returns `(draws,
    /// emitters_drawn)`.
    pub fn draw_dynamic_elements(
        &mut self,
        ctx: &mut RenderContext,
        pdi: &mut dyn DrawInterface,
        view: &SceneView,
        depth_priority_group: DepthPriorityGroup,
    ) -> (usize, usize) {
        if self.state != HandoffState::Active
            || !view.show_flags.particles
            || depth_priority_group != self.primitive.depth_priority_group
        {
            return (0, 0);
        }
        let Some(data) = &mut self.dynamic_data else {
            return (0, 0);
        };

        let primitive = self.primitive;
        let mut draws = 0;
        let mut emitters_drawn = 0;
        for emitter in &mut data.emitters {
            if !emitter.is_valid() {
                continue;
            }
            let n = emitter.render(ctx, &primitive, pdi, view, &mut self.motion_blur);
            if n > 0 {
                draws += n;
                emitters_drawn += 1;
            }
        }
        if pdi.is_rendering_velocities() {
            self.motion_blur.end_pass(view.id);
        }
        trace!("Particle system drew {draws} batches from {emitters_drawn} emitters");
        (draws, emitters_drawn)
    }

    /// Folds `view` into this frame's LOD distance, keeping the closest.
    pub fn determine_lod_distance(&mut self, view: &SceneView, frame: u64) {
        let component = self.primitive.local_to_world.w_axis.truncate();
        let distance = component.distance(view.origin) * view.lod_distance_factor;
        if self.last_lod_frame != Some(frame) || distance < self.pending_lod_distance {
            self.pending_lod_distance = distance;
            self.lod_origin = view.origin;
            self.last_lod_frame = Some(frame);
        }
    }

    /// Closest view distance seen this frame and the view origin it came
    /// from.
    #[must_use]
    pub fn lod_distance(&self) -> Option<(f32, Vec3)> {
        self.last_lod_frame
            .map(|_| (self.pending_lod_distance, self.lod_origin))
    }

    /// Clip-space position of the macro-UV center and the scales that map
    /// the macro-UV sphere to `[0, 1]`.
    #[must_use]
    pub fn object_position_and_scale(&self, view: &SceneView) -> Option<ObjectPositionAndScale> {
        let data = self.dynamic_data.as_ref()?;
        let project = |p: Vec3| view.view_projection * p.extend(1.0);

        let post_projection_position = project(data.system_position_for_macro_uvs);
        let ndc_position = post_projection_position.truncate() / post_projection_position.w.max(0.00001);

        let mut radius = data.system_radius_for_macro_uvs;
        let mut center = data.system_position_for_macro_uvs;
        if let Some(emitter) = data.emitters.get(data.macro_uv_emitter_index) {
            let source = emitter.source();
            if source.override_system_macro_uv {
                radius = source.macro_uv_radius;
                center = self.primitive.local_to_world.transform_point3(source.macro_uv_position);
            }
        }

        let macro_uv_scales = if radius > 0.0 {
            let right = project(center + radius * view.camera_right());
            let up = project(center + radius * view.camera_up());
            let dx = right.x - post_projection_position.x;
            let dy = up.y - post_projection_position.y;
            if dx.abs() <= f32::EPSILON || dy.abs() <= f32::EPSILON {
                warn!("Degenerate macro-UV projection");
                Vec4::ZERO
            } else {
                Vec4::new(
                    1.0 / dx,
                    -1.0 / dy,
                    1.0 / (right.x / right.w - ndc_position.x),
                    -1.0 / (up.y / up.w - ndc_position.y),
                )
            }
        } else {
            Vec4::ZERO
        };

        Some(ObjectPositionAndScale {
            post_projection_position,
            ndc_position,
            macro_uv_scales,
        })
    }
}

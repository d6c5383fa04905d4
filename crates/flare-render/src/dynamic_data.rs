//! Render-side wrapper around one emitter snapshot.
//!
//! [`DynamicEmitterData`] owns an `Arc` snapshot plus everything only the
//! render thread touches: resolved material proxies, the checked-out vertex
//! factory and the async fill state.

use std::sync::Arc;

use tracing::{debug, warn};

use flare_common::{EmitterInstanceId, MaterialProxyId, VertexFactoryId};

use crate::emitters::anim_trail::AnimTrailDynamicData;
use crate::emitters::beam::BeamDynamicData;
use crate::emitters::mesh::MeshDynamicData;
use crate::emitters::ribbon::RibbonDynamicData;
use crate::emitters::sprite::SpriteDynamicData;
use crate::emitters::subuv::SubUvDynamicData;
use crate::emitters::trail::TrailDynamicData;
use crate::fill::AsyncFill;
use crate::host::{DrawInterface, MaterialRef, MaterialRelevance, SceneView, ViewFamily};
use crate::render_context::RenderContext;
use crate::replay::{EmitterKind, EmitterReplay, ReplayBase};
use crate::scene_proxy::{MotionBlurCache, PrimitiveInfo};
use crate::sort::SortMode;
use crate::vertex_factory::{VertexFactoryHandle, VertexFactoryKind, VertexFactoryPool};

/// State every emitter kind shares.
#[derive(Debug)]
pub struct SpriteRenderState {
    material: Option<MaterialRef>,
    proxies: [Option<MaterialProxyId>; 2],
    relevance: MaterialRelevance,
    selected: bool,
    vertex_factory: Option<VertexFactoryHandle>,
    /// Cleared when the emitter must not draw
    pub valid: bool,
    /// Vertices carry a dynamic parameter
    pub uses_dynamic_parameter: bool,
    /// Per-view buffers and the outstanding fill
    pub fill: AsyncFill,
    /// Frame the fill was last built for
    pub last_frame_pre_rendered: Option<u64>,
}

impl SpriteRenderState {
    /// State for a snapshot drawn with `material`.
    #[must_use]
    pub fn new(material: Option<MaterialRef>, uses_dynamic_parameter: bool) -> Self {
        Self {
            material,
            proxies: [None; 2],
            relevance: MaterialRelevance::default(),
            selected: false,
            vertex_factory: None,
            valid: false,
            uses_dynamic_parameter,
            fill: AsyncFill::new(),
            last_frame_pre_rendered: None,
        }
    }

    /// Resolves the normal and selected proxies and lets go of the material.
    pub fn init(&mut self, selected: bool) {
        self.selected = selected;
        if let Some(material) = self.material.take() {
            self.proxies = [material.render_proxy(false), material.render_proxy(selected)];
            self.relevance = material.relevance();
        }
        self.valid = true;
    }

    /// Proxy to draw with.
    #[must_use]
    pub fn proxy(&self) -> Option<MaterialProxyId> {
        self.proxies[usize::from(self.selected)]
    }

    /// Relevance of the material.
    #[must_use]
    pub const fn relevance(&self) -> MaterialRelevance {
        self.relevance
    }

    /// Whether particles must be ordered before packing.
    #[must_use]
    pub fn needs_sort(&self, mode: SortMode) -> bool {
        mode != SortMode::None
            && (self.relevance.translucent || self.relevance.distortion || mode.is_age_mode())
    }

    /// Proxy to draw with in `view`, or `None` when the pass filters it out.
    #[must_use]
    pub fn drawable_proxy(&self, pdi: &dyn DrawInterface, view: &SceneView) -> Option<MaterialProxyId> {
        let proxy = self.proxy()?;
        if pdi.is_material_ignored(proxy) && !view.show_flags.wireframe {
            return None;
        }
        Some(proxy)
    }

    /// Claims the pre-render slot for `frame`; false when already done.
    pub fn begin_pre_render(&mut self, frame: u64) -> bool {
        if self.last_frame_pre_rendered == Some(frame) {
            return false;
        }
        self.last_frame_pre_rendered = Some(frame);
        true
    }

    /// Checks out a vertex factory of `kind` unless one is held.
    pub fn create_render_resources(&mut self, pool: &mut VertexFactoryPool, kind: VertexFactoryKind) {
        match &self.vertex_factory {
            Some(handle) if handle.kind() == kind => {},
            _ => {
                self.release_vertex_factory(pool);
                self.vertex_factory = Some(pool.acquire(kind));
            },
        }
    }

    /// Finishes any fill in flight and returns the vertex factory.
    pub fn release_render_resources(&mut self, pool: &mut VertexFactoryPool) {
        self.fill.complete();
        self.release_vertex_factory(pool);
    }

    fn release_vertex_factory(&mut self, pool: &mut VertexFactoryPool) {
        if let Some(handle) = self.vertex_factory.take() {
            if let Err(e) = pool.release(handle) {
                warn!("Emitter release: {e}");
            }
        }
    }

    /// Checked-out vertex factory.
    #[must_use]
    pub fn vertex_factory_id(&self) -> Option<VertexFactoryId> {
        self.vertex_factory.as_ref().map(VertexFactoryHandle::id)
    }
}

/// Materials and identity an emitter snapshot is drawn with.
#[derive(Debug, Clone, Default)]
pub struct EmitterBinding {
    /// Emitter instance the snapshot came from
    pub emitter_id: EmitterInstanceId,
    /// Emitter material
    pub material: Option<MaterialRef>,
    /// One material per mesh element, for mesh emitters
    pub element_materials: Vec<Option<MaterialRef>>,
}

impl EmitterBinding {
    /// Binding with one material.
    #[must_use]
    pub fn new(emitter_id: EmitterInstanceId, material: Option<MaterialRef>) -> Self {
        Self {
            emitter_id,
            material,
            element_materials: Vec::new(),
        }
    }

    /// Adds per-element materials.
    #[must_use]
    pub fn with_element_materials(mut self, materials: Vec<Option<MaterialRef>>) -> Self {
        self.element_materials = materials;
        self
    }
}

/// Dynamic data of one emitter, by kind.
#[derive(Debug)]
pub enum DynamicEmitterData {
    /// Sprites
    Sprite(SpriteDynamicData),
    /// Flip-book sprites
    SubUv(SubUvDynamicData),
    /// Meshes
    Mesh(MeshDynamicData),
    /// Beams
    Beam(BeamDynamicData),
    /// Legacy trails
    Trail(TrailDynamicData),
    /// Ribbons
    Ribbon(RibbonDynamicData),
    /// Anim trails
    AnimTrail(AnimTrailDynamicData),
}

macro_rules! dispatch {
    ($self:expr, $data:ident => $body:expr) => {
        match $self {
            DynamicEmitterData::Sprite($data) => $body,
            DynamicEmitterData::SubUv($data) => $body,
            DynamicEmitterData::Mesh($data) => $body,
            DynamicEmitterData::Beam($data) => $body,
            DynamicEmitterData::Trail($data) => $body,
            DynamicEmitterData::Ribbon($data) => $body,
            DynamicEmitterData::AnimTrail($data) => $body,
        }
    };
}

impl DynamicEmitterData {
    /// Wraps a snapshot.
    #[must_use]
    pub fn from_replay(replay: EmitterReplay, binding: EmitterBinding) -> Self {
        match replay {
            EmitterReplay::Sprite(r) => Self::Sprite(SpriteDynamicData::new(Arc::new(r), binding.material)),
            EmitterReplay::SubUv(r) => Self::SubUv(SubUvDynamicData::new(Arc::new(r), binding.material)),
            EmitterReplay::Mesh(r) => Self::Mesh(MeshDynamicData::new(Arc::new(r), binding)),
            EmitterReplay::Beam(r) => Self::Beam(BeamDynamicData::new(Arc::new(r), binding.material)),
            EmitterReplay::Trail(r) => Self::Trail(TrailDynamicData::new(Arc::new(r), binding.material)),
            EmitterReplay::Ribbon(r) => Self::Ribbon(RibbonDynamicData::new(Arc::new(r), binding.material)),
            EmitterReplay::AnimTrail(r) => {
                Self::AnimTrail(AnimTrailDynamicData::new(Arc::new(r), binding.material))
            },
        }
    }

    /// Particle kind.
    #[must_use]
    pub fn kind(&self) -> EmitterKind {
        match self {
            Self::Sprite(_) => EmitterKind::Sprite,
            Self::SubUv(_) => EmitterKind::SubUv,
            Self::Mesh(_) => EmitterKind::Mesh,
            Self::Beam(_) => EmitterKind::Beam,
            Self::Trail(_) => EmitterKind::Trail,
            Self::Ribbon(_) => EmitterKind::Ribbon,
            Self::AnimTrail(_) => EmitterKind::AnimTrail,
        }
    }

    /// Shared particle data of the snapshot.
    #[must_use]
    pub fn source(&self) -> &ReplayBase {
        dispatch!(self, d => d.source_base())
    }

    /// Shared render state.
    #[must_use]
    pub fn state(&self) -> &SpriteRenderState {
        dispatch!(self, d => &d.state)
    }

    /// Shared render state.
    pub fn state_mut(&mut self) -> &mut SpriteRenderState {
        dispatch!(self, d => &mut d.state)
    }

    /// Whether the emitter may draw.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state().valid
    }

    /// Resolves materials.
    pub fn init(&mut self, selected: bool) {
        dispatch!(self, d => d.init(selected));
    }

    /// Vertex layout the emitter draws with, `None` for host-owned meshes.
    #[must_use]
    pub fn vertex_factory_kind(&self) -> Option<VertexFactoryKind> {
        dispatch!(self, d => d.vertex_factory_kind())
    }

    /// Checks out GPU-side resources.
    pub fn create_render_resources(&mut self, ctx: &mut RenderContext) {
        if let Some(kind) = self.vertex_factory_kind() {
            if kind == VertexFactoryKind::MeshInstanced && !ctx.config.allow_mesh_instancing {
                debug!("Mesh instancing disabled, drawing per particle");
                return;
            }
            debug!("{} emitter acquiring {:?}", self.kind().name(), kind);
            self.state_mut().create_render_resources(&mut ctx.vertex_factories, kind);
        }
    }

    /// Finishes in-flight fills and returns GPU-side resources.
    pub fn release_render_resources(&mut self, ctx: &mut RenderContext) {
        self.state_mut().release_render_resources(&mut ctx.vertex_factories);
    }

    /// Builds this frame's vertex data for the visible views.
    pub fn pre_render_view(
        &mut self,
        ctx: &mut RenderContext,
        primitive: &PrimitiveInfo,
        family: &ViewFamily,
        visibility_mask: u32,
        frame: u64,
    ) {
        if !self.is_valid() || !self.state_mut().begin_pre_render(frame) {
            return;
        }
        dispatch!(self, d => d.pre_render_view(ctx, primitive, family, visibility_mask));
    }

    /// Draws into `view`; returns the number of draws issued.
    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        primitive: &PrimitiveInfo,
        pdi: &mut dyn DrawInterface,
        view: &SceneView,
        motion_blur: &mut MotionBlurCache,
    ) -> usize {
        if !self.is_valid() {
            return 0;
        }
        match self {
            Self::Mesh(d) => d.render(ctx, primitive, pdi, view, motion_blur),
            Self::Sprite(d) => d.render(primitive, pdi, view),
            Self::SubUv(d) => d.render(primitive, pdi, view),
            Self::Beam(d) => d.render(primitive, pdi, view),
            Self::Trail(d) => d.render(primitive, pdi, view),
            Self::Ribbon(d) => d.render(primitive, pdi, view),
            Self::AnimTrail(d) => d.render(primitive, pdi, view),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitters::test_support::{material, opaque_material};
    use crate::replay::SpriteReplay;

    #[test]
    fn test_init_resolves_proxies() {
        let mut state = SpriteRenderState::new(Some(material(3)), false);
        assert!(!state.valid);
        state.init(false);
        assert!(state.valid);
        assert_eq!(state.proxy(), Some(MaterialProxyId::new(3)));
        assert!(state.relevance().translucent);
    }

    #[test]
    fn test_sort_follows_relevance() {
        let mut translucent = SpriteRenderState::new(Some(material(1)), false);
        translucent.init(false);
        assert!(translucent.needs_sort(SortMode::DistanceToView));
        assert!(!translucent.needs_sort(SortMode::None));

        let mut opaque = SpriteRenderState::new(Some(opaque_material(2)), false);
        opaque.init(false);
        assert!(!opaque.needs_sort(SortMode::ViewProjDepth));
        assert!(opaque.needs_sort(SortMode::AgeNewestFirst));
    }

    #[test]
    fn test_pre_render_once_per_frame() {
        let mut state = SpriteRenderState::new(None, false);
        assert!(state.begin_pre_render(7));
        assert!(!state.begin_pre_render(7));
        assert!(state.begin_pre_render(8));
    }

    #[test]
    fn test_resources_round_trip() {
        let mut ctx = RenderContext::inline();
        let mut data = DynamicEmitterData::from_replay(
            EmitterReplay::Sprite(SpriteReplay::default()),
            EmitterBinding::new(EmitterInstanceId::new(), Some(material(1))),
        );
        data.init(false);
        data.create_render_resources(&mut ctx);
        data.create_render_resources(&mut ctx);
        assert_eq!(ctx.vertex_factories.in_use_count(), 1);
        assert!(data.state().vertex_factory_id().is_some());
        data.release_render_resources(&mut ctx);
        assert_eq!(ctx.vertex_factories.in_use_count(), 0);
        assert_eq!(ctx.vertex_factories.free_count(), 1);
        assert_eq!(data.kind(), EmitterKind::Sprite);
    }
}

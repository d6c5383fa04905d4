//! Vertex-factory descriptors and their free-list pool.
//!
//! A vertex factory describes the layout the GPU reads a particle vertex
//! buffer with. Emitters check one out when their render resources are
//! created and return it when they are released, so factories are recycled
//! across frames instead of being rebuilt.

use std::mem::{offset_of, size_of};

use tracing::{debug, info, warn};

use flare_common::{RenderError, VertexFactoryId};

use crate::vertex::{
    BeamTrailVertex, BeamTrailVertexDynamicParameter, MeshInstance, PointSpriteVertex, SpriteVertex,
    SpriteVertexDynamicParameter, SubUvVertex, SubUvVertexDynamicParameter,
};

/// Vertex layouts a particle emitter can need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFactoryKind {
    /// [`SpriteVertex`]
    Sprite,
    /// [`SpriteVertexDynamicParameter`]
    SpriteDynamicParameter,
    /// [`SubUvVertex`]
    SubUv,
    /// [`SubUvVertexDynamicParameter`]
    SubUvDynamicParameter,
    /// [`PointSpriteVertex`]
    PointSprite,
    /// [`BeamTrailVertex`]
    BeamTrail,
    /// [`BeamTrailVertexDynamicParameter`]
    BeamTrailDynamicParameter,
    /// [`MeshInstance`] per-instance stream
    MeshInstanced,
}

impl VertexFactoryKind {
    /// All kinds, in pool order.
    pub const ALL: [Self; 8] = [
        Self::Sprite,
        Self::SpriteDynamicParameter,
        Self::SubUv,
        Self::SubUvDynamicParameter,
        Self::PointSprite,
        Self::BeamTrail,
        Self::BeamTrailDynamicParameter,
        Self::MeshInstanced,
    ];

    /// Bytes per vertex of this layout.
    #[must_use]
    pub const fn stride(self) -> usize {
        match self {
            Self::Sprite => size_of::<SpriteVertex>(),
            Self::SpriteDynamicParameter => size_of::<SpriteVertexDynamicParameter>(),
            Self::SubUv => size_of::<SubUvVertex>(),
            Self::SubUvDynamicParameter => size_of::<SubUvVertexDynamicParameter>(),
            Self::PointSprite => size_of::<PointSpriteVertex>(),
            Self::BeamTrail => size_of::<BeamTrailVertex>(),
            Self::BeamTrailDynamicParameter => size_of::<BeamTrailVertexDynamicParameter>(),
            Self::MeshInstanced => size_of::<MeshInstance>(),
        }
    }

    /// Attribute layout of this kind.
    #[must_use]
    pub fn layout(self) -> VertexLayout {
        use VertexFormat::{Float1, Float2, Float3, Float4, UByte4N, UInt1};

        let sprite = [
            attr("position", Float3, offset_of!(SpriteVertex, position)),
            attr("old_position", Float3, offset_of!(SpriteVertex, old_position)),
            attr("size", Float3, offset_of!(SpriteVertex, size)),
            attr("tex_coord", Float2, offset_of!(SpriteVertex, tex_u)),
            attr("rotation", Float1, offset_of!(SpriteVertex, rotation)),
            attr("sizer_index", UInt1, offset_of!(SpriteVertex, sizer_index)),
            attr("color", Float4, offset_of!(SpriteVertex, color)),
        ];

        let mut attributes = Vec::new();
        match self {
            Self::Sprite => attributes.extend(sprite),
            Self::SpriteDynamicParameter => {
                attributes.extend(sprite);
                attributes.push(attr(
                    "dynamic_parameter",
                    Float4,
                    offset_of!(SpriteVertexDynamicParameter, dynamic_value),
                ));
            },
            Self::SubUv | Self::SubUvDynamicParameter => {
                attributes.extend(sprite);
                attributes.push(attr("tex_coord2", Float2, offset_of!(SubUvVertex, tex_u2)));
                attributes.push(attr("interp", Float1, offset_of!(SubUvVertex, interp)));
                attributes.push(attr("size_uv", Float2, offset_of!(SubUvVertex, size_u)));
                if self == Self::SubUvDynamicParameter {
                    attributes.push(attr(
                        "dynamic_parameter",
                        Float4,
                        offset_of!(SubUvVertexDynamicParameter, dynamic_value),
                    ));
                }
            },
            Self::PointSprite => {
                attributes.push(attr("position", Float3, offset_of!(PointSpriteVertex, position)));
                attributes.push(attr("size", Float1, offset_of!(PointSpriteVertex, size)));
                attributes.push(attr("color", UByte4N, offset_of!(PointSpriteVertex, color)));
            },
            Self::BeamTrail | Self::BeamTrailDynamicParameter => {
                attributes.push(attr("position", Float3, offset_of!(BeamTrailVertex, position)));
                attributes.push(attr("old_position", Float3, offset_of!(BeamTrailVertex, old_position)));
                attributes.push(attr("size", Float3, offset_of!(BeamTrailVertex, size)));
                attributes.push(attr("tex_coord", Float2, offset_of!(BeamTrailVertex, tex_u)));
                attributes.push(attr("rotation", Float1, offset_of!(BeamTrailVertex, rotation)));
                attributes.push(attr("color", Float4, offset_of!(BeamTrailVertex, color)));
                attributes.push(attr("tex_coord2", Float2, offset_of!(BeamTrailVertex, tex_u2)));
                if self == Self::BeamTrailDynamicParameter {
                    attributes.push(attr(
                        "dynamic_parameter",
                        Float4,
                        offset_of!(BeamTrailVertexDynamicParameter, dynamic_value),
                    ));
                }
            },
            Self::MeshInstanced => {
                attributes.push(attr("instance_location", Float3, offset_of!(MeshInstance, location)));
                attributes.push(attr("instance_x_axis", Float3, offset_of!(MeshInstance, x_axis)));
                attributes.push(attr("instance_y_axis", Float3, offset_of!(MeshInstance, y_axis)));
                attributes.push(attr("instance_z_axis", Float3, offset_of!(MeshInstance, z_axis)));
                attributes.push(attr("instance_color", Float4, offset_of!(MeshInstance, color)));
            },
        }

        VertexLayout {
            stride: self.stride(),
            attributes,
        }
    }
}

/// Component format of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// One f32
    Float1,
    /// Two f32
    Float2,
    /// Three f32
    Float3,
    /// Four f32
    Float4,
    /// One u32
    UInt1,
    /// Four normalized u8
    UByte4N,
}

impl VertexFormat {
    /// Size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Float1 | Self::UInt1 | Self::UByte4N => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }
}

/// One named attribute inside a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input name
    pub name: &'static str,
    /// Component format
    pub format: VertexFormat,
    /// Byte offset inside the vertex
    pub offset: usize,
}

const fn attr(name: &'static str, format: VertexFormat, offset: usize) -> VertexAttribute {
    VertexAttribute { name, format, offset }
}

/// Stride plus attribute list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexLayout {
    /// Bytes per vertex
    pub stride: usize,
    /// Attributes in declaration order
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Checks that every attribute lies inside the stride.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.attributes
            .iter()
            .all(|a| a.offset + a.format.size() <= self.stride)
    }
}

/// A vertex-format descriptor instance.
#[derive(Debug)]
pub struct VertexFactory {
    id: VertexFactoryId,
    kind: VertexFactoryKind,
    layout: VertexLayout,
    in_use: bool,
}

impl VertexFactory {
    fn new(id: VertexFactoryId, kind: VertexFactoryKind) -> Self {
        let mut factory = Self {
            id,
            kind,
            layout: VertexLayout::default(),
            in_use: false,
        };
        factory.set_data(kind.layout());
        factory
    }

    /// Installs the layout the GPU reads vertices with.
    pub fn set_data(&mut self, layout: VertexLayout) {
        self.layout = layout;
    }

    /// Factory identifier.
    #[must_use]
    pub const fn id(&self) -> VertexFactoryId {
        self.id
    }

    /// Layout kind.
    #[must_use]
    pub const fn kind(&self) -> VertexFactoryKind {
        self.kind
    }

    /// Installed layout.
    #[must_use]
    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    /// Whether an emitter has it checked out.
    #[must_use]
    pub const fn in_use(&self) -> bool {
        self.in_use
    }
}

/// Checked-out vertex factory.
///
/// Not `Clone`: one handle per checkout, so a factory cannot be owned by two
/// emitters at once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct VertexFactoryHandle {
    id: VertexFactoryId,
    kind: VertexFactoryKind,
}

impl VertexFactoryHandle {
    /// Factory identifier.
    #[must_use]
    pub const fn id(&self) -> VertexFactoryId {
        self.id
    }

    /// Layout kind.
    #[must_use]
    pub const fn kind(&self) -> VertexFactoryKind {
        self.kind
    }
}

/// Free-list pool of vertex factories, keyed by kind.
#[derive(Debug, Default)]
pub struct VertexFactoryPool {
    factories: Vec<VertexFactory>,
    next_id: u32,
}

impl VertexFactoryPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out a free factory of `kind`, creating one when none is free.
    pub fn acquire(&mut self, kind: VertexFactoryKind) -> VertexFactoryHandle {
        if let Some(factory) = self
            .factories
            .iter_mut()
            .find(|f| f.kind == kind && !f.in_use)
        {
            factory.in_use = true;
            return VertexFactoryHandle {
                id: factory.id,
                kind,
            };
        }

        let id = VertexFactoryId::new(self.next_id);
        self.next_id += 1;
        let mut factory = VertexFactory::new(id, kind);
        factory.in_use = true;
        debug!("Created vertex factory {} ({:?})", id, kind);
        self.factories.push(factory);
        VertexFactoryHandle { id, kind }
    }

    /// Returns a factory to the free list.
    ///
    /// Releasing a factory that is not checked out is a logged no-op.
    pub fn release(&mut self, handle: VertexFactoryHandle) -> Result<(), RenderError> {
        match self.factories.iter_mut().find(|f| f.id == handle.id) {
            Some(factory) if factory.in_use => {
                factory.in_use = false;
                Ok(())
            },
            _ => {
                warn!("Release of vertex factory {} that is not in use", handle.id);
                Err(RenderError::VertexFactoryNotInUse(handle.id.raw()))
            },
        }
    }

    /// Looks up a factory.
    #[must_use]
    pub fn get(&self, id: VertexFactoryId) -> Option<&VertexFactory> {
        self.factories.iter().find(|f| f.id == id)
    }

    /// Destroys every free factory; checked-out ones survive.
    pub fn clear_pool(&mut self) {
        let before = self.factories.len();
        self.factories.retain(|f| f.in_use);
        debug!("Cleared {} free vertex factories", before - self.factories.len());
    }

    /// Destroys every factory, including checked-out ones.
    ///
    /// Only valid at shutdown; outstanding handles become dangling ids that
    /// later releases report as not in use.
    pub fn free_pool(&mut self) {
        if self.in_use_count() > 0 {
            info!("Freeing vertex factory pool with {} factories still in use", self.in_use_count());
        }
        self.factories.clear();
    }

    /// Factories currently checked out.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.factories.iter().filter(|f| f.in_use).count()
    }

    /// Factories on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.factories.iter().filter(|f| !f.in_use).count()
    }

    /// Free factories of one kind.
    #[must_use]
    pub fn free_count_of(&self, kind: VertexFactoryKind) -> usize {
        self.factories
            .iter()
            .filter(|f| f.kind == kind && !f.in_use)
            .count()
    }
}

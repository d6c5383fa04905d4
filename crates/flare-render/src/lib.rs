//! # Flare Render
//!
//! CPU-side render core for a particle system.
//!
//! The simulation hands this crate an immutable snapshot of every emitter
//! each frame. The crate turns snapshots into vertex and index streams and
//! submits them as mesh batches:
//! - Particle pools, payload layouts and trail chain links
//! - Snapshots (`*Replay`) and their on-disk capture format
//! - Sorting, distance culling and camera offsets
//! - Sprite, sub-UV, mesh, beam, trail, ribbon and anim-trail packers
//! - An asynchronous fill pipeline running packers on worker threads
//! - A pooled set of vertex factories
//! - The scene proxy that owns dynamic data on the render side
//!
//! ## Frame flow
//!
//! 1. The game side builds a [`ParticleDynamicData`] from its emitters and
//!    hands it to the [`ParticleSystemSceneProxy`].
//! 2. `pre_render_view` sorts particles and submits one fill task per
//!    emitter covering every visible view.
//! 3. `render` waits for the view's filled buffer and issues draws through a
//!    [`DrawInterface`].
//!
//! Packers never fail across the worker boundary. Degenerate input draws
//! nothing; overflowing the 16-bit index range clamps and logs.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod chain;
pub mod config;
pub mod culling;
pub mod dynamic_data;
pub mod emitters;
pub mod fill;
pub mod host;
pub mod particle;
pub mod payload;
pub mod render_context;
pub mod replay;
pub mod replay_file;
pub mod scene_proxy;
pub mod sort;
pub mod tessellation;
pub mod vertex;
pub mod vertex_factory;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::chain::*;
    pub use crate::config::*;
    pub use crate::culling::*;
    pub use crate::dynamic_data::*;
    pub use crate::emitters::anim_trail::*;
    pub use crate::emitters::beam::*;
    pub use crate::emitters::mesh::*;
    pub use crate::emitters::ribbon::*;
    pub use crate::emitters::sprite::*;
    pub use crate::emitters::subuv::*;
    pub use crate::emitters::trail::*;
    pub use crate::emitters::trails::*;
    pub use crate::emitters::PackParams;
    pub use crate::fill::*;
    pub use crate::host::*;
    pub use crate::particle::*;
    pub use crate::payload::*;
    pub use crate::render_context::*;
    pub use crate::replay::*;
    pub use crate::replay_file::*;
    pub use crate::scene_proxy::*;
    pub use crate::sort::*;
    pub use crate::tessellation::*;
    pub use crate::vertex::*;
    pub use crate::vertex_factory::*;
}

pub use prelude::*;

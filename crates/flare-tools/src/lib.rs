//! # Flare Tools
//!
//! Development tools for the Flare particle renderer.
//!
//! This crate provides:
//! - Per-frame reports over replay captures
//! - Offline packing of captured frames through the scene proxy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod report;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::report::*;
}

pub use prelude::*;

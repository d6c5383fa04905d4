//! # Flare Common
//!
//! Common types, utilities, and shared abstractions for the Flare particle
//! renderer.
//!
//! This crate provides foundational types used across all Flare crates:
//! - ID types (EmitterInstanceId, ViewId, MaterialProxyId, etc.)
//! - Version information and magic bytes for replay captures
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod ids;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::version::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitter_instance_id_generation() {
        let id1 = EmitterInstanceId::new();
        let id2 = EmitterInstanceId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_particle_layout_gates_captures() {
        let layout = SchemaVersion::PARTICLE_LAYOUT;
        assert!(layout.can_read(&SchemaVersion::new(layout.major, layout.minor + 1, 0)));
        assert!(!layout.can_read(&SchemaVersion::new(layout.major + 1, 0, 0)));
    }

    #[test]
    fn test_error_conversion() {
        let err: FlareError = ReplayError::UnsupportedVersion(9).into();
        assert!(err.to_string().contains("Unsupported replay version"));
    }
}

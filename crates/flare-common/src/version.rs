//! Layout versions and magic bytes of replay captures.
//!
//! Captures store raw particle bytes, so a reader has to know both the
//! capture schema and the particle record layout it was written with.

use serde::{Deserialize, Serialize};

/// A `major.minor.patch` layout version.
///
/// Only the major part gates reading: a capture with a different major was
/// written with an incompatible record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Bumped when stored bytes change meaning
    pub major: u16,
    /// Bumped when fields are appended
    pub minor: u16,
    /// Bumped for fixes that leave the layout alone
    pub patch: u16,
}

impl SchemaVersion {
    /// `BaseParticle` and payload struct layout.
    pub const PARTICLE_LAYOUT: Self = Self::new(1, 0, 0);

    /// Replay capture metadata and frame layout.
    pub const REPLAY_CAPTURE: Self = Self::new(1, 0, 0);

    /// Version from its parts.
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self { major, minor, patch }
    }

    /// Whether a reader at this version understands bytes written at `stored`.
    #[must_use]
    pub const fn can_read(&self, stored: &Self) -> bool {
        self.major == stored.major
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Four bytes opening a Flare file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicBytes(pub [u8; 4]);

impl MagicBytes {
    /// Particle replay capture.
    pub const REPLAY: Self = Self(*b"FPRP");

    /// Raw magic.
    #[must_use]
    pub const fn bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Whether `header` starts with these bytes.
    #[must_use]
    pub fn matches(&self, header: &[u8]) -> bool {
        header.starts_with(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display() {
        assert_eq!(SchemaVersion::new(1, 2, 3).to_string(), "1.2.3");
    }

    #[test]
    fn test_can_read_same_major() {
        let current = SchemaVersion::REPLAY_CAPTURE;
        assert!(current.can_read(&SchemaVersion::new(1, 9, 0)));
        assert!(!current.can_read(&SchemaVersion::new(2, 0, 0)));
    }

    #[test]
    fn test_replay_magic() {
        assert_eq!(MagicBytes::REPLAY.bytes(), b"FPRP");
        assert!(MagicBytes::REPLAY.matches(b"FPRP\x01\x00"));
        assert!(!MagicBytes::REPLAY.matches(b"FPR"));
        assert!(!MagicBytes::REPLAY.matches(b"GNSV"));
    }
}

//! Replay capture files.
//!
//! A capture holds the emitter snapshots of consecutive frames so packers
//! can be run offline against recorded simulation output.
//!
//! File layout:
//!
//! ```text
//! [magic "FPRP"] [version: u32 LE] [payload length: u64 LE] [bincode payload]
//! ```

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use flare_common::{MagicBytes, ReplayError, SchemaVersion};

use crate::replay::EmitterReplay;

/// Container format version written by this build.
pub const REPLAY_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8;

/// Describes where a capture came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayMetadata {
    /// Capture schema
    pub schema: SchemaVersion,
    /// Particle record layout of the raw particle bytes
    pub particle_layout: SchemaVersion,
    /// Free-form label
    pub label: String,
}

impl Default for ReplayMetadata {
    fn default() -> Self {
        Self {
            schema: SchemaVersion::REPLAY_CAPTURE,
            particle_layout: SchemaVersion::PARTICLE_LAYOUT,
            label: String::new(),
        }
    }
}

/// Snapshots of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Frame number
    pub frame: u64,
    /// One snapshot per emitter
    pub emitters: Vec<EmitterReplay>,
}

/// A recorded sequence of frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayCapture {
    /// Capture description
    pub metadata: ReplayMetadata,
    /// Recorded frames, in order
    pub frames: Vec<ReplayFrame>,
}

impl ReplayCapture {
    /// Empty capture with the given label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            metadata: ReplayMetadata {
                label: label.into(),
                ..ReplayMetadata::default()
            },
            frames: Vec::new(),
        }
    }

    /// Appends a frame.
    pub fn push_frame(&mut self, frame: u64, emitters: Vec<EmitterReplay>) {
        self.frames.push(ReplayFrame { frame, emitters });
    }

    /// Total emitter snapshots across all frames.
    #[must_use]
    pub fn emitter_count(&self) -> usize {
        self.frames.iter().map(|f| f.emitters.len()).sum()
    }

    /// Writes the capture to `writer`.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<(), ReplayError> {
        let payload = bincode::serialize(self)?;
        writer.write_all(MagicBytes::REPLAY.bytes())?;
        writer.write_all(&REPLAY_FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a capture from `reader`.
    pub fn load<R: Read>(mut reader: R) -> Result<Self, ReplayError> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ReplayError::InvalidFormat("truncated header".to_string()),
            _ => ReplayError::Io(e),
        })?;

        let (magic, rest) = header.split_at(4);
        if !MagicBytes::REPLAY.matches(magic) {
            return Err(ReplayError::InvalidFormat(format!("bad magic {magic:02x?}")));
        }
        let (version, length) = rest.split_at(4);
        let version = u32::from_le_bytes([version[0], version[1], version[2], version[3]]);
        if version > REPLAY_FORMAT_VERSION {
            return Err(ReplayError::UnsupportedVersion(version));
        }
        let mut length_bytes = [0u8; 8];
        length_bytes.copy_from_slice(length);
        let length = u64::from_le_bytes(length_bytes);

        let mut payload = Vec::new();
        reader.take(length).read_to_end(&mut payload)?;
        if payload.len() as u64 != length {
            return Err(ReplayError::InvalidFormat(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                length
            )));
        }

        let capture: Self = bincode::deserialize(&payload)?;
        if !SchemaVersion::PARTICLE_LAYOUT.can_read(&capture.metadata.particle_layout) {
            return Err(ReplayError::InvalidFormat(format!(
                "particle layout {} is not readable by {}",
                capture.metadata.particle_layout,
                SchemaVersion::PARTICLE_LAYOUT
            )));
        }
        debug!(
            "Loaded replay '{}': {} frames, {} emitters",
            capture.metadata.label,
            capture.frames.len(),
            capture.emitter_count()
        );
        Ok(capture)
    }

    /// Writes the capture to `path` through a temporary file and a rename.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), ReplayError> {
        let path = path.as_ref();
        let temp = path.with_extension("tmp");
        let mut file = fs::File::create(&temp)?;
        self.save(&mut file)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, path)?;
        info!("Saved replay with {} frames to {}", self.frames.len(), path.display());
        Ok(())
    }

    /// Reads a capture from `path`.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let file = fs::File::open(path.as_ref())?;
        Self::load(io::BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{BaseParticle, ParticleBuffer};
    use crate::replay::{BeamReplay, EmitterKind, ReplayBase, SpriteReplay};
    use glam::Vec3;

    fn sample_capture() -> ReplayCapture {
        let mut buffer = ParticleBuffer::new(4, 0).expect("valid capacity");
        buffer.spawn(BaseParticle::at(Vec3::new(1.0, 2.0, 3.0)).with_size(Vec3::splat(10.0))).expect("room");
        buffer.spawn(BaseParticle::at(Vec3::ZERO)).expect("room");
        let sprite = SpriteReplay::from_buffer(EmitterKind::Sprite, &buffer);
        let beam = BeamReplay {
            base: ReplayBase::from_buffer(EmitterKind::Beam, &buffer),
            ..BeamReplay::default()
        };

        let mut capture = ReplayCapture::new("unit");
        capture.push_frame(7, vec![EmitterReplay::Sprite(sprite.clone())]);
        capture.push_frame(8, vec![EmitterReplay::Sprite(sprite), EmitterReplay::Beam(beam)]);
        capture
    }

    #[test]
    fn test_save_load_in_memory() {
        let capture = sample_capture();
        let mut bytes = Vec::new();
        capture.save(&mut bytes).expect("save");

        assert_eq!(&bytes[0..4], b"FPRP");
        assert_eq!(&bytes[4..8], &REPLAY_FORMAT_VERSION.to_le_bytes());
        let length = u64::from_le_bytes(bytes[8..16].try_into().expect("8 bytes"));
        assert_eq!(length as usize, bytes.len() - HEADER_LEN);

        let loaded = ReplayCapture::load(bytes.as_slice()).expect("load");
        assert_eq!(loaded, capture);
        assert_eq!(loaded.emitter_count(), 3);
        assert_eq!(loaded.frames[1].frame, 8);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = Vec::new();
        sample_capture().save(&mut bytes).expect("save");
        bytes[0] = b'X';
        let err = ReplayCapture::load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidFormat(_)));
    }

    #[test]
    fn test_rejects_newer_version() {
        let mut bytes = Vec::new();
        sample_capture().save(&mut bytes).expect("save");
        bytes[4..8].copy_from_slice(&(REPLAY_FORMAT_VERSION + 1).to_le_bytes());
        let err = ReplayCapture::load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ReplayError::UnsupportedVersion(v) if v == REPLAY_FORMAT_VERSION + 1));
    }

    #[test]
    fn test_rejects_truncated_input() {
        let mut bytes = Vec::new();
        sample_capture().save(&mut bytes).expect("save");

        let err = ReplayCapture::load(&bytes[..10]).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidFormat(_)));

        let err = ReplayCapture::load(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidFormat(_)));
    }

    #[test]
    fn test_rejects_incompatible_particle_layout() {
        let mut capture = sample_capture();
        capture.metadata.particle_layout = SchemaVersion::new(SchemaVersion::PARTICLE_LAYOUT.major + 1, 0, 0);
        let mut bytes = Vec::new();
        capture.save(&mut bytes).expect("save");
        let err = ReplayCapture::load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, ReplayError::InvalidFormat(_)));
    }

    #[test]
    fn test_save_load_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("capture.fprp");
        let capture = sample_capture();
        capture.save_to_path(&path).expect("save");
        assert!(!path.with_extension("tmp").exists());

        let loaded = ReplayCapture::load_from_path(&path).expect("load");
        assert_eq!(loaded, capture);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = ReplayCapture::load_from_path(dir.path().join("missing.fprp")).unwrap_err();
        assert!(matches!(err, ReplayError::Io(_)));
    }
}

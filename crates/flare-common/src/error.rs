//! Error types for Flare.

use thiserror::Error;

/// Top-level error type for Flare operations.
#[derive(Debug, Error)]
pub enum FlareError {
    /// Render-core errors
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Replay capture errors
    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised inside the particle render core.
///
/// None of these cross the fill-worker boundary; packers log and clamp
/// instead. They surface only from setup and pool APIs.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A payload read fell outside the particle stride
    #[error("Payload at offset {offset} (+{size} bytes) exceeds stride {stride}")]
    PayloadOutOfBounds {
        /// Byte offset of the payload
        offset: usize,
        /// Size of the payload type
        size: usize,
        /// Particle stride
        stride: usize,
    },

    /// Index data would exceed the 16-bit index range
    #[error("Index overflow: {requested} vertices requested, limit {limit}")]
    IndexOverflow {
        /// Vertex count that was requested
        requested: usize,
        /// Maximum addressable vertex count
        limit: usize,
    },

    /// A synchronous-only path was asked for a worker pool
    #[error("Fill worker pool has no workers")]
    NoWorkers,

    /// Every fill slot of the worker pool is taken
    #[error("Fill queue is full ({0} jobs in flight)")]
    FillQueueFull(usize),

    /// The fill worker pool could not be started
    #[error("Fill worker pool failed to start: {0}")]
    WorkerPool(String),

    /// A vertex factory handle was released that is not checked out
    #[error("Vertex factory {0} is not in use")]
    VertexFactoryNotInUse(u32),

    /// Particle pool capacity is outside the supported range
    #[error("Invalid particle capacity: {0}")]
    InvalidCapacity(usize),
}

/// Replay capture errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Invalid file format (bad magic or truncated header)
    #[error("Invalid replay format: {0}")]
    InvalidFormat(String),

    /// Capture written by a newer format version
    #[error("Unsupported replay version: {0}")]
    UnsupportedVersion(u32),

    /// Payload encode/decode failure
    #[error("Replay serialization failed: {0}")]
    Serialization(String),

    /// IO failure while reading or writing a capture
    #[error("Replay IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for ReplayError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Flare operations.
pub type FlareResult<T> = Result<T, FlareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_display() {
        let err = RenderError::PayloadOutOfBounds {
            offset: 112,
            size: 28,
            stride: 128,
        };
        assert_eq!(
            err.to_string(),
            "Payload at offset 112 (+28 bytes) exceeds stride 128"
        );
    }

    #[test]
    fn test_io_error_wraps() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FlareError = io.into();
        assert!(matches!(err, FlareError::Io(_)));
    }
}

//! Error types for counting runs.

use thiserror::Error;

/// Result type for counting operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running the counting pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed run parameters. Always fatal, raised before any frame is processed.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A frame did not match the shape the run was configured with.
    #[error("Frame {index} is {actual:?} (height, width), expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A count was handed to the accumulator out of frame order.
    #[error("Count for frame {index} pushed out of order, expected frame {expected}")]
    OutOfOrder { index: usize, expected: usize },

    /// A single frame's detector failed.
    #[error("Detection failed: {0}")]
    Detection(String),

    /// A checkpoint record could not be written. The counts stay buffered.
    #[error("Failed to persist checkpoint ending at frame {index}: {source}")]
    Persistence {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// The frame source is malformed.
    #[error("Invalid frame stream: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a per-frame detection failure.
    pub fn detection(message: impl Into<String>) -> Self {
        Self::Detection(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn external_errors_are_transparent() {
        let err: Error = anyhow!("cascade model missing").into();

        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.to_string(), "cascade model missing");
    }

    #[test]
    fn persistence_errors_keep_their_source() {
        let err = Error::Persistence {
            index: 499,
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };

        assert_eq!(
            err.to_string(),
            "Failed to persist checkpoint ending at frame 499: disk full"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}

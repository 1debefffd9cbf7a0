//! Error types for grid model construction and weight I/O.

use std::path::PathBuf;

use thiserror::Error;

use crate::npy::NpyError;

/// Result type for grid model operations.
pub type GridResult<T> = Result<T, GridError>;

/// Errors that can occur while building, loading or saving a grid model.
#[derive(Debug, Error)]
pub enum GridError {
    /// A weight file could not be opened, read or written
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A weight file is not a usable `.npy` array
    #[error("Invalid array file {}: {source}", path.display())]
    Npy {
        path: PathBuf,
        #[source]
        source: NpyError,
    },

    /// A stored array does not fit the parameter it is assigned to
    #[error("Shape mismatch for {name}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GridError {
    /// Create an IO error tagged with the offending path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(name: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            name: name.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this error was caused by a missing file
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

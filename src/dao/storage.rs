//! Storage error types shared by the snapshot store.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by the snapshot store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem-level failure while reading or writing a snapshot.
    #[error("storage i/o error on {path}: {source}")]
    Io {
        /// Path being accessed when the failure occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A snapshot file exists but cannot be decoded. Fatal at boot: starting
    /// from an empty room while a prior snapshot exists would silently lose
    /// the auction.
    #[error("corrupt snapshot at {path}: {source}")]
    Corrupt {
        /// Path of the undecodable snapshot.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Wrap an I/O failure with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

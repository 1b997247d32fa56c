use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage root is missing or is not a directory. Fatal for a session.
    #[error("storage root {0} cannot be mounted")]
    Mount(PathBuf),

    /// Identifier does not name a top-level file on storage.
    #[error("invalid storage identifier: {0}")]
    BadIdentifier(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a single image could not be turned into a [`crate::processing::decode::DecodedImage`].
///
/// Every variant is a transient skip for the slideshow: the previous frame
/// stays on the panel.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot open {identifier}: {source}")]
    Open {
        identifier: String,
        #[source]
        source: StorageError,
    },

    #[error("decoder rejected stream: {0}")]
    Rejected(String),

    #[error("unsupported pixel format {0}")]
    Unsupported(String),

    #[error("cannot allocate {width}x{height} pixel buffer")]
    Allocation { width: u32, height: u32 },
}

/// A management command that was refused. State is never touched when one
/// of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("sequence mode {0} is out of range (0..=4)")]
    InvalidSequenceMode(i64),

    #[error("brightness {0} is out of range (0..=255)")]
    InvalidBrightness(i64),

    #[error("network name must be between 1 and 32 bytes")]
    EmptySsid,

    #[error("network secret must be empty or between 8 and 63 characters")]
    InvalidSecret,

    #[error("frame is not accepting commands")]
    Unavailable,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

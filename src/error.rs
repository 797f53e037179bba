//! Error types shared by the decode queue and the tile cache.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the public grid API.
///
/// Decode failures are not in here: they never leave the worker thread as
/// errors and show up as a placeholder raster instead.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("tile cache has been shut down")]
    ShutDown,

    #[error("invalid grid layout: {0}")]
    InvalidLayout(String),

    #[error("invalid tile cache config: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single thumbnail could not be produced.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported image type: {0:?}")]
    Unsupported(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{0}")]
    Other(String),
}

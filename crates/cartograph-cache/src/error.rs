//! Error types for the tile cache.

use cartograph_core::TileSpec;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur in the tile cache.
///
/// Most cache failures are handled internally by degrading (a skipped
/// manifest line, a memory-only insert); these variants surface only
/// where the caller has to know, such as cache construction.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache directory could not be created or probed.
    #[error("cache directory unusable: {0}")]
    Directory(String),

    /// Tile bytes could not be decoded into an image.
    #[error("failed to decode tile {spec}: {source}")]
    Decode {
        /// The tile whose bytes were malformed.
        spec: TileSpec,
        /// Underlying decoder error.
        source: image::ImageError,
    },

    /// I/O error while reading or writing tile files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

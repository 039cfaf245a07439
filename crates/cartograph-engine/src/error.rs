//! Error types for the tile engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while assembling or running the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The fetcher worker thread could not be spawned.
    #[error("failed to spawn fetcher thread: {0}")]
    FetcherThread(std::io::Error),

    /// The tile cache could not be constructed.
    #[error("tile cache error: {0}")]
    Cache(#[from] cartograph_cache::CacheError),
}

//! # Cartograph Cache
//!
//! Three-tier raster tile cache: decoded textures closest to the
//! renderer, compressed bytes in memory behind them, and a persistent
//! file cache on disk. All three tiers are cost-bounded queue caches
//! with promotion on hit; the disk tier additionally persists its queue
//! ordering across runs and deletes backing files only under real
//! eviction pressure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entries;
pub mod error;
pub mod file_cache;
pub mod filenames;
pub mod queue_cache;
pub mod texture;

pub use entries::{DiskTile, MemoryTile};
pub use error::{CacheError, Result};
pub use file_cache::{
    CacheAreas, CostStrategy, FileTileCache, FileTileCacheConfig, FileTileCacheStats,
};
pub use filenames::{filename_to_tile_spec, tile_spec_to_filename};
pub use queue_cache::{CacheStats, EvictionPolicy, QueueCache};
pub use texture::TileTexture;

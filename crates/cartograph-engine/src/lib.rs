//! # Cartograph Engine
//!
//! The rendering-independent core of a slippy-map tile engine:
//!
//! - **Visible-tile resolution** ([`CameraTiles`]): frustum
//!   construction, ground-plane footprint, dateline-aware clipping and
//!   polygon rasterization into tile indices
//! - **Request scheduling** ([`TileRequestManager`],
//!   [`MappingEngine`]): per-map bookkeeping, cross-map coalescing,
//!   exponential-backoff retry, in-flight deduplication
//! - **Scene state** ([`TiledMapScene`]): per-tile quad geometry,
//!   camera matrices, dateline wrap replication, over-zoom texture
//!   mapping, screen/mercator projections
//! - **The map facade** ([`TiledMap`]) orchestrating the above
//!
//! Networking and GPU rendering stay outside: plugins implement
//! [`TileFetcher`], renderers walk the [`MapSceneNode`] scene graph.
//!
//! ## Threading
//!
//! Everything except the fetcher is single-threaded: maps, resolvers,
//! scenes and the engine live on the map thread. The fetcher runs on
//! its own thread behind queued channels; results are drained with
//! [`MappingEngine::poll_events`] and routed to the maps by handle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod camera_tiles;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod map;
pub mod request_manager;
pub mod scene;

pub use camera_tiles::CameraTiles;
pub use engine::{EngineEvent, MapHandle, MappingEngine};
pub use error::{EngineError, Result};
pub use fetcher::{FetchCommand, FetchEvent, FetcherEvents, TileFetcher};
pub use map::{PrefetchStyle, TiledMap};
pub use request_manager::TileRequestManager;
pub use scene::{
    ImageQuadNode, MapSceneNode, QuadRect, TextureFiltering, TileContainerNode, TiledMapScene,
};

// The cache and the shared value types are part of this crate's public
// surface; re-export them so integrators depend on one crate.
pub use cartograph_cache;
pub use cartograph_core;

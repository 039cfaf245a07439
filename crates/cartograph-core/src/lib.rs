//! # Cartograph Core
//!
//! Geodetic and tile-addressing primitives shared by the Cartograph tile
//! engine crates:
//!
//! - **Geodetic coordinates** and the Web-Mercator projection
//! - **Tile identity** (`TileSpec`) used as the cache and request key
//! - **Camera state** (`CameraData`) and per-engine limits
//!   (`CameraCapabilities`)
//! - **Map type descriptors** (`MapType`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod camera;
pub mod fuzzy;
pub mod geo;
pub mod map_type;
pub mod tile_spec;

pub use camera::{CameraCapabilities, CameraData};
pub use geo::{coord_to_mercator, mercator_to_coord, GeoCoordinate};
pub use map_type::{MapStyle, MapType};
pub use tile_spec::TileSpec;

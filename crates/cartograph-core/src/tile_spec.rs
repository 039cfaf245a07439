//! Tile identity.

use serde::{Deserialize, Serialize};

/// The identity of one raster tile.
///
/// A spec addresses a tile by provider plugin, map id, zoom level, x/y
/// index and an optional provider version. It is the key of every cache
/// tier and of the request bookkeeping, shared by value and never
/// mutated after construction.
///
/// Ordering is lexicographic over `(plugin, map_id, zoom, x, y,
/// version)`, which keeps tiles of the same plugin and map contiguous
/// when iterating sorted collections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileSpec {
    /// Provider plugin tag. Distinct plugins never share cache entries.
    pub plugin: String,
    /// Map id within the plugin's catalogue.
    pub map_id: i32,
    /// Zoom level; `-1` marks an unset spec.
    pub zoom: i32,
    /// Column index, `0..2^zoom` once normalized to the map.
    pub x: i32,
    /// Row index, `0..2^zoom`.
    pub y: i32,
    /// Provider tile version; `-1` when unversioned.
    pub version: i32,
}

impl TileSpec {
    /// Create an unversioned spec.
    pub fn new(plugin: impl Into<String>, map_id: i32, zoom: i32, x: i32, y: i32) -> Self {
        Self::with_version(plugin, map_id, zoom, x, y, -1)
    }

    /// Create a spec carrying a provider version.
    pub fn with_version(
        plugin: impl Into<String>,
        map_id: i32,
        zoom: i32,
        x: i32,
        y: i32,
        version: i32,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            map_id,
            zoom,
            x,
            y,
            version,
        }
    }

    /// Whether the x/y indices are inside the map for this zoom level.
    pub fn is_normalized(&self) -> bool {
        if self.zoom < 0 {
            return false;
        }
        let side = 1_i64 << self.zoom;
        (0..side).contains(&(self.x as i64)) && (0..side).contains(&(self.y as i64))
    }
}

impl Default for TileSpec {
    fn default() -> Self {
        Self {
            plugin: String::new(),
            map_id: 0,
            zoom: -1,
            x: -1,
            y: -1,
            version: -1,
        }
    }
}

impl std::fmt::Display for TileSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.plugin, self.map_id, self.zoom, self.x, self.y
        )?;
        if self.version != -1 {
            write!(f, " v{}", self.version)?;
        }
        Ok(())
    }
}

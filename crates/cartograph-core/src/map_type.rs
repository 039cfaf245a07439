//! Map type descriptors.

use serde::{Deserialize, Serialize};

/// Broad cartographic style of a map type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapStyle {
    /// No map selected.
    None,
    /// Street-level cartography.
    Street,
    /// Satellite imagery.
    Satellite,
    /// Terrain relief.
    Terrain,
    /// Public-transit overlay cartography.
    Transit,
    /// Provider-specific style outside the common set.
    Custom,
}

/// One entry of a plugin's map-type catalogue.
///
/// Only `map_id` participates in tile identity; the rest is
/// presentation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapType {
    /// Cartographic style.
    pub style: MapStyle,
    /// Short human-readable name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Whether this is a night-mode variant.
    pub night: bool,
    /// Whether this variant targets mobile-optimized tiles.
    pub mobile: bool,
    /// Identifier used in tile addressing.
    pub map_id: i32,
}

impl MapType {
    /// Create a map type.
    pub fn new(
        style: MapStyle,
        name: impl Into<String>,
        description: impl Into<String>,
        night: bool,
        mobile: bool,
        map_id: i32,
    ) -> Self {
        Self {
            style,
            name: name.into(),
            description: description.into(),
            night,
            mobile,
            map_id,
        }
    }
}

impl Default for MapType {
    fn default() -> Self {
        Self {
            style: MapStyle::None,
            name: String::new(),
            description: String::new(),
            night: false,
            mobile: false,
            map_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_map_id_matters_for_addressing() {
        let a = MapType::new(MapStyle::Street, "street", "street map", false, false, 1);
        let b = MapType::new(MapStyle::Satellite, "sat", "satellite map", false, false, 1);
        assert_eq!(a.map_id, b.map_id);
        assert_ne!(a, b);
    }
}

//! Geodetic coordinates and the Web-Mercator projection.
//!
//! Mercator space has both axes in `[0, 1]` at zoom 0: `(0, 0)` is the
//! north-west corner of the map, `(1, 1)` the south-east corner.
//! Latitudes beyond the projection's singularity are clamped to the
//! square.

use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Highest latitude representable in Web Mercator, `atan(sinh(pi))` in
/// degrees.
pub const MERCATOR_MAX_LATITUDE: f64 = 85.05112877980659;

/// A geodetic position in degrees (WGS84, no altitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl GeoCoordinate {
    /// Create a coordinate from degrees.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are inside the valid geodetic range.
    pub fn is_valid(&self) -> bool {
        self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl Default for GeoCoordinate {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl std::fmt::Display for GeoCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Project a geodetic coordinate into `[0, 1]^2` mercator space.
pub fn coord_to_mercator(coord: GeoCoordinate) -> DVec2 {
    let x = coord.longitude / 360.0 + 0.5;

    let lat = coord.latitude;
    let y = 0.5 - ((PI / 4.0 + PI / 2.0 * lat / 180.0).tan().ln() / PI) / 2.0;
    let y = y.clamp(0.0, 1.0);

    DVec2::new(x, y)
}

/// Invert [`coord_to_mercator`]. The x component wraps modulo one map
/// width; y is clamped to the mercator square.
pub fn mercator_to_coord(mercator: DVec2) -> GeoCoordinate {
    let fy = mercator.y.clamp(0.0, 1.0);

    let latitude = if fy == 0.0 {
        90.0
    } else if fy == 1.0 {
        -90.0
    } else {
        (180.0 / PI) * (2.0 * (PI * (1.0 - 2.0 * fy)).exp().atan() - PI / 2.0)
    };

    let fx = mercator.x;
    let wrapped = if fx >= 0.0 {
        fx.rem_euclid(1.0)
    } else {
        (1.0 - (-fx).rem_euclid(1.0)).rem_euclid(1.0)
    };
    let longitude = wrapped * 360.0 - 180.0;

    GeoCoordinate::new(latitude, longitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn null_island_maps_to_center() {
        let m = coord_to_mercator(GeoCoordinate::new(0.0, 0.0));
        assert_relative_eq!(m.x, 0.5);
        assert_relative_eq!(m.y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn mercator_round_trip() {
        let original = GeoCoordinate::new(37.7749, -122.4194);
        let back = mercator_to_coord(coord_to_mercator(original));
        assert_relative_eq!(back.latitude, original.latitude, epsilon = 1e-9);
        assert_relative_eq!(back.longitude, original.longitude, epsilon = 1e-9);
    }

    #[test]
    fn polar_latitudes_clamp_to_square() {
        let north = coord_to_mercator(GeoCoordinate::new(90.0, 0.0));
        assert_eq!(north.y, 0.0);
        let south = coord_to_mercator(GeoCoordinate::new(-90.0, 0.0));
        assert_eq!(south.y, 1.0);

        let limit = coord_to_mercator(GeoCoordinate::new(MERCATOR_MAX_LATITUDE, 0.0));
        assert_relative_eq!(limit.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn dateline_maps_to_edges() {
        let west = coord_to_mercator(GeoCoordinate::new(0.0, -180.0));
        assert_relative_eq!(west.x, 0.0);
        let east = coord_to_mercator(GeoCoordinate::new(0.0, 180.0));
        assert_relative_eq!(east.x, 1.0);
    }

    #[test]
    fn inverse_wraps_x() {
        let c = mercator_to_coord(DVec2::new(1.25, 0.5));
        assert_relative_eq!(c.longitude, -90.0, epsilon = 1e-9);
        let c = mercator_to_coord(DVec2::new(-0.25, 0.5));
        assert_relative_eq!(c.longitude, 90.0, epsilon = 1e-9);
    }
}

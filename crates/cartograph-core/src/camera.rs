//! Virtual camera state and per-engine camera limits.

use crate::geo::GeoCoordinate;
use serde::{Deserialize, Serialize};

/// The virtual camera looking at the map.
///
/// `zoom` is continuous; the integer part selects the tile layer. The
/// angles are degrees: `bearing` rotates the map about the view axis,
/// `tilt` leans the camera towards the horizon, `roll` is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraData {
    /// Geodetic point the camera looks at.
    pub center: GeoCoordinate,
    /// Continuous zoom level.
    pub zoom: f64,
    /// Bearing in degrees, clockwise from north.
    pub bearing: f64,
    /// Tilt in degrees away from straight-down.
    pub tilt: f64,
    /// Roll in degrees about the view axis.
    pub roll: f64,
    /// Vertical field of view in degrees.
    pub field_of_view: f64,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            center: GeoCoordinate::default(),
            zoom: 0.0,
            bearing: 0.0,
            tilt: 0.0,
            roll: 0.0,
            field_of_view: 90.0,
        }
    }
}

/// Immutable description of what an engine's cameras may do.
///
/// Out-of-range camera values are clamped on ingress via [`clamp`].
///
/// [`clamp`]: CameraCapabilities::clamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraCapabilities {
    /// Smallest allowed zoom level.
    pub min_zoom: f64,
    /// Largest allowed zoom level.
    pub max_zoom: f64,
    /// Smallest allowed tilt in degrees.
    pub min_tilt: f64,
    /// Largest allowed tilt in degrees.
    pub max_tilt: f64,
    /// Whether the engine honours a non-zero bearing.
    pub supports_bearing: bool,
    /// Whether the engine honours a non-zero tilt.
    pub supports_tilting: bool,
    /// Whether the engine honours a non-zero roll.
    pub supports_rolling: bool,
    /// Edge length of the engine's tiles in pixels.
    pub tile_size: u32,
}

impl Default for CameraCapabilities {
    fn default() -> Self {
        Self {
            min_zoom: 0.0,
            max_zoom: 20.0,
            min_tilt: 0.0,
            max_tilt: 60.0,
            supports_bearing: true,
            supports_tilting: true,
            supports_rolling: false,
            tile_size: 256,
        }
    }
}

impl CameraCapabilities {
    /// Clamp a camera to these limits, zeroing unsupported angles.
    pub fn clamp(&self, camera: CameraData) -> CameraData {
        let mut cam = camera;
        cam.zoom = cam.zoom.clamp(self.min_zoom, self.max_zoom);

        if self.supports_tilting {
            cam.tilt = cam.tilt.clamp(self.min_tilt, self.max_tilt);
        } else {
            cam.tilt = 0.0;
        }

        if self.supports_bearing {
            cam.bearing = cam.bearing.rem_euclid(360.0);
        } else {
            cam.bearing = 0.0;
        }

        if !self.supports_rolling {
            cam.roll = 0.0;
        }

        cam
    }
}

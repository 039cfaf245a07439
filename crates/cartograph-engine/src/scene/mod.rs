//! Scene state for the tiled map.
//!
//! The scene tracks the visible tile set, the textures delivered for
//! it, the camera expressed in map-edge units, and the screen/mercator
//! conversion factors. From these it maintains a retained scene graph
//! (see [`graph`]) that an external renderer walks: per-tile quads with
//! texture handles and camera matrices, replicated for dateline wrap.
//!
//! Distances here are map-edge units: one tile edge is
//! `scale factor * tile size` units, which keeps coordinate magnitudes
//! sensible for rendering regardless of zoom level.

mod graph;

pub use graph::{ImageQuadNode, MapSceneNode, QuadRect, TextureFiltering, TileContainerNode};

use cartograph_cache::TileTexture;
use cartograph_core::fuzzy::fuzzy_compare;
use cartograph_core::{coord_to_mercator, CameraData, TileSpec};
use glam::{DMat4, DVec2, DVec3, DVec4};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Map-edge units per tile-unit; keeps render-space coordinates in a
/// sensible range without changing what is visible.
const SCALE_FACTOR: f64 = 10.0;

/// Scene state: visible tiles, their textures, and the render camera.
pub struct TiledMapScene {
    screen_size: (u32, u32),
    tile_size: u32,
    camera: CameraData,
    visible_tiles: BTreeSet<TileSpec>,

    textures: HashMap<TileSpec, Arc<TileTexture>>,
    updated_textures: Vec<TileSpec>,

    int_zoom_level: i32,
    side_length: i32,
    map_edge_size: f64,
    linear_scaling: bool,

    min_tile_x: i32,
    min_tile_y: i32,
    max_tile_x: i32,
    max_tile_y: i32,
    tile_x_wraps_below: i32,

    camera_up: DVec3,
    camera_eye: DVec3,
    camera_center: DVec3,
    projection: DMat4,

    mercator_center_x: f64,
    mercator_center_y: f64,
    mercator_width: f64,
    mercator_height: f64,
    screen_offset_x: f64,
    screen_offset_y: f64,
    screen_width: f64,
    screen_height: f64,

    drop_textures: bool,
}

impl Default for TiledMapScene {
    fn default() -> Self {
        Self::new()
    }
}

impl TiledMapScene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self {
            screen_size: (0, 0),
            tile_size: 0,
            camera: CameraData::default(),
            visible_tiles: BTreeSet::new(),
            textures: HashMap::new(),
            updated_textures: Vec::new(),
            int_zoom_level: 0,
            side_length: 0,
            map_edge_size: 0.0,
            linear_scaling: false,
            min_tile_x: -1,
            min_tile_y: -1,
            max_tile_x: -1,
            max_tile_y: -1,
            tile_x_wraps_below: 0,
            camera_up: DVec3::ZERO,
            camera_eye: DVec3::ZERO,
            camera_center: DVec3::ZERO,
            projection: DMat4::IDENTITY,
            mercator_center_x: 0.0,
            mercator_center_y: 0.0,
            mercator_width: 0.0,
            mercator_height: 0.0,
            screen_offset_x: 0.0,
            screen_offset_y: 0.0,
            screen_width: 0.0,
            screen_height: 0.0,
            drop_textures: false,
        }
    }

    /// Set the viewport size in pixels.
    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.screen_size = (width, height);
    }

    /// Set the tile edge length in pixels.
    pub fn set_tile_size(&mut self, tile_size: u32) {
        if self.tile_size == tile_size {
            return;
        }
        self.tile_size = tile_size;
        self.update_scene_parameters();
    }

    /// Set the camera.
    pub fn set_camera_data(&mut self, camera: CameraData) {
        self.camera = camera;
        self.update_scene_parameters();
    }

    fn update_scene_parameters(&mut self) {
        self.int_zoom_level = self.camera.zoom.floor() as i32;
        let delta = self.camera.zoom - f64::from(self.int_zoom_level);
        self.linear_scaling = delta.abs() > 0.05 || self.is_tilted_or_rotated();
        self.side_length = 1 << self.int_zoom_level;
        self.map_edge_size = 2f64.powf(self.camera.zoom) * f64::from(self.tile_size);
    }

    pub(crate) fn is_tilted_or_rotated(&self) -> bool {
        self.camera.tilt > 0.0 || self.camera.bearing > 0.0
    }

    /// Replace the visible set: recompute tile bounds, rebuild the
    /// camera, and drop textures of tiles that left the set.
    pub fn set_visible_tiles(&mut self, tiles: BTreeSet<TileSpec>) {
        self.update_tile_bounds(&tiles);
        self.setup_camera();

        for old in self.visible_tiles.difference(&tiles) {
            self.textures.remove(old);
        }
        self.visible_tiles = tiles;
    }

    /// The current visible set.
    pub fn visible_tiles(&self) -> &BTreeSet<TileSpec> {
        &self.visible_tiles
    }

    /// Hand a texture to the scene. Ignored unless the spec is
    /// currently visible. When the texture replaces a coarser
    /// over-zoom placeholder, the stale quad is queued for replacement
    /// at the next scene-graph update.
    pub fn add_tile(&mut self, spec: TileSpec, texture: Arc<TileTexture>) {
        if !self.visible_tiles.contains(&spec) {
            return;
        }
        if let Some(previous) = self.textures.get(&spec) {
            if previous.spec.zoom < spec.zoom {
                self.updated_textures.push(spec.clone());
            }
        }
        self.textures.insert(spec, texture);
    }

    /// The specs of the textures the scene holds. Over-zoom
    /// placeholders report the coarse texture's own spec, so their
    /// fine-level tiles still count as untextured.
    pub fn textured_tiles(&self) -> BTreeSet<TileSpec> {
        self.textures.values().map(|t| t.spec.clone()).collect()
    }

    /// Drop every texture; the next scene-graph update clears all
    /// quads.
    pub fn clear_textured_tiles(&mut self) {
        self.textures.clear();
        self.drop_textures = true;
    }

    /// The texture currently standing in for `spec`, if any. The
    /// returned texture's own spec may be coarser when over-zooming.
    pub fn texture_for(&self, spec: &TileSpec) -> Option<&Arc<TileTexture>> {
        self.textures.get(spec)
    }

    /// Convert a viewport position in pixels to normalized mercator.
    pub fn item_position_to_mercator(&self, pos: DVec2) -> DVec2 {
        let side = f64::from(self.side_length);

        let mut x =
            self.mercator_width * (((pos.x - self.screen_offset_x) / self.screen_width) - 0.5);
        x += self.mercator_center_x;
        if x > side {
            x -= side;
        }
        if x < 0.0 {
            x += side;
        }
        x /= side;

        let mut y =
            self.mercator_height * (((pos.y - self.screen_offset_y) / self.screen_height) - 0.5);
        y += self.mercator_center_y;
        y /= side;

        DVec2::new(x, y)
    }

    /// Convert normalized mercator to a viewport position in pixels,
    /// choosing the wrap copy closest to the screen so items crossing
    /// the dateline land on the correct side.
    pub fn mercator_to_item_position(&self, mercator: DVec2) -> DVec2 {
        let side = f64::from(self.side_length);
        let mx = side * mercator.x;

        let mut lb = self.mercator_center_x - self.mercator_width / 2.0;
        if lb < 0.0 {
            lb += side;
        }
        let mut ub = self.mercator_center_x + self.mercator_width / 2.0;
        if side < ub {
            ub -= side;
        }

        let mut m = (mx - self.mercator_center_x) / self.mercator_width;

        let m_wrap_lower = (mx - self.mercator_center_x - side) / self.mercator_width;
        let m_wrap_upper = (mx - self.mercator_center_x + side) / self.mercator_width;

        // the viewport straddles the dateline when the span wraps
        if fuzzy_compare(ub - lb + 1.0, 1.0) || ub < lb {
            if self.mercator_center_x < ub {
                if lb < mx {
                    m = m_wrap_lower;
                }
            } else if lb < self.mercator_center_x && mx <= ub {
                m = m_wrap_upper;
            }
        }

        // shortest wrap wins, keeping positions near the screen
        if m_wrap_lower.abs() < m.abs() {
            m = m_wrap_lower;
        }
        if m_wrap_upper.abs() < m.abs() {
            m = m_wrap_upper;
        }

        let x = self.screen_width * (0.5 + m);
        let y = self.screen_height
            * (0.5 + (side * mercator.y - self.mercator_center_y) / self.mercator_height);

        DVec2::new(x + self.screen_offset_x, y + self.screen_offset_y)
    }

    /// Work out the tile index bounds, wrapping the x of tiles in the
    /// left half of the map when the set crosses the dateline (a gap
    /// in the middle columns is the tell).
    fn update_tile_bounds(&mut self, tiles: &BTreeSet<TileSpec>) {
        if tiles.is_empty() {
            self.min_tile_x = -1;
            self.min_tile_y = -1;
            self.max_tile_x = -1;
            self.max_tile_y = -1;
            return;
        }

        let mut has_far_left = false;
        let mut has_far_right = false;
        let mut has_mid_left = false;
        let mut has_mid_right = false;

        for tile in tiles {
            if tile.zoom != self.int_zoom_level {
                continue;
            }
            let x = tile.x;
            if x == 0 {
                has_far_left = true;
            } else if x == self.side_length - 1 {
                has_far_right = true;
            } else if x == (self.side_length / 2) - 1 {
                has_mid_left = true;
            } else if x == self.side_length / 2 {
                has_mid_right = true;
            }
        }

        self.tile_x_wraps_below = 0;
        if has_far_left && has_far_right {
            if !has_mid_right {
                self.tile_x_wraps_below = self.side_length / 2;
            } else if !has_mid_left {
                self.tile_x_wraps_below = (self.side_length / 2) - 1;
            }
        }

        let mut bounds: Option<(i32, i32, i32, i32)> = None;
        for tile in tiles {
            if tile.zoom != self.int_zoom_level {
                continue;
            }
            let mut x = tile.x;
            if tile.x < self.tile_x_wraps_below {
                x += self.side_length;
            }
            bounds = Some(match bounds {
                None => (x, x, tile.y, tile.y),
                Some((min_x, max_x, min_y, max_y)) => (
                    min_x.min(x),
                    max_x.max(x),
                    min_y.min(tile.y),
                    max_y.max(tile.y),
                ),
            });
        }

        if let Some((min_x, max_x, min_y, max_y)) = bounds {
            self.min_tile_x = min_x;
            self.max_tile_x = max_x;
            self.min_tile_y = min_y;
            self.max_tile_y = max_y;
        }
    }

    /// Rebuild the render camera and the screen/mercator conversion
    /// factors for the current bounds.
    fn setup_camera(&mut self) {
        if self.screen_size.1 == 0 || self.tile_size == 0 {
            return;
        }

        let side = f64::from(self.side_length);
        let width = f64::from(self.screen_size.0);
        let height = f64::from(self.screen_size.1);

        // WebMercator is a square projection, so the vertical extent
        // alone fixes the altitude.
        let f = height;
        let z = 2f64.powf(self.camera.zoom - f64::from(self.int_zoom_level))
            * f64::from(self.tile_size);
        let altitude = f / (2.0 * z);

        self.mercator_height = height / z;
        self.mercator_width = width / z;

        let edge = SCALE_FACTOR * f64::from(self.tile_size);

        // camera center in map space, in the range 0 to side length
        let merc = coord_to_mercator(self.camera.center);
        let mut center = side * DVec3::new(merc.x, merc.y, 0.0);

        // wrap the center if necessary (dateline crossing)
        if center.x < f64::from(self.tile_x_wraps_below) {
            center.x += side;
        }

        self.mercator_center_x = center.x;
        self.mercator_center_y = center.y;

        // center w.r.t. the minimum tile bounds
        center.x -= f64::from(self.min_tile_x);
        center.y = f64::from(self.min_tile_y) - center.y;

        // letter box vertically
        if self.mercator_height > side {
            center.y = -side / 2.0;
            self.mercator_center_y = side / 2.0;
            self.screen_offset_y = height * (0.5 - side / (2.0 * self.mercator_height));
            self.screen_height = height - 2.0 * self.screen_offset_y;
            self.mercator_height = side;
        } else {
            self.screen_offset_y = 0.0;
            self.screen_height = height;
        }

        // and horizontally, when more than one map copy fits
        if self.mercator_width > side {
            self.screen_offset_x = width * (0.5 - side / (2.0 * self.mercator_width));
            self.screen_width = width - 2.0 * self.screen_offset_x;
            self.mercator_width = side;
        } else {
            self.screen_offset_x = 0.0;
            self.screen_width = width;
        }

        let center = center * edge;

        let aperture = if self.camera.field_of_view == 90.0 {
            1.0
        } else {
            (self.camera.field_of_view.to_radians() * 0.5).tan()
        };

        let mut eye = center;
        eye.z = altitude * edge / aperture;

        let view = eye - center;
        let side_vec = view.cross(DVec3::Y).normalize();
        let mut up = side_vec.cross(view).normalize();

        // map north goes in the bearing direction
        let bearing_rot =
            glam::DQuat::from_axis_angle(view.normalize(), (-self.camera.bearing).to_radians());
        up = bearing_rot * up;

        let side2 = up.cross(view).normalize();
        if self.camera.tilt > 0.01 {
            let tilt_rot = glam::DQuat::from_axis_angle(side2, self.camera.tilt.to_radians());
            eye = tilt_rot * view + center;
        }

        let view = (eye - center).normalize();
        let up = view.cross(side2).normalize();

        let near_plane = 1.0;
        // Deliberately loose: exact clipping already happened during
        // visible-tile resolution.
        let far_plane = (altitude + 10000.0) * edge;

        self.camera_up = up;
        self.camera_center = center;
        self.camera_eye = eye;

        let aspect_ratio = width / height;
        let half_width = aperture * aspect_ratio;
        let half_height = aperture;

        self.projection = frustum_matrix(
            -half_width,
            half_width,
            -half_height,
            half_height,
            near_plane,
            far_plane,
        );
    }

    /// Quad geometry for one visible tile: the target rect in map-edge
    /// units, the source rect in texture pixels, and whether the
    /// texture is a coarser over-zoom stand-in. `None` when the spec
    /// is outside the current bounds or zoom layer.
    pub(crate) fn build_geometry(
        &self,
        spec: &TileSpec,
        texture: &TileTexture,
    ) -> Option<(QuadRect, QuadRect, bool)> {
        let mut x = spec.x;
        if x < self.tile_x_wraps_below {
            x += self.side_length;
        }

        if x < self.min_tile_x
            || self.max_tile_x < x
            || spec.y < self.min_tile_y
            || self.max_tile_y < spec.y
            || spec.zoom != self.int_zoom_level
        {
            return None;
        }

        let edge = SCALE_FACTOR * f64::from(self.tile_size);

        let x1 = f64::from(x - self.min_tile_x) * edge;
        let x2 = x1 + edge;
        let y1 = f64::from(self.min_tile_y - spec.y) * edge;
        let y2 = y1 - edge;

        let rect = QuadRect {
            p1: DVec2::new(x1, y2),
            p2: DVec2::new(x2, y1),
        };

        // texture mapping, in case a lower zoom level tile stands in
        let (source, overzoom) = if texture.spec.zoom < spec.zoom {
            let tiles_per_texture = 1 << (spec.zoom - texture.spec.zoom);
            let mapped = f64::from(texture.width() / tiles_per_texture as u32);
            let sx = f64::from(spec.x % tiles_per_texture) * mapped;
            let sy = f64::from(spec.y % tiles_per_texture) * mapped;
            (
                QuadRect {
                    p1: DVec2::new(sx, sy),
                    p2: DVec2::new(sx + mapped, sy + mapped),
                },
                true,
            )
        } else {
            (
                QuadRect {
                    p1: DVec2::ZERO,
                    p2: DVec2::new(
                        f64::from(texture.width()),
                        f64::from(texture.image.height()),
                    ),
                },
                false,
            )
        };

        Some((rect, source, overzoom))
    }

}

/// Off-axis perspective projection, the classic `glFrustum` matrix.
fn frustum_matrix(left: f64, right: f64, bottom: f64, top: f64, near: f64, far: f64) -> DMat4 {
    let a = (right + left) / (right - left);
    let b = (top + bottom) / (top - bottom);
    let c = -(far + near) / (far - near);
    let d = -(2.0 * far * near) / (far - near);

    DMat4::from_cols(
        DVec4::new(2.0 * near / (right - left), 0.0, 0.0, 0.0),
        DVec4::new(0.0, 2.0 * near / (top - bottom), 0.0, 0.0),
        DVec4::new(a, b, c, -1.0),
        DVec4::new(0.0, 0.0, d, 0.0),
    )
}

pub(crate) fn project_point(matrix: &DMat4, point: DVec2) -> DVec2 {
    let v = *matrix * DVec4::new(point.x, point.y, 0.0, 1.0);
    DVec2::new(v.x / v.w, v.y / v.w)
}

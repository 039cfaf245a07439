//! Visible-tile resolution.
//!
//! Given the camera, the viewport and the tile size, [`CameraTiles`]
//! produces the exact set of tiles on screen at the camera's integer
//! zoom level: build the view frustum, intersect it with the ground
//! plane, clip the footprint to the map (splitting at the dateline),
//! and rasterize each resulting polygon into tile indices.
//!
//! The resolver is pure: invalid input (a zero viewport) yields the
//! empty set. Identity inputs (plugin, map id, map version) are tracked
//! separately from geometry inputs so that changing them rewrites the
//! existing set without re-running the geometry pipeline.

mod clip;

use self::clip::{clip_footprint_to_map, Polygon};
use cartograph_core::fuzzy::fuzzy_compare;
use cartograph_core::{coord_to_mercator, CameraData, MapType, TileSpec};
use glam::{DQuat, DVec3};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// The apex and far-plane corners of the view frustum, in map-tile
/// units. The footprint needs nothing of the near plane: every ground
/// intersection runs from the apex (or along the far rectangle).
#[derive(Debug, Clone, Copy)]
struct Frustum {
    apex: DVec3,
    top_left_far: DVec3,
    top_right_far: DVec3,
    bottom_left_far: DVec3,
    bottom_right_far: DVec3,
}

/// Resolves the visible tile set for the current camera and viewport.
pub struct CameraTiles {
    plugin: String,
    map_type: MapType,
    map_version: i32,
    camera: CameraData,
    screen_size: (u32, u32),
    tile_size: u32,
    view_expansion: f64,
    int_zoom_level: i32,
    side_length: i32,
    tiles: BTreeSet<TileSpec>,
    dirty_geometry: bool,
    dirty_metadata: bool,
}

impl Default for CameraTiles {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraTiles {
    /// Create a resolver with no camera set.
    pub fn new() -> Self {
        Self {
            plugin: String::new(),
            map_type: MapType::default(),
            map_version: -1,
            camera: CameraData::default(),
            screen_size: (0, 0),
            tile_size: 0,
            view_expansion: 1.0,
            int_zoom_level: 0,
            side_length: 1,
            tiles: BTreeSet::new(),
            dirty_geometry: false,
            dirty_metadata: false,
        }
    }

    /// Set the camera. Marks the geometry dirty.
    pub fn set_camera_data(&mut self, camera: CameraData) {
        if self.camera == camera {
            return;
        }
        self.dirty_geometry = true;
        self.camera = camera;
        self.int_zoom_level = camera.zoom.floor() as i32;
        self.side_length = 1 << self.int_zoom_level;
    }

    /// The camera last set.
    pub fn camera_data(&self) -> CameraData {
        self.camera
    }

    /// Set the viewport size in pixels. Marks the geometry dirty.
    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        if self.screen_size == (width, height) {
            return;
        }
        self.dirty_geometry = true;
        self.screen_size = (width, height);
    }

    /// Set the provider plugin tag. Marks the metadata dirty.
    pub fn set_plugin(&mut self, plugin: impl Into<String>) {
        let plugin = plugin.into();
        if self.plugin == plugin {
            return;
        }
        self.dirty_metadata = true;
        self.plugin = plugin;
    }

    /// Set the active map type. Marks the metadata dirty.
    pub fn set_map_type(&mut self, map_type: MapType) {
        if self.map_type == map_type {
            return;
        }
        self.dirty_metadata = true;
        self.map_type = map_type;
    }

    /// The active map type.
    pub fn active_map_type(&self) -> &MapType {
        &self.map_type
    }

    /// Set the provider tile version. Marks the metadata dirty.
    pub fn set_map_version(&mut self, map_version: i32) {
        if self.map_version == map_version {
            return;
        }
        self.dirty_metadata = true;
        self.map_version = map_version;
    }

    /// Set the tile edge length in pixels. Marks the geometry dirty.
    pub fn set_tile_size(&mut self, tile_size: u32) {
        if self.tile_size == tile_size {
            return;
        }
        self.dirty_geometry = true;
        self.tile_size = tile_size;
    }

    /// The tile edge length in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Scale the selection frustum; values above 1.0 pre-fetch a ring
    /// of tiles around the actual view.
    pub fn set_view_expansion(&mut self, view_expansion: f64) {
        self.view_expansion = view_expansion;
        self.dirty_geometry = true;
    }

    /// The visible tile set, recomputed lazily after any dirty setter.
    pub fn visible_tiles(&mut self) -> &BTreeSet<TileSpec> {
        if self.dirty_geometry {
            self.tiles.clear();
            self.update_geometry();
            self.dirty_geometry = false;
        }
        if self.dirty_metadata {
            self.update_metadata();
            self.dirty_metadata = false;
        }
        &self.tiles
    }

    fn update_metadata(&mut self) {
        let tiles = std::mem::take(&mut self.tiles);
        self.tiles = tiles
            .into_iter()
            .map(|tile| {
                TileSpec::with_version(
                    self.plugin.clone(),
                    self.map_type.map_id,
                    tile.zoom,
                    tile.x,
                    tile.y,
                    self.map_version,
                )
            })
            .collect();
    }

    fn update_geometry(&mut self) {
        if self.screen_size.0 == 0 || self.screen_size.1 == 0 || self.tile_size == 0 {
            return;
        }

        // The enlarged frustum while stationary is a form of prefetching.
        let frustum = self.create_frustum(self.view_expansion);
        let footprint = frustum_footprint(&frustum);
        let polygons = clip_footprint_to_map(&footprint, self.side_length);

        if !polygons.left.is_empty() {
            let tiles = self.tiles_from_polygon(&polygons.left);
            self.tiles.extend(tiles);
        }
        if !polygons.right.is_empty() {
            let tiles = self.tiles_from_polygon(&polygons.right);
            self.tiles.extend(tiles);
        }
        if !polygons.mid.is_empty() {
            let tiles = self.tiles_from_polygon(&polygons.mid);
            self.tiles.extend(tiles);
        }
    }

    fn create_frustum(&self, view_expansion: f64) -> Frustum {
        let aperture = if self.camera.field_of_view == 90.0 {
            1.0
        } else {
            (self.camera.field_of_view.to_radians() * 0.5).tan()
        };

        let merc = coord_to_mercator(self.camera.center);
        let center = f64::from(self.side_length) * DVec3::new(merc.x, merc.y, 0.0);

        let f = f64::from(self.screen_size.1);
        // between tile_size and 2 * tile_size
        let z = 2f64.powf(self.camera.zoom - f64::from(self.int_zoom_level))
            * f64::from(self.tile_size);
        let altitude = (f / (2.0 * z)) / aperture;

        let mut eye = center;
        eye.z = altitude;

        let view = eye - center;
        let side = view.cross(DVec3::Y).normalize();
        let mut up = side.cross(view).normalize();

        // The rotation direction is the opposite of the scene camera,
        // as this is rotating the map against a fixed view frustum.
        let bearing_rot =
            DQuat::from_axis_angle(view.normalize(), self.camera.bearing.to_radians());
        up = bearing_rot * up;

        // same for tilting
        let side2 = up.cross(view).normalize();
        let tilt_rot = DQuat::from_axis_angle(side2, (-self.camera.tilt).to_radians());
        let eye = tilt_rot * view + center;

        let view = eye - center;
        let up = view.cross(side2).normalize();

        // The far plane bounds how much survives clipping when the map
        // is tilted; the rendering frustum is deliberately looser.
        let far_plane = altitude + 8.0;

        let aspect_ratio = f64::from(self.screen_size.0) / f64::from(self.screen_size.1);

        let expansion = view_expansion * aperture;
        let hhf = expansion * far_plane;
        let hwf = hhf * aspect_ratio;

        let d = (center - eye).normalize();
        let up = up.normalize();
        let right = d.cross(up).normalize();

        let cf = eye + d * far_plane;

        Frustum {
            apex: eye,
            top_left_far: cf - up * hhf - right * hwf,
            top_right_far: cf - up * hhf + right * hwf,
            bottom_left_far: cf + up * hhf - right * hwf,
            bottom_right_far: cf + up * hhf + right * hwf,
        }
    }

    /// Enumerate the tile boundaries an edge endpoint pair crosses,
    /// with the edge-parameter position of each crossing.
    fn tile_intersections(p1: f64, t1: i32, p2: f64, t2: i32) -> VecDeque<(f64, i32)> {
        let mut results = VecDeque::new();
        results.push_back((0.0, t1));

        if t1 == t2 {
            return results;
        }

        let step: i32 = if t1 > t2 { -1 } else { 1 };
        let size = 1 + (t2 - t1) / step;

        if step == 1 {
            for i in 1..size {
                let f = (f64::from(t1 + i) - p1) / (p2 - p1);
                results.push_back((f, t1 + i));
            }
        } else {
            for i in 1..size {
                let f = (f64::from(t1 - i + 1) - p1) / (p2 - p1);
                results.push_back((f, t1 - i));
            }
        }

        results
    }

    fn tiles_from_polygon(&self, polygon: &Polygon) -> BTreeSet<TileSpec> {
        let num_points = polygon.len();
        if num_points == 0 {
            return BTreeSet::new();
        }

        let side = self.side_length;
        let side_f = f64::from(side);

        // grab tiles at the corners of the polygon
        let mut tiles_x = Vec::with_capacity(num_points);
        let mut tiles_y = Vec::with_capacity(num_points);
        for p in polygon {
            let x = if fuzzy_compare(p.x, side_f) {
                side - 1
            } else {
                let mut x = (p.x as i32) % side;
                if !fuzzy_compare(p.x, f64::from(x)) && fuzzy_compare(p.x, f64::from(x + 1)) {
                    x += 1;
                }
                x
            };

            let y = if fuzzy_compare(p.y, side_f) {
                side - 1
            } else {
                let mut y = (p.y as i32) % side;
                if !fuzzy_compare(p.y, f64::from(y)) && fuzzy_compare(p.y, f64::from(y + 1)) {
                    y += 1;
                }
                y
            };

            tiles_x.push(x);
            tiles_y.push(y);
        }

        let mut rows = RowSpans::default();

        // Walk along the polygon edges and add every tile they cover.
        // Where an edge coincides with tile boundaries both sides are
        // grabbed, including tiles whose corners merely touch the
        // polygon's corners.
        for i1 in 0..num_points {
            let i2 = (i1 + 1) % num_points;

            let x1 = polygon[i1].x;
            let x2 = polygon[i2].x;

            let x_fixed = fuzzy_compare(x1, x2);
            let x_integral =
                fuzzy_compare(x1, x1.floor()) || fuzzy_compare(x1 + 1.0, (x1 + 1.0).floor());

            let mut x_intersects = Self::tile_intersections(x1, tiles_x[i1], x2, tiles_x[i2]);

            let y1 = polygon[i1].y;
            let y2 = polygon[i2].y;

            let y_fixed = fuzzy_compare(y1, y2);
            let y_integral =
                fuzzy_compare(y1, y1.floor()) || fuzzy_compare(y1 + 1.0, (y1 + 1.0).floor());

            let mut y_intersects = Self::tile_intersections(y1, tiles_y[i1], y2, tiles_y[i2]);

            let mut x = x_intersects.pop_front().map(|(_, t)| t).unwrap_or(0);
            let mut y = y_intersects.pop_front().map(|(_, t)| t).unwrap_or(0);

            let mut x_other = x;
            let mut y_other = y;

            if x_fixed && x_integral && y2 < y1 {
                x_other = (x - 1).max(0);
            }
            if y_fixed && y_integral && x1 < x2 {
                y_other = (y - 1).max(0);
            }

            if x_integral {
                rows.add(x_other, y);
                if y_integral {
                    rows.add(x_other, y_other);
                }
            }
            if y_integral {
                rows.add(x, y_other);
            }
            rows.add(x, y);

            // corner-coincident tile to the top left
            let i_prev = (i1 + num_points - 1) % num_points;
            let x_previous = polygon[i_prev].x;
            let y_previous = polygon[i_prev].y;
            let x_previous_fixed = fuzzy_compare(x_previous, x1);
            if x_integral && x_previous_fixed && y_integral && y_fixed {
                if x2 > x1 && y_previous > y1 {
                    if x - 1 > 0 && y - 1 > 0 {
                        rows.add(x - 1, y - 1);
                    }
                }
            }

            // simple case: move along the edge adding tiles until both
            // intersection lists are exhausted
            loop {
                let (Some(&next_x), Some(&next_y)) = (x_intersects.front(), y_intersects.front())
                else {
                    break;
                };
                if next_x.0 < next_y.0 {
                    x = next_x.1;
                    rows.add(x, y);
                    x_intersects.pop_front();
                } else if next_x.0 > next_y.0 {
                    y = next_y.1;
                    rows.add(x, y);
                    y_intersects.pop_front();
                } else {
                    rows.add(x, next_y.1);
                    rows.add(next_x.1, y);
                    x = next_x.1;
                    y = next_y.1;
                    rows.add(x, y);
                    x_intersects.pop_front();
                    y_intersects.pop_front();
                }
            }

            while let Some((_, tx)) = x_intersects.pop_front() {
                x = tx;
                rows.add(x, y);
                if y_integral && y_fixed {
                    rows.add(x, y_other);
                }
            }

            while let Some((_, ty)) = y_intersects.pop_front() {
                y = ty;
                rows.add(x, y);
                if x_integral && x_fixed {
                    rows.add(x_other, y);
                }
            }
        }

        let mut results = BTreeSet::new();
        let zoom = self.int_zoom_level;
        for (y, (min_x, max_x)) in rows.data {
            for x in min_x..=max_x {
                results.insert(TileSpec::with_version(
                    self.plugin.clone(),
                    self.map_type.map_id,
                    zoom,
                    x,
                    y,
                    self.map_version,
                ));
            }
        }
        results
    }
}

/// Per-row interval accumulator: row index to inclusive column span.
#[derive(Default)]
struct RowSpans {
    data: BTreeMap<i32, (i32, i32)>,
}

impl RowSpans {
    fn add(&mut self, tile_x: i32, tile_y: i32) {
        self.data
            .entry(tile_y)
            .and_modify(|(min_x, max_x)| {
                *min_x = (*min_x).min(tile_x);
                *max_x = (*max_x).max(tile_x);
            })
            .or_insert((tile_x, tile_x));
    }
}

fn append_z_intersect(start: DVec3, end: DVec3, z: f64, results: &mut Polygon) -> bool {
    if start.z == end.z {
        return false;
    }
    let f = (start.z - z) / (start.z - end.z);
    if (0.0..=1.0).contains(&f) {
        results.push((1.0 - f) * start + f * end);
        return true;
    }
    false
}

/// The intersection of the frustum with the ground plane as a
/// right-handed polygon.
///
/// The camera is always upright and tilt never reaches 90 degrees, so
/// the bottom frustum edges always hit the plane; a top edge that does
/// not is replaced by the far-rectangle edge below it.
fn frustum_footprint(frustum: &Frustum) -> Polygon {
    let mut points = Polygon::with_capacity(4);

    if !append_z_intersect(frustum.apex, frustum.top_right_far, 0.0, &mut points) {
        append_z_intersect(
            frustum.top_right_far,
            frustum.bottom_right_far,
            0.0,
            &mut points,
        );
    }

    append_z_intersect(frustum.apex, frustum.bottom_right_far, 0.0, &mut points);
    append_z_intersect(frustum.apex, frustum.bottom_left_far, 0.0, &mut points);

    if !append_z_intersect(frustum.apex, frustum.top_left_far, 0.0, &mut points) {
        append_z_intersect(
            frustum.top_left_far,
            frustum.bottom_left_far,
            0.0,
            &mut points,
        );
    }

    points
}

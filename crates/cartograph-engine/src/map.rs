//! The tiled map facade.
//!
//! A [`TiledMap`] owns one visible-tile resolver, one prefetch
//! resolver, one scene, and one request manager, and orchestrates them
//! against its engine. Maps do not hold a reference to the engine;
//! every operation that needs it takes `&mut MappingEngine`, and the
//! engine addresses maps by [`MapHandle`], so a map trivially outlives
//! an engine that was dropped before it.

use crate::camera_tiles::CameraTiles;
use crate::engine::{MapHandle, MappingEngine};
use crate::request_manager::TileRequestManager;
use crate::scene::{MapSceneNode, TiledMapScene};
use cartograph_core::{
    coord_to_mercator, mercator_to_coord, CameraCapabilities, CameraData, GeoCoordinate, MapType,
    TileSpec,
};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

/// Frustum scale used for prefetching around the current view.
const PREFETCH_FRUSTUM_SCALE: f64 = 2.0;

/// Which neighbouring zoom layers [`TiledMap::prefetch_data`] warms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrefetchStyle {
    /// Prefetch only the nearest neighbour layer, scaled by the
    /// fractional zoom.
    NeighbourLayer,
    /// Prefetch the layers above and below the current one.
    #[default]
    TwoNeighbourLayers,
}

/// One map view backed by a [`MappingEngine`].
pub struct TiledMap {
    handle: MapHandle,
    capabilities: CameraCapabilities,
    visible_tiles: CameraTiles,
    prefetch_tiles: CameraTiles,
    scene: TiledMapScene,
    request_manager: TileRequestManager,
    camera: CameraData,
    viewport: (u32, u32),
    prefetch_style: PrefetchStyle,
    min_zoom_level: i32,
    max_zoom_level: i32,
}

impl TiledMap {
    /// Register a new map with the engine.
    pub fn new(engine: &mut MappingEngine) -> Self {
        let handle = engine.register_map();
        let capabilities = engine.capabilities();
        let tile_size = capabilities.tile_size;
        let plugin = engine.plugin().to_owned();

        let mut visible_tiles = CameraTiles::new();
        let mut prefetch_tiles = CameraTiles::new();
        visible_tiles.set_tile_size(tile_size);
        prefetch_tiles.set_tile_size(tile_size);
        visible_tiles.set_plugin(plugin.clone());
        prefetch_tiles.set_plugin(plugin);

        let mut scene = TiledMapScene::new();
        scene.set_tile_size(tile_size);

        Self {
            handle,
            capabilities,
            visible_tiles,
            prefetch_tiles,
            scene,
            request_manager: TileRequestManager::new(),
            camera: CameraData::default(),
            viewport: (0, 0),
            prefetch_style: PrefetchStyle::default(),
            min_zoom_level: capabilities.min_zoom.ceil() as i32,
            max_zoom_level: capabilities.max_zoom.ceil() as i32,
        }
    }

    /// The engine-side identity of this map.
    pub fn handle(&self) -> MapHandle {
        self.handle
    }

    /// The camera after clamping and zoom snapping.
    pub fn camera_data(&self) -> CameraData {
        self.camera
    }

    /// The active map type.
    pub fn active_map_type(&self) -> &MapType {
        self.visible_tiles.active_map_type()
    }

    /// Select the prefetch strategy.
    pub fn set_prefetch_style(&mut self, style: PrefetchStyle) {
        self.prefetch_style = style;
    }

    /// Move the camera: clamp it to the engine's capabilities, snap
    /// near-integer zoom, push it into the resolver and the scene, and
    /// reconcile tile requests.
    pub fn set_camera_data(&mut self, engine: &mut MappingEngine, camera: CameraData) {
        let mut cam = self.capabilities.clamp(camera);

        // Snap 0.01 either side of a whole number so that tiles render
        // at their exact pixel size when the filter turns off.
        let mut izl = cam.zoom.floor() as i32;
        let mut delta = cam.zoom - f64::from(izl);
        if delta > 0.5 {
            izl += 1;
            delta -= 1.0;
        }
        if delta.abs() < 0.01 {
            cam.zoom = f64::from(izl);
        }

        self.camera = cam;
        self.visible_tiles.set_camera_data(cam);
        self.scene.set_camera_data(cam);

        self.update_scene(engine);
    }

    /// Resize the viewport. Grows the shared texture quota so at least
    /// one screenful of tiles (plus a one-tile border) stays resident.
    pub fn resize(&mut self, engine: &mut MappingEngine, width: u32, height: u32) {
        self.viewport = (width, height);
        self.visible_tiles.set_screen_size(width, height);
        self.prefetch_tiles.set_screen_size(width, height);
        self.scene.set_screen_size(width, height);

        if width > 0 && height > 0 {
            let tile_size = u64::from(self.visible_tiles.tile_size());
            let screenful =
                (u64::from(width) + 2 * tile_size) * (u64::from(height) + 2 * tile_size) * 4;
            // three screenfuls keep the cache's recent list large
            // enough for an entire display of tiles
            let wanted = 3 * screenful;
            let cache = engine.tile_cache();
            if wanted > cache.min_texture_usage() {
                cache.set_min_texture_usage(wanted);
            }
        }

        self.update_scene(engine);
    }

    /// Switch the active map type.
    pub fn set_active_map_type(&mut self, engine: &mut MappingEngine, map_type: MapType) {
        self.visible_tiles.set_map_type(map_type.clone());
        self.prefetch_tiles.set_map_type(map_type);
        self.update_scene(engine);
    }

    /// Recompute the visible set, diff it against the scene, and
    /// request the residual. Cache hits are pushed into the scene
    /// synchronously.
    fn update_scene(&mut self, engine: &mut MappingEngine) {
        self.visible_tiles.set_map_version(engine.tile_version());
        self.prefetch_tiles.set_map_version(engine.tile_version());

        let tiles = self.visible_tiles.visible_tiles().clone();
        self.scene.set_visible_tiles(tiles.clone());

        let residual: BTreeSet<TileSpec> = tiles
            .difference(&self.scene.textured_tiles())
            .cloned()
            .collect();
        let cached = self
            .request_manager
            .request_tiles(engine, self.handle, &residual);

        for texture in cached {
            self.scene.add_tile(texture.spec.clone(), texture);
        }
    }

    /// Warm the cache around the current view: the same layer with a
    /// doubled frustum, plus neighbour layers per the configured
    /// [`PrefetchStyle`]. Meant to be called when the camera comes to
    /// rest.
    pub fn prefetch_data(&mut self, engine: &mut MappingEngine) {
        let camera = self.visible_tiles.camera_data();
        let current_int_zoom = camera.zoom.floor() as i32;

        self.prefetch_tiles.set_camera_data(camera);
        self.prefetch_tiles.set_view_expansion(PREFETCH_FRUSTUM_SCALE);
        let mut tiles = self.prefetch_tiles.visible_tiles().clone();

        match self.prefetch_style {
            PrefetchStyle::NeighbourLayer => {
                let zoom_fraction = camera.zoom - f64::from(current_int_zoom);
                let nearest = if zoom_fraction > 0.5 {
                    current_int_zoom + 1
                } else {
                    current_int_zoom - 1
                };
                if nearest >= self.min_zoom_level && nearest <= self.max_zoom_level {
                    let mut neighbour_cam = camera;
                    neighbour_cam.zoom = f64::from(nearest);
                    // keeps the total prefetched tile count roughly
                    // independent of the fractional zoom
                    let neighbour_scale = (1.0 + zoom_fraction) / 2.0;
                    self.prefetch_tiles.set_camera_data(neighbour_cam);
                    self.prefetch_tiles
                        .set_view_expansion(PREFETCH_FRUSTUM_SCALE * neighbour_scale);
                    tiles.extend(self.prefetch_tiles.visible_tiles().iter().cloned());
                }
            }
            PrefetchStyle::TwoNeighbourLayers => {
                // the layer below fills the screen at half the size
                if current_int_zoom > self.min_zoom_level {
                    let mut below = camera;
                    below.zoom = f64::from(current_int_zoom - 1);
                    self.prefetch_tiles.set_camera_data(below);
                    self.prefetch_tiles.set_view_expansion(0.5);
                    tiles.extend(self.prefetch_tiles.visible_tiles().iter().cloned());
                }
                if current_int_zoom < self.max_zoom_level {
                    let mut above = camera;
                    above.zoom = f64::from(current_int_zoom + 1);
                    self.prefetch_tiles.set_camera_data(above);
                    self.prefetch_tiles.set_view_expansion(1.0);
                    tiles.extend(self.prefetch_tiles.visible_tiles().iter().cloned());
                }
            }
        }

        let wanted: BTreeSet<TileSpec> = tiles
            .difference(&self.scene.textured_tiles())
            .cloned()
            .collect();
        let cached = self
            .request_manager
            .request_tiles(engine, self.handle, &wanted);
        for texture in cached {
            self.scene.add_tile(texture.spec.clone(), texture);
        }
    }

    /// Wipe the shared cache and this map's scene textures.
    pub fn clear_data(&mut self, engine: &mut MappingEngine) {
        engine.tile_cache().clear_all();
        self.scene.clear_textured_tiles();
    }

    /// Reset the scene if `map_id` is the active map type's id.
    pub fn clear_scene(&mut self, engine: &mut MappingEngine, map_id: i32) {
        if self.active_map_type().map_id == map_id {
            self.scene.clear_textured_tiles();
            self.scene.set_visible_tiles(BTreeSet::new());
            self.update_scene(engine);
        }
    }

    /// Handle a fetched-tile notification routed from the engine.
    /// Promotes the texture into the scene if the tile is still
    /// visible.
    pub fn on_tile_fetched(&mut self, engine: &mut MappingEngine, spec: &TileSpec) {
        self.request_manager.tile_fetched(spec);
        if self.visible_tiles.visible_tiles().contains(spec) {
            if let Some(texture) = engine.get_tile_texture(spec) {
                self.scene.add_tile(spec.clone(), texture);
            }
        }
    }

    /// Handle a fetch-error notification routed from the engine.
    pub fn on_tile_error(&mut self, spec: &TileSpec, error: &str) {
        self.request_manager
            .tile_error(spec, error, Instant::now());
    }

    /// Fire due retry timers. Call periodically from the map thread's
    /// tick.
    pub fn advance_retries(&mut self, engine: &mut MappingEngine) -> usize {
        self.request_manager
            .advance_retries(engine, self.handle, Instant::now())
    }

    /// Diff the retained scene graph for the renderer.
    pub fn update_scene_graph(
        &mut self,
        old_node: Option<MapSceneNode>,
        pixel_ratio: f64,
    ) -> Option<MapSceneNode> {
        self.scene.update_scene_graph(old_node, pixel_ratio)
    }

    /// Convert a viewport position to a geodetic coordinate. With
    /// `clip_to_viewport`, positions outside the viewport yield
    /// `None`.
    pub fn item_position_to_coordinate(
        &self,
        pos: DVec2,
        clip_to_viewport: bool,
    ) -> Option<GeoCoordinate> {
        if clip_to_viewport {
            let (w, h) = self.viewport;
            if pos.x < 0.0 || pos.x > f64::from(w) || pos.y < 0.0 || pos.y > f64::from(h) {
                return None;
            }
        }
        Some(mercator_to_coord(self.scene.item_position_to_mercator(pos)))
    }

    /// Convert a geodetic coordinate to a viewport position. With
    /// `clip_to_viewport`, off-screen results yield `None`.
    pub fn coordinate_to_item_position(
        &self,
        coordinate: GeoCoordinate,
        clip_to_viewport: bool,
    ) -> Option<DVec2> {
        let pos = self
            .scene
            .mercator_to_item_position(coord_to_mercator(coordinate));

        if clip_to_viewport {
            let (w, h) = self.viewport;
            if pos.x < 0.0
                || pos.x > f64::from(w)
                || pos.y < 0.0
                || pos.y > f64::from(h)
                || pos.x.is_nan()
                || pos.y.is_nan()
            {
                return None;
            }
        }

        Some(pos)
    }

    /// Viewport position of a coordinate in plain zoomed-mercator
    /// space, without the camera transform.
    pub fn reference_coordinate_to_item_position(&self, coordinate: GeoCoordinate) -> DVec2 {
        let scale = 2f64.powf(self.camera.zoom) * f64::from(self.visible_tiles.tile_size());
        coord_to_mercator(coordinate) * scale
    }

    /// Inverse of [`reference_coordinate_to_item_position`].
    ///
    /// [`reference_coordinate_to_item_position`]: TiledMap::reference_coordinate_to_item_position
    pub fn reference_item_position_to_coordinate(&self, pos: DVec2) -> GeoCoordinate {
        let scale = 2f64.powf(self.camera.zoom) * f64::from(self.visible_tiles.tile_size());
        mercator_to_coord(pos / scale)
    }

    /// The smallest zoom level at which one map copy covers the whole
    /// viewport.
    pub fn minimum_zoom_at_viewport_size(&self, width: u32, height: u32) -> f64 {
        let max_size = f64::from(width.max(height));
        let num_tiles = max_size / f64::from(self.visible_tiles.tile_size());
        num_tiles.log2()
    }

    /// The northernmost center latitude that keeps the viewport inside
    /// the map at the given zoom level.
    pub fn maximum_center_latitude_at_zoom(&self, zoom: f64) -> f64 {
        let map_edge_size = 2f64.powf(zoom) * f64::from(self.visible_tiles.tile_size());
        let viewport_height = f64::from(self.viewport.1);
        let clamped_height = viewport_height.min(map_edge_size);

        let mercator_topmost = (clamped_height * 0.5) / map_edge_size;
        mercator_to_coord(DVec2::new(0.0, mercator_topmost)).latitude
    }

    /// Shared access to the scene, for renderers that read more than
    /// the scene graph.
    pub fn scene(&self) -> &TiledMapScene {
        &self.scene
    }

    /// This map's request bookkeeping, for diagnostics.
    pub fn request_manager(&self) -> &TileRequestManager {
        &self.request_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_util::{png_bytes, test_engine, wait_events, Serve};
    use crate::engine::EngineEvent;
    use approx::assert_relative_eq;
    use cartograph_core::MapStyle;

    fn camera(lat: f64, lon: f64, zoom: f64) -> CameraData {
        CameraData {
            center: GeoCoordinate::new(lat, lon),
            zoom,
            ..Default::default()
        }
    }

    fn routed(map: &mut TiledMap, engine: &mut MappingEngine, events: Vec<EngineEvent>) {
        for event in events {
            match event {
                EngineEvent::TileFetched { map: m, spec } if m == map.handle() => {
                    map.on_tile_fetched(engine, &spec);
                }
                EngineEvent::TileError { map: m, spec, error } if m == map.handle() => {
                    map.on_tile_error(&spec, &error);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn camera_change_fetches_and_textures_the_scene() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Bytes(png_bytes(4)));
        let mut map = TiledMap::new(&mut engine);

        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        let wanted = map.request_manager().requested().len();
        assert!(wanted > 0);

        let events = wait_events(&mut engine, wanted);
        routed(&mut map, &mut engine, events);

        assert!(map.request_manager().requested().is_empty());
        let root = map.update_scene_graph(None, 1.0).unwrap();
        assert_eq!(root.tiles.tiles.len(), 16);
    }

    #[test]
    fn unchanged_camera_requests_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);

        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        // Wait until the first batch fully reached the fetcher.
        let wanted = map.request_manager().requested().len();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while log.lock().requested.len() < wanted && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let baseline = log.lock().requested.len();
        assert_eq!(baseline, wanted);

        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(log.lock().requested.len(), baseline);
    }

    #[test]
    fn zoom_snaps_within_a_hundredth_of_an_integer() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 256, 256);

        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.004));
        assert_eq!(map.camera_data().zoom, 4.0);

        map.set_camera_data(&mut engine, camera(0.0, 0.0, 3.995));
        assert_eq!(map.camera_data().zoom, 4.0);

        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.3));
        assert_relative_eq!(map.camera_data().zoom, 4.3);
    }

    #[test]
    fn camera_is_clamped_to_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 256, 256);

        map.set_camera_data(
            &mut engine,
            CameraData {
                zoom: 99.0,
                tilt: 200.0,
                ..Default::default()
            },
        );
        let cam = map.camera_data();
        assert_eq!(cam.zoom, engine.capabilities().max_zoom);
        assert_eq!(cam.tilt, engine.capabilities().max_tilt);
    }

    #[test]
    fn synchronous_cache_hits_texture_the_scene_without_requests() {
        let dir = tempfile::tempdir().unwrap();

        // First life: fetch everything into the cache.
        {
            let (mut engine, _log) = test_engine(dir.path(), Serve::Bytes(png_bytes(4)));
            let mut map = TiledMap::new(&mut engine);
            map.resize(&mut engine, 512, 512);
            map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));
            let wanted = map.request_manager().requested().len();
            let events = wait_events(&mut engine, wanted);
            routed(&mut map, &mut engine, events);
        }

        // Second life over the same directory: the disk tier serves
        // everything synchronously.
        let (mut engine, log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        assert!(map.request_manager().requested().is_empty());
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(log.lock().requested.is_empty());

        let root = map.update_scene_graph(None, 1.0).unwrap();
        assert_eq!(root.tiles.tiles.len(), 16);
    }

    #[test]
    fn prefetch_requests_neighbour_layers() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        map.prefetch_data(&mut engine);

        let zooms: BTreeSet<i32> = map
            .request_manager()
            .requested()
            .iter()
            .map(|t| t.zoom)
            .collect();
        assert!(zooms.contains(&3));
        assert!(zooms.contains(&4));
        assert!(zooms.contains(&5));
    }

    #[test]
    fn nearest_neighbour_prefetch_picks_one_layer() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.set_prefetch_style(PrefetchStyle::NeighbourLayer);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.3));

        map.prefetch_data(&mut engine);

        let zooms: BTreeSet<i32> = map
            .request_manager()
            .requested()
            .iter()
            .map(|t| t.zoom)
            .collect();
        assert_eq!(zooms, [3, 4].into());
    }

    #[test]
    fn projections_clip_to_the_viewport() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        let center = map
            .item_position_to_coordinate(DVec2::new(256.0, 256.0), true)
            .unwrap();
        assert_relative_eq!(center.latitude, 0.0, epsilon = 1e-9);
        assert_relative_eq!(center.longitude, 0.0, epsilon = 1e-9);

        assert!(map
            .item_position_to_coordinate(DVec2::new(-1.0, 0.0), true)
            .is_none());

        let pos = map
            .coordinate_to_item_position(GeoCoordinate::new(0.0, 0.0), true)
            .unwrap();
        assert_relative_eq!(pos.x, 256.0, epsilon = 1e-9);
        assert_relative_eq!(pos.y, 256.0, epsilon = 1e-9);

        // A point on the far side of the planet is off screen.
        assert!(map
            .coordinate_to_item_position(GeoCoordinate::new(0.0, 180.0), true)
            .is_none());
    }

    #[test]
    fn reference_projection_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        let coord = GeoCoordinate::new(12.0, 34.0);
        let pos = map.reference_coordinate_to_item_position(coord);
        let back = map.reference_item_position_to_coordinate(pos);
        assert_relative_eq!(back.latitude, coord.latitude, epsilon = 1e-9);
        assert_relative_eq!(back.longitude, coord.longitude, epsilon = 1e-9);
    }

    #[test]
    fn minimum_zoom_matches_the_viewport() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let map = TiledMap::new(&mut engine);

        // 1024 pixels over 256-pixel tiles: 4 tiles, zoom 2.
        assert_relative_eq!(map.minimum_zoom_at_viewport_size(1024, 512), 2.0);
    }

    #[test]
    fn maximum_center_latitude_stays_inside_the_map() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        let latitude = map.maximum_center_latitude_at_zoom(4.0);
        assert!(latitude > 0.0 && latitude < 90.0);

        // Zoomed far out the whole map fits: the center is pinned to
        // the equator.
        let pinned = map.maximum_center_latitude_at_zoom(0.0);
        assert_relative_eq!(pinned, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn map_type_switch_rekeys_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        map.set_active_map_type(
            &mut engine,
            MapType::new(MapStyle::Satellite, "sat", "satellite", false, false, 7),
        );
        assert!(map
            .request_manager()
            .requested()
            .iter()
            .all(|t| t.map_id == 7));
    }

    #[test]
    fn clear_scene_only_affects_the_active_map_id() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Bytes(png_bytes(4)));
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));

        let wanted = map.request_manager().requested().len();
        let events = wait_events(&mut engine, wanted);
        routed(&mut map, &mut engine, events);
        assert!(!map.scene().textured_tiles().is_empty());

        // A foreign map id leaves the scene alone.
        map.clear_scene(&mut engine, 99);
        assert!(!map.scene().textured_tiles().is_empty());

        let active_id = map.active_map_type().map_id;
        map.clear_scene(&mut engine, active_id);
        assert!(map.scene().textured_tiles().is_empty());
    }

    #[test]
    fn tile_version_changes_propagate_into_new_specs() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Silence);
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 512, 512);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 4.0));
        assert!(map
            .request_manager()
            .requested()
            .iter()
            .all(|t| t.version == -1));

        engine.set_tile_version(9);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 5.0));
        assert!(!map.request_manager().requested().is_empty());
        assert!(map
            .request_manager()
            .requested()
            .iter()
            .all(|t| t.version == 9));
    }

    #[test]
    fn failed_tiles_retry_and_eventually_give_up() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _log) = test_engine(dir.path(), Serve::Failure("504".into()));
        let mut map = TiledMap::new(&mut engine);
        map.resize(&mut engine, 256, 256);
        map.set_camera_data(&mut engine, camera(0.0, 0.0, 2.0));

        let wanted = map.request_manager().requested().clone();
        assert!(!wanted.is_empty());

        let events = wait_events(&mut engine, wanted.len());
        routed(&mut map, &mut engine, events);

        // Every failed tile now has a scheduled retry.
        for spec in &wanted {
            assert!(map.request_manager().retry_deadline(spec).is_some());
        }
    }
}

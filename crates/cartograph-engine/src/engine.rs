//! Cross-map request coalescing and fetch-result dispatch.
//!
//! One engine serves any number of maps. It keeps the map→tiles and
//! tile→maps indices, nets out requests against cancellations before
//! anything reaches the fetcher, owns the shared tile cache, and
//! routes fetch results back to the maps that subscribed to them.

use crate::error::Result;
use crate::fetcher::{FetchEvent, FetcherHandle, TileFetcher};
use cartograph_cache::{CacheAreas, FileTileCache, FileTileCacheConfig, TileTexture};
use cartograph_core::{CameraCapabilities, TileSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Identifies one registered map within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapHandle(u64);

/// A fetch outcome routed to one subscribed map. Produced by
/// [`MappingEngine::poll_events`]; the owner forwards each to the
/// addressed map's handlers.
#[derive(Debug)]
pub enum EngineEvent {
    /// The tile was fetched and is now in the cache.
    TileFetched {
        /// The map that subscribed to the tile.
        map: MapHandle,
        /// The fetched tile.
        spec: TileSpec,
    },
    /// The fetch failed.
    TileError {
        /// The map that subscribed to the tile.
        map: MapHandle,
        /// The failed tile.
        spec: TileSpec,
        /// Human-readable cause.
        error: String,
    },
}

/// The engine: shared cache, fetcher thread, and per-map request
/// indices.
pub struct MappingEngine {
    plugin: String,
    capabilities: CameraCapabilities,
    tile_version: i32,
    cache_areas: CacheAreas,
    cache: Arc<FileTileCache>,
    fetcher: FetcherHandle,
    next_handle: u64,
    /// Which tiles each map is waiting for.
    map_tiles: BTreeMap<MapHandle, BTreeSet<TileSpec>>,
    /// Which maps wait for each tile; the transpose of `map_tiles`.
    tile_maps: BTreeMap<TileSpec, BTreeSet<MapHandle>>,
}

impl MappingEngine {
    /// Create an engine around a fetcher implementation. `plugin`
    /// names the provider; it partitions the tile cache and tags every
    /// tile spec the maps produce.
    pub fn new<F: TileFetcher>(
        plugin: impl Into<String>,
        capabilities: CameraCapabilities,
        cache_config: FileTileCacheConfig,
        fetcher: F,
    ) -> Result<Self> {
        let plugin = plugin.into();
        let cache = Arc::new(FileTileCache::new(&plugin, cache_config)?);
        let fetcher = FetcherHandle::spawn(fetcher)?;

        Ok(Self {
            plugin,
            capabilities,
            tile_version: -1,
            cache_areas: CacheAreas::default(),
            cache,
            fetcher,
            next_handle: 0,
            map_tiles: BTreeMap::new(),
            tile_maps: BTreeMap::new(),
        })
    }

    /// The provider plugin tag.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// The engine's camera limits.
    pub fn capabilities(&self) -> CameraCapabilities {
        self.capabilities
    }

    /// The provider tile version propagated into new tile specs.
    pub fn tile_version(&self) -> i32 {
        self.tile_version
    }

    /// Change the provider tile version. Maps pick it up on their next
    /// update and re-request under the new version.
    pub fn set_tile_version(&mut self, version: i32) {
        self.tile_version = version;
    }

    /// Which cache tiers fetched tiles are stored into.
    pub fn cache_areas(&self) -> CacheAreas {
        self.cache_areas
    }

    /// Select the cache tiers fetched tiles are stored into.
    pub fn set_cache_areas(&mut self, areas: CacheAreas) {
        self.cache_areas = areas;
    }

    /// The shared tile cache.
    pub fn tile_cache(&self) -> &Arc<FileTileCache> {
        &self.cache
    }

    /// Look a tile up in the shared cache.
    pub fn get_tile_texture(&self, spec: &TileSpec) -> Option<Arc<TileTexture>> {
        self.cache.get(spec)
    }

    /// Register a map and return its handle.
    pub fn register_map(&mut self) -> MapHandle {
        let handle = MapHandle(self.next_handle);
        self.next_handle += 1;
        self.map_tiles.insert(handle, BTreeSet::new());
        handle
    }

    /// Unregister a map, dropping its subscriptions. Tiles no other
    /// map waits for disappear from the indices; in-flight fetches for
    /// them deliver into the cache without notifying anyone.
    pub fn release_map(&mut self, map: MapHandle) {
        self.map_tiles.remove(&map);
        self.tile_maps.retain(|_, maps| {
            maps.remove(&map);
            !maps.is_empty()
        });
    }

    /// Reconcile one map's request set change and forward the net
    /// effect to the fetcher. A tile cancelled and re-added in the
    /// same transaction reaches the fetcher as a no-op.
    pub fn update_tile_requests(
        &mut self,
        map: MapHandle,
        tiles_added: &BTreeSet<TileSpec>,
        tiles_removed: &BTreeSet<TileSpec>,
    ) {
        let map_set = self.map_tiles.entry(map).or_default();
        for spec in tiles_removed {
            map_set.remove(spec);
        }
        map_set.extend(tiles_added.iter().cloned());

        let mut request_tiles = BTreeSet::new();
        let mut cancel_tiles = BTreeSet::new();

        for spec in tiles_removed {
            if let Some(maps) = self.tile_maps.get_mut(spec) {
                maps.remove(&map);
                if maps.is_empty() {
                    self.tile_maps.remove(spec);
                    cancel_tiles.insert(spec.clone());
                }
            }
        }

        for spec in tiles_added {
            let maps = self.tile_maps.entry(spec.clone()).or_default();
            if maps.is_empty() {
                request_tiles.insert(spec.clone());
            }
            maps.insert(map);
        }

        let cancel_tiles: BTreeSet<TileSpec> =
            cancel_tiles.difference(&request_tiles).cloned().collect();

        if !request_tiles.is_empty() || !cancel_tiles.is_empty() {
            self.fetcher.post(request_tiles, cancel_tiles);
        }
    }

    /// Drain the fetcher's published results, store arrived tiles in
    /// the cache, and return the per-map notifications in publication
    /// order. Each completed fetch notifies each subscriber exactly
    /// once.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        for event in self.fetcher.poll() {
            match event {
                FetchEvent::Finished {
                    spec,
                    bytes,
                    format,
                } => {
                    let maps = self.unsubscribe_all(&spec);
                    if bytes.is_empty() {
                        warn!(%spec, "fetcher delivered an empty tile");
                    } else {
                        self.cache.insert(&spec, &bytes, &format, self.cache_areas);
                    }
                    for map in maps {
                        events.push(EngineEvent::TileFetched {
                            map,
                            spec: spec.clone(),
                        });
                    }
                }
                FetchEvent::Error { spec, error } => {
                    let maps = self.unsubscribe_all(&spec);
                    warn!(%spec, %error, "tile request error");
                    for map in maps {
                        events.push(EngineEvent::TileError {
                            map,
                            spec: spec.clone(),
                            error: error.clone(),
                        });
                    }
                }
            }
        }

        events
    }

    /// Remove `spec` from both indices, returning its subscribers.
    fn unsubscribe_all(&mut self, spec: &TileSpec) -> BTreeSet<MapHandle> {
        let maps = self.tile_maps.remove(spec).unwrap_or_default();
        for map in &maps {
            if let Some(set) = self.map_tiles.get_mut(map) {
                set.remove(spec);
            }
        }
        maps
    }

    /// The tiles a map currently waits for, for tests and diagnostics.
    pub fn outstanding_for(&self, map: MapHandle) -> BTreeSet<TileSpec> {
        self.map_tiles.get(&map).cloned().unwrap_or_default()
    }

    /// Whether any map waits for `spec`.
    pub fn has_subscribers(&self, spec: &TileSpec) -> bool {
        self.tile_maps.contains_key(spec)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::fetcher::FetcherEvents;
    use image::RgbaImage;
    use parking_lot::Mutex;

    /// A valid PNG for fetcher responses.
    pub(crate) fn png_bytes(size: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(size, size, image::Rgba([40, 50, 60, 255]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    /// What the test fetcher should do with a request.
    #[derive(Clone)]
    pub(crate) enum Serve {
        Bytes(Vec<u8>),
        Failure(String),
        Silence,
    }

    #[derive(Default)]
    pub(crate) struct FetchLog {
        pub requested: Vec<TileSpec>,
        pub cancelled: Vec<TileSpec>,
    }

    /// Serves every request according to `serve`, recording traffic.
    pub(crate) struct TestFetcher {
        pub serve: Serve,
        pub log: Arc<Mutex<FetchLog>>,
    }

    impl TestFetcher {
        pub(crate) fn new(serve: Serve) -> (Self, Arc<Mutex<FetchLog>>) {
            let log = Arc::new(Mutex::new(FetchLog::default()));
            (
                Self {
                    serve,
                    log: Arc::clone(&log),
                },
                log,
            )
        }
    }

    impl TileFetcher for TestFetcher {
        fn update_tile_requests(
            &mut self,
            events: &FetcherEvents,
            added: &BTreeSet<TileSpec>,
            removed: &BTreeSet<TileSpec>,
        ) {
            let mut log = self.log.lock();
            log.requested.extend(added.iter().cloned());
            log.cancelled.extend(removed.iter().cloned());
            drop(log);

            for spec in added {
                match &self.serve {
                    Serve::Bytes(bytes) => {
                        events.tile_finished(spec.clone(), bytes.clone(), "png")
                    }
                    Serve::Failure(error) => events.tile_error(spec.clone(), error.clone()),
                    Serve::Silence => {}
                }
            }
        }
    }

    /// Build an engine over a temp-dir cache and the given fetcher
    /// behaviour.
    pub(crate) fn test_engine(
        dir: &std::path::Path,
        serve: Serve,
    ) -> (MappingEngine, Arc<Mutex<FetchLog>>) {
        let (fetcher, log) = TestFetcher::new(serve);
        let engine = MappingEngine::new(
            "test",
            CameraCapabilities::default(),
            FileTileCacheConfig {
                directory: Some(dir.to_path_buf()),
                ..Default::default()
            },
            fetcher,
        )
        .unwrap();
        (engine, log)
    }

    /// Poll until `count` events arrived or a timeout passes.
    pub(crate) fn wait_events(engine: &mut MappingEngine, count: usize) -> Vec<EngineEvent> {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < count && std::time::Instant::now() < deadline {
            events.extend(engine.poll_events());
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        events
    }

    pub(crate) fn spec(x: i32, y: i32) -> TileSpec {
        TileSpec::new("test", 1, 4, x, y)
    }

    pub(crate) fn set_of(specs: &[TileSpec]) -> BTreeSet<TileSpec> {
        specs.iter().cloned().collect()
    }
}

//! Per-map tile request bookkeeping and retry backoff.

use crate::engine::{MapHandle, MappingEngine};
use cartograph_cache::TileTexture;
use cartograph_core::TileSpec;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Failures per tile before the spec is dropped for good.
const MAX_RETRIES: u32 = 5;

/// A scheduled single-tile re-request. A future whose tile has been
/// cancelled or fetched in the meantime simply no longer exists in the
/// table, so firing it is a no-op.
#[derive(Debug, Clone, Copy)]
struct RetryFuture {
    deadline: Instant,
}

/// Tracks which tiles a map is waiting for, short-circuits tiles the
/// cache already holds, and schedules exponential-backoff retries for
/// failed fetches.
pub struct TileRequestManager {
    requested: BTreeSet<TileSpec>,
    retries: HashMap<TileSpec, u32>,
    futures: HashMap<TileSpec, RetryFuture>,
}

impl Default for TileRequestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TileRequestManager {
    /// Create an empty request manager.
    pub fn new() -> Self {
        Self {
            requested: BTreeSet::new(),
            retries: HashMap::new(),
            futures: HashMap::new(),
        }
    }

    /// Reconcile the wanted set against what is already outstanding.
    ///
    /// Tiles the cache can serve immediately are returned and never
    /// reach the network; the remaining new tiles and the
    /// no-longer-wanted tiles are posted to the engine in one
    /// transaction. Cancelled tiles lose their retry state so a later
    /// request cycle starts fresh.
    pub fn request_tiles(
        &mut self,
        engine: &mut MappingEngine,
        map: MapHandle,
        tiles: &BTreeSet<TileSpec>,
    ) -> Vec<Arc<TileTexture>> {
        let cancel_tiles: BTreeSet<TileSpec> =
            self.requested.difference(tiles).cloned().collect();
        let mut request_tiles: BTreeSet<TileSpec> =
            tiles.difference(&self.requested).cloned().collect();

        let mut cached_textures = Vec::new();
        let mut cached = BTreeSet::new();
        for spec in &request_tiles {
            if let Some(texture) = engine.get_tile_texture(spec) {
                cached_textures.push(texture);
                cached.insert(spec.clone());
            }
        }
        request_tiles.retain(|spec| !cached.contains(spec));

        for spec in &cancel_tiles {
            self.requested.remove(spec);
        }
        self.requested.extend(request_tiles.iter().cloned());

        if !request_tiles.is_empty() || !cancel_tiles.is_empty() {
            engine.update_tile_requests(map, &request_tiles, &cancel_tiles);

            // Drop retry state of cancelled tiles so the counters are
            // not reused for an unrelated request cycle.
            for spec in &cancel_tiles {
                self.retries.remove(spec);
                self.futures.remove(spec);
            }
        }

        cached_textures
    }

    /// The tile arrived; clear all of its bookkeeping.
    pub fn tile_fetched(&mut self, spec: &TileSpec) {
        self.requested.remove(spec);
        self.retries.remove(spec);
        self.futures.remove(spec);
    }

    /// A fetch failed. Schedules a retry with exponential backoff, or
    /// gives the tile up for good after [`MAX_RETRIES`] failures.
    pub fn tile_error(&mut self, spec: &TileSpec, error: &str, now: Instant) {
        if !self.requested.contains(spec) {
            return;
        }

        let count = self.retries.get(spec).copied().unwrap_or(0);
        self.retries.insert(spec.clone(), count + 1);

        if count >= MAX_RETRIES - 1 {
            warn!(
                %spec,
                last_error = error,
                "failed to fetch tile {MAX_RETRIES} times, giving up"
            );
            self.requested.remove(spec);
            self.retries.remove(spec);
            self.futures.remove(spec);
        } else {
            let delay = Duration::from_millis((1u64 << count) * 500);
            self.futures.insert(
                spec.clone(),
                RetryFuture {
                    deadline: now + delay,
                },
            );
        }
    }

    /// Fire every retry whose deadline has passed, re-posting each as
    /// a single-tile request. Returns how many fired.
    pub fn advance_retries(
        &mut self,
        engine: &mut MappingEngine,
        map: MapHandle,
        now: Instant,
    ) -> usize {
        let due: Vec<TileSpec> = self
            .futures
            .iter()
            .filter(|(_, future)| future.deadline <= now)
            .map(|(spec, _)| spec.clone())
            .collect();

        for spec in &due {
            self.futures.remove(spec);
            let mut added = BTreeSet::new();
            added.insert(spec.clone());
            engine.update_tile_requests(map, &added, &BTreeSet::new());
        }

        due.len()
    }

    /// The tiles currently outstanding.
    pub fn requested(&self) -> &BTreeSet<TileSpec> {
        &self.requested
    }

    /// When the next retry for `spec` is due, if one is scheduled.
    pub fn retry_deadline(&self, spec: &TileSpec) -> Option<Instant> {
        self.futures.get(spec).map(|f| f.deadline)
    }

    /// Whether any retry state (counter or future) exists for `spec`.
    pub fn has_retry_state(&self, spec: &TileSpec) -> bool {
        self.retries.contains_key(spec) || self.futures.contains_key(spec)
    }
}

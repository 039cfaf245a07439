//! The three-tier tile cache.
//!
//! Tier order from the renderer outwards: decoded textures, compressed
//! bytes in memory, files on disk. `get` promotes inwards (disk hits
//! populate the memory and texture tiers); `insert` writes outwards
//! only (disk and/or memory, never textures — tiles that arrive after
//! the camera moved on would poison the texture tier's hit rate).
//!
//! The disk tier persists its queue ordering in four manifest files
//! (`queue1`..`queue4`, one basename per line) written at shutdown and
//! read back at startup; files on disk that no manifest mentions are
//! scavenged so a crash cannot orphan tiles.

use crate::entries::{DiskTile, MemoryTile};
use crate::error::{CacheError, Result};
use crate::filenames::{filename_to_tile_spec, tile_spec_to_filename};
use crate::queue_cache::{CacheStats, EvictionPolicy, QueueCache};
use crate::texture::TileTexture;
use cartograph_core::TileSpec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default disk quota under the byte-size strategy.
pub const DEFAULT_DISK_USAGE: u64 = 50 * 1024 * 1024;
/// Default memory quota under the byte-size strategy.
pub const DEFAULT_MEMORY_USAGE: u64 = 3 * 1024 * 1024;
/// Default extra texture quota under the byte-size strategy.
pub const DEFAULT_EXTRA_TEXTURE_USAGE: u64 = 6 * 1024 * 1024;

/// How entry costs are measured in a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CostStrategy {
    /// Cost is the entry's size in bytes.
    #[default]
    ByteSize,
    /// Every entry costs one unit.
    Unitary,
}

/// Which tiers an [`FileTileCache::insert`] populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheAreas {
    /// Disk tier only.
    Disk,
    /// Memory tier only.
    Memory,
    /// Disk and memory.
    #[default]
    All,
}

impl CacheAreas {
    /// Whether the disk tier is included.
    pub fn includes_disk(&self) -> bool {
        matches!(self, CacheAreas::Disk | CacheAreas::All)
    }

    /// Whether the memory tier is included.
    pub fn includes_memory(&self) -> bool {
        matches!(self, CacheAreas::Memory | CacheAreas::All)
    }
}

/// Construction-time cache settings.
///
/// Unset quotas resolve to strategy-dependent defaults when the cache
/// is created: 50 MiB / 3 MiB / 6 MiB extra under [`CostStrategy::ByteSize`],
/// 1000 / 100 / 30 entries under [`CostStrategy::Unitary`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileTileCacheConfig {
    /// Cache directory override. When unset, a per-plugin directory
    /// under the per-user cache location is used.
    pub directory: Option<PathBuf>,
    /// Disk tier quota.
    pub max_disk_usage: Option<u64>,
    /// Memory tier quota.
    pub max_memory_usage: Option<u64>,
    /// Texture quota on top of the renderer-driven minimum.
    pub extra_texture_usage: Option<u64>,
    /// Cost measurement for the disk tier.
    pub cost_strategy_disk: CostStrategy,
    /// Cost measurement for the memory tier.
    pub cost_strategy_memory: CostStrategy,
    /// Cost measurement for the texture tier.
    pub cost_strategy_texture: CostStrategy,
}

/// Per-tier statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTileCacheStats {
    /// Texture tier counters.
    pub texture: CacheStats,
    /// Memory tier counters.
    pub memory: CacheStats,
    /// Disk tier counters.
    pub disk: CacheStats,
}

/// Disk-tier eviction policy: deliberate removal detaches the entry
/// from its file, real eviction leaves it linked so dropping the entry
/// deletes the file.
#[derive(Debug, Default, Clone, Copy)]
struct DiskTilePolicy;

impl EvictionPolicy<TileSpec, DiskTile> for DiskTilePolicy {
    fn about_to_be_removed(&self, _key: &TileSpec, value: &Arc<DiskTile>) {
        value.unlink();
    }
}

struct CacheState {
    texture: QueueCache<TileSpec, TileTexture>,
    memory: QueueCache<TileSpec, MemoryTile>,
    disk: QueueCache<TileSpec, DiskTile, DiskTilePolicy>,
    cost_strategy_disk: CostStrategy,
    cost_strategy_memory: CostStrategy,
    cost_strategy_texture: CostStrategy,
    min_texture_usage: u64,
    extra_texture_usage: u64,
}

/// The three-tier tile cache. Shared between the mapping engine and the
/// per-map request managers; one instance per engine.
pub struct FileTileCache {
    directory: PathBuf,
    state: Mutex<CacheState>,
}

impl FileTileCache {
    /// Create the cache for one plugin, resolving the directory,
    /// purging legacy layouts, and loading resident tiles from the
    /// manifests and the scavenger.
    pub fn new(plugin: &str, config: FileTileCacheConfig) -> Result<Self> {
        let directory = match &config.directory {
            Some(dir) => dir.clone(),
            None => {
                let root = base_cache_directory().join("cartograph");
                purge_legacy_files(&root);
                root.join(env!("CARGO_PKG_VERSION"))
                    .join("tiles")
                    .join(plugin)
            }
        };

        fs::create_dir_all(&directory)
            .map_err(|e| CacheError::Directory(format!("{}: {e}", directory.display())))?;

        let max_disk = config
            .max_disk_usage
            .unwrap_or(match config.cost_strategy_disk {
                CostStrategy::ByteSize => DEFAULT_DISK_USAGE,
                CostStrategy::Unitary => 1000,
            });
        let max_memory = config
            .max_memory_usage
            .unwrap_or(match config.cost_strategy_memory {
                CostStrategy::ByteSize => DEFAULT_MEMORY_USAGE,
                CostStrategy::Unitary => 100,
            });
        let extra_texture =
            config
                .extra_texture_usage
                .unwrap_or(match config.cost_strategy_texture {
                    CostStrategy::ByteSize => DEFAULT_EXTRA_TEXTURE_USAGE,
                    CostStrategy::Unitary => 30,
                });

        let mut state = CacheState {
            texture: QueueCache::new(extra_texture),
            memory: QueueCache::new(max_memory),
            disk: QueueCache::with_policy(max_disk, DiskTilePolicy),
            cost_strategy_disk: config.cost_strategy_disk,
            cost_strategy_memory: config.cost_strategy_memory,
            cost_strategy_texture: config.cost_strategy_texture,
            min_texture_usage: 0,
            extra_texture_usage: extra_texture,
        };

        load_tiles(&mut state, &directory);

        Ok(Self {
            directory,
            state: Mutex::new(state),
        })
    }

    /// The directory tile files live in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Fetch a texture for `spec`, promoting from the memory or disk
    /// tier on the way. Decode failures are logged and reported as a
    /// miss.
    pub fn get(&self, spec: &TileSpec) -> Option<Arc<TileTexture>> {
        let mut state = self.state.lock();

        if let Some(texture) = state.texture.get(spec) {
            return Some(texture);
        }

        if let Some(tile) = state.memory.get(spec) {
            match TileTexture::decode(spec.clone(), &tile.bytes) {
                Ok(texture) => {
                    let texture = Arc::new(texture);
                    add_to_texture_cache(&mut state, spec.clone(), Arc::clone(&texture));
                    return Some(texture);
                }
                Err(err) => warn!(%spec, %err, "problem with tile image"),
            }
        }

        if let Some(tile) = state.disk.get(spec) {
            let bytes = match fs::read(&tile.filename) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%spec, %err, "failed to read tile file");
                    return None;
                }
            };
            let format = tile
                .filename
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();

            match TileTexture::decode(spec.clone(), &bytes) {
                Ok(texture) => {
                    let texture = Arc::new(texture);
                    add_to_memory_cache(&mut state, spec.clone(), bytes, format);
                    add_to_texture_cache(&mut state, spec.clone(), Arc::clone(&texture));
                    return Some(texture);
                }
                Err(err) => warn!(%spec, %err, "problem with tile image"),
            }
        }

        None
    }

    /// Store fetched bytes in the tiers selected by `areas`. The
    /// texture tier is never populated here.
    pub fn insert(&self, spec: &TileSpec, bytes: &[u8], format: &str, areas: CacheAreas) {
        if bytes.is_empty() {
            debug_assert!(false, "insert called with empty bytes");
            return;
        }

        let mut state = self.state.lock();

        if areas.includes_disk() {
            let filename = tile_spec_to_filename(spec, format, &self.directory);
            match fs::write(&filename, bytes) {
                Ok(()) => add_to_disk_cache(&mut state, spec.clone(), filename),
                Err(err) => warn!(%spec, %err, "failed to write tile file"),
            }
        }

        if areas.includes_memory() {
            add_to_memory_cache(&mut state, spec.clone(), bytes.to_vec(), format.to_owned());
        }
    }

    /// Wipe all three tiers and delete every tile file in the
    /// directory whose name the codec recognizes.
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        state.texture.clear();
        state.memory.clear();
        state.disk.clear();
        drop(state);

        for_each_tile_file(&self.directory, |_, path| {
            let _ = fs::remove_file(path);
        });
    }

    /// Purge all entries of one map id, then rescan the directory and
    /// delete matching leftovers eviction may have stranded.
    pub fn clear_map_id(&self, map_id: i32) {
        let mut state = self.state.lock();
        for key in state.disk.keys() {
            if key.map_id == map_id {
                state.disk.remove(&key);
            }
        }
        for key in state.memory.keys() {
            if key.map_id == map_id {
                state.memory.remove(&key);
            }
        }
        for key in state.texture.keys() {
            if key.map_id == map_id {
                state.texture.remove(&key);
            }
        }
        drop(state);

        for_each_tile_file(&self.directory, |spec, path| {
            if spec.map_id == map_id {
                let _ = fs::remove_file(path);
            }
        });
    }

    /// Write the four disk-queue manifests. Called on drop; callable
    /// explicitly for an orderly shutdown.
    pub fn save_manifests(&self) {
        let state = self.state.lock();
        for index in 1..=4 {
            let path = self.directory.join(format!("queue{index}"));
            let mut contents = String::new();
            for (_, tile) in state.disk.serialize_queue(index) {
                if let Some(name) = tile.filename.file_name() {
                    contents.push_str(&name.to_string_lossy());
                    contents.push('\n');
                }
            }
            if let Err(err) = fs::write(&path, contents) {
                warn!(path = %path.display(), %err, "unable to write tile cache manifest");
            }
        }
    }

    /// Change the disk quota.
    pub fn set_max_disk_usage(&self, usage: u64) {
        self.state.lock().disk.set_max_cost(usage);
    }

    /// The disk quota.
    pub fn max_disk_usage(&self) -> u64 {
        self.state.lock().disk.max_cost()
    }

    /// Current disk tier cost.
    pub fn disk_usage(&self) -> u64 {
        self.state.lock().disk.total_cost()
    }

    /// Change the memory quota.
    pub fn set_max_memory_usage(&self, usage: u64) {
        self.state.lock().memory.set_max_cost(usage);
    }

    /// The memory quota.
    pub fn max_memory_usage(&self) -> u64 {
        self.state.lock().memory.max_cost()
    }

    /// Current memory tier cost.
    pub fn memory_usage(&self) -> u64 {
        self.state.lock().memory.total_cost()
    }

    /// Raise or lower the texture quota's renderer-driven floor.
    pub fn set_min_texture_usage(&self, usage: u64) {
        let mut state = self.state.lock();
        state.min_texture_usage = usage;
        let max = state.min_texture_usage + state.extra_texture_usage;
        state.texture.set_max_cost(max);
    }

    /// The renderer-driven texture quota floor.
    pub fn min_texture_usage(&self) -> u64 {
        self.state.lock().min_texture_usage
    }

    /// Change the texture quota headroom above the floor.
    pub fn set_extra_texture_usage(&self, usage: u64) {
        let mut state = self.state.lock();
        state.extra_texture_usage = usage;
        let max = state.min_texture_usage + state.extra_texture_usage;
        state.texture.set_max_cost(max);
    }

    /// The effective texture quota (floor plus headroom).
    pub fn max_texture_usage(&self) -> u64 {
        self.state.lock().texture.max_cost()
    }

    /// Current texture tier cost.
    pub fn texture_usage(&self) -> u64 {
        self.state.lock().texture.total_cost()
    }

    /// Change how disk costs are measured (affects future entries).
    pub fn set_cost_strategy_disk(&self, strategy: CostStrategy) {
        self.state.lock().cost_strategy_disk = strategy;
    }

    /// Change how memory costs are measured (affects future entries).
    pub fn set_cost_strategy_memory(&self, strategy: CostStrategy) {
        self.state.lock().cost_strategy_memory = strategy;
    }

    /// Change how texture costs are measured (affects future entries).
    pub fn set_cost_strategy_texture(&self, strategy: CostStrategy) {
        self.state.lock().cost_strategy_texture = strategy;
    }

    /// Per-tier counters.
    pub fn stats(&self) -> FileTileCacheStats {
        let state = self.state.lock();
        FileTileCacheStats {
            texture: state.texture.stats(),
            memory: state.memory.stats(),
            disk: state.disk.stats(),
        }
    }

    /// Resident disk tier keys, for tests and diagnostics.
    pub fn disk_keys(&self) -> Vec<TileSpec> {
        self.state.lock().disk.keys()
    }
}

impl Drop for FileTileCache {
    fn drop(&mut self) {
        self.save_manifests();
        // Shutdown is a removal pass, not eviction: detach every disk
        // entry so the files survive for the next run.
        self.state.lock().disk.clear();
    }
}

fn add_to_texture_cache(state: &mut CacheState, spec: TileSpec, texture: Arc<TileTexture>) {
    let cost = match state.cost_strategy_texture {
        CostStrategy::ByteSize => texture.byte_cost(),
        CostStrategy::Unitary => 1,
    };
    state.texture.insert(spec, texture, cost);
}

fn add_to_memory_cache(state: &mut CacheState, spec: TileSpec, bytes: Vec<u8>, format: String) {
    let cost = match state.cost_strategy_memory {
        CostStrategy::ByteSize => bytes.len() as u64,
        CostStrategy::Unitary => 1,
    };
    let tile = MemoryTile::new(spec.clone(), bytes, format);
    state.memory.insert(spec, Arc::new(tile), cost);
}

fn add_to_disk_cache(state: &mut CacheState, spec: TileSpec, filename: PathBuf) {
    let cost = disk_cost(state.cost_strategy_disk, &filename);
    let tile = DiskTile::new(spec.clone(), filename);
    state.disk.insert(spec, Arc::new(tile), cost);
}

fn disk_cost(strategy: CostStrategy, filename: &Path) -> u64 {
    match strategy {
        CostStrategy::ByteSize => fs::metadata(filename).map(|m| m.len()).unwrap_or(1),
        CostStrategy::Unitary => 1,
    }
}

/// Read the queue manifests, then scavenge files no manifest mentions.
fn load_tiles(state: &mut CacheState, directory: &Path) {
    let mut files: Vec<String> = match fs::read_dir(directory) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(err) => {
            warn!(dir = %directory.display(), %err, "unable to scan tile cache directory");
            return;
        }
    };

    for index in 1..=4 {
        let path = directory.join(format!("queue{index}"));
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => continue,
        };

        let mut entries = Vec::new();
        for line in contents.lines() {
            let name = line.trim();
            if name.is_empty() || !files.iter().any(|f| f == name) {
                continue;
            }
            let Some(spec) = filename_to_tile_spec(name) else {
                continue;
            };
            files.retain(|f| f != name);

            let filename = directory.join(name);
            let cost = disk_cost(state.cost_strategy_disk, &filename);
            entries.push((spec.clone(), Arc::new(DiskTile::new(spec, filename)), cost));
        }
        state.disk.deserialize_queue(index, entries);
    }

    // Files no manifest accounted for survive a crash that lost the
    // queue files; pick them up so they are not stranded forever.
    for name in files {
        if let Some(spec) = filename_to_tile_spec(&name) {
            debug!(%spec, "scavenged unmanifested tile file");
            add_to_disk_cache(state, spec, directory.join(name));
        }
    }
}

fn for_each_tile_file(directory: &Path, mut op: impl FnMut(TileSpec, &Path)) {
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(spec) = filename_to_tile_spec(&name) {
            op(spec, &entry.path());
        }
    }
}

/// The per-user cache location, falling back to the system temporary
/// directory when the shared location is missing or read-only.
fn base_cache_directory() -> PathBuf {
    if let Some(dir) = dirs::cache_dir() {
        if fs::create_dir_all(&dir).is_ok() {
            let probe = dir.join("cartograph_cache_check");
            if fs::write(&probe, b"").is_ok() {
                let _ = fs::remove_file(&probe);
                return dir;
            }
        }
    }
    std::env::temp_dir()
}

/// Remove stray tile files from layout versions that stored tiles
/// directly under the cache root.
fn purge_legacy_files(root: &Path) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            let _ = fs::remove_file(entry.path());
        }
    }
}

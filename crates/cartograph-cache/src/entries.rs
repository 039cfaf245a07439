//! Cached tile entries for the memory and disk tiers.

use cartograph_core::TileSpec;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// A tile resident in the compressed-memory tier.
#[derive(Debug, Clone)]
pub struct MemoryTile {
    /// The tile these bytes belong to.
    pub spec: TileSpec,
    /// Compressed image bytes as delivered by the fetcher.
    pub bytes: Vec<u8>,
    /// Image format tag of the bytes, e.g. `png`.
    pub format: String,
}

impl MemoryTile {
    /// Create a memory entry.
    pub fn new(spec: TileSpec, bytes: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            spec,
            bytes,
            format: format.into(),
        }
    }
}

/// A tile resident in the disk tier.
///
/// The entry stays linked to its backing file while it lives in the
/// cache. Dropping a linked entry deletes the file; the eviction policy
/// unlinks entries that leave the cache for any reason other than real
/// cost pressure, so administrative removal and shutdown keep the files
/// in place.
#[derive(Debug)]
pub struct DiskTile {
    /// The tile the file contains.
    pub spec: TileSpec,
    /// Absolute path of the tile file.
    pub filename: PathBuf,
    linked: AtomicBool,
}

impl DiskTile {
    /// Create a linked disk entry.
    pub fn new(spec: TileSpec, filename: PathBuf) -> Self {
        Self {
            spec,
            filename,
            linked: AtomicBool::new(true),
        }
    }

    /// Detach the entry from its file so dropping it leaves the file
    /// alone.
    pub fn unlink(&self) {
        self.linked.store(false, Ordering::Release);
    }

    /// Whether dropping this entry would delete the backing file.
    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Acquire)
    }
}

impl Drop for DiskTile {
    fn drop(&mut self) {
        if *self.linked.get_mut() {
            let _ = std::fs::remove_file(&self.filename);
        }
    }
}

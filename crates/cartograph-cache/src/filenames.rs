//! Bijective mapping between tile specs and on-disk file names.
//!
//! A tile is stored as
//! `{plugin}-{mapId}-{zoom}-{x}-{y}[-{version}].{format}`; the version
//! suffix is omitted for unversioned tiles. The reverse parser rejects
//! anything that does not round-trip, which keeps the startup scavenger
//! from loading names it did not write.

use cartograph_core::TileSpec;
use std::path::{Path, PathBuf};

/// Build the full path of a tile file under `directory`.
pub fn tile_spec_to_filename(spec: &TileSpec, format: &str, directory: &Path) -> PathBuf {
    let mut name = format!(
        "{}-{}-{}-{}-{}",
        spec.plugin, spec.map_id, spec.zoom, spec.x, spec.y
    );
    if spec.version != -1 {
        name.push('-');
        name.push_str(&spec.version.to_string());
    }
    name.push('.');
    name.push_str(format);
    directory.join(name)
}

/// Parse a basename back into a tile spec. Returns `None` for any name
/// the codec would not have produced.
pub fn filename_to_tile_spec(basename: &str) -> Option<TileSpec> {
    let mut dot_parts = basename.split('.');
    let name = dot_parts.next()?;
    dot_parts.next()?;
    if dot_parts.next().is_some() {
        return None;
    }

    let fields: Vec<&str> = name.split('-').collect();
    if fields.len() != 5 && fields.len() != 6 {
        return None;
    }

    let mut numbers = Vec::with_capacity(5);
    for field in &fields[1..] {
        numbers.push(field.parse::<i32>().ok()?);
    }
    if numbers.len() < 5 {
        numbers.push(-1);
    }

    Some(TileSpec::with_version(
        fields[0], numbers[0], numbers[1], numbers[2], numbers[3], numbers[4],
    ))
}

//! Decoded tile textures.

use crate::error::{CacheError, Result};
use cartograph_core::TileSpec;
use image::RgbaImage;

/// A decoded raster for one tile.
///
/// Textures are shared (`Arc`) between the texture cache tier and any
/// scene subtree currently displaying the tile; the raster is released
/// when the last holder drops its handle.
#[derive(Debug, Clone)]
pub struct TileTexture {
    /// The tile this raster belongs to.
    pub spec: TileSpec,
    /// Decoded pixels, RGBA8.
    pub image: RgbaImage,
}

impl TileTexture {
    /// Decode compressed tile bytes into a texture.
    pub fn decode(spec: TileSpec, bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|source| CacheError::Decode {
                spec: spec.clone(),
                source,
            })?
            .to_rgba8();
        Ok(Self { spec, image })
    }

    /// Byte cost of the decoded raster, `width * height * 4`.
    pub fn byte_cost(&self) -> u64 {
        u64::from(self.image.width()) * u64::from(self.image.height()) * 4
    }

    /// Edge length of the raster in pixels (tiles are square).
    pub fn width(&self) -> u32 {
        self.image.width()
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::png_bytes;
    use super::*;

    #[test]
    fn decode_round_trips_pixels() {
        let spec = TileSpec::new("osm", 1, 2, 1, 1);
        let tex = TileTexture::decode(spec.clone(), &png_bytes(4, 4)).unwrap();
        assert_eq!(tex.spec, spec);
        assert_eq!(tex.image.dimensions(), (4, 4));
        assert_eq!(tex.image.get_pixel(0, 0), &image::Rgba([10, 20, 30, 255]));
        assert_eq!(tex.byte_cost(), 64);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let spec = TileSpec::new("osm", 1, 2, 1, 1);
        let err = TileTexture::decode(spec, b"not an image").unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));
    }
}

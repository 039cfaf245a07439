//! The retained scene graph handed to the renderer.
//!
//! The graph is plain data: a clip rect, an item-space matrix, and
//! three tile containers (the main map plus the wrap-around copies on
//! either side of the dateline), each holding a camera matrix and the
//! textured quads of its visible tiles. The renderer owns nothing here
//! but uploading and drawing; the engine side diffs the containers in
//! place on every update.

use super::{project_point, TiledMapScene, SCALE_FACTOR};
use cartograph_cache::TileTexture;
use cartograph_core::TileSpec;
use glam::{DMat4, DVec2, DVec3};
use std::collections::HashMap;
use std::sync::Arc;

/// Texture sampling mode for one quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFiltering {
    /// Nearest-neighbour sampling; exact at integer zoom.
    Nearest,
    /// Bilinear sampling.
    Linear,
    /// Bilinear sampling with mipmaps, for oversized tile rasters.
    MipmapLinear,
}

/// An axis-aligned rectangle given by two corner points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadRect {
    /// First corner.
    pub p1: DVec2,
    /// Opposite corner.
    pub p2: DVec2,
}

impl QuadRect {
    /// The four corners, for polygon viewport tests.
    pub fn corners(&self) -> [DVec2; 4] {
        [
            self.p1,
            DVec2::new(self.p2.x, self.p1.y),
            self.p2,
            DVec2::new(self.p1.x, self.p2.y),
        ]
    }
}

/// One textured tile quad.
#[derive(Debug, Clone)]
pub struct ImageQuadNode {
    /// The tile this quad displays.
    pub spec: TileSpec,
    /// Target rectangle in map-edge units.
    pub rect: QuadRect,
    /// Source rectangle in texture pixels.
    pub source_rect: QuadRect,
    /// The raster to sample. May belong to a coarser tile when
    /// over-zooming; `source_rect` then selects the matching part.
    pub texture: Arc<TileTexture>,
    /// Sampling mode.
    pub filtering: TextureFiltering,
    /// Texture coordinates are vertically flipped.
    pub mirror_vertically: bool,
}

/// A set of tile quads under one camera matrix.
#[derive(Debug, Default)]
pub struct TileContainerNode {
    /// Combined projection and camera matrix for this map copy.
    pub matrix: DMat4,
    /// The quads, keyed by tile.
    pub tiles: HashMap<TileSpec, ImageQuadNode>,
}

/// Root of the retained scene graph.
#[derive(Debug, Default)]
pub struct MapSceneNode {
    /// Viewport clip rectangle in pixels, anchored at the origin.
    pub clip_rect: (u32, u32),
    /// Matrix mapping normalized device coordinates to item space.
    pub item_matrix: DMat4,
    /// The majority of the tiles.
    pub tiles: TileContainerNode,
    /// Tiles wrapping around on the left when zoomed out.
    pub wrap_left: TileContainerNode,
    /// Tiles wrapping around on the right.
    pub wrap_right: TileContainerNode,
    /// Whether quads were last built with linear filtering.
    pub is_texture_linear: bool,
}

impl MapSceneNode {
    fn remove_everywhere(&mut self, spec: &TileSpec) {
        self.tiles.tiles.remove(spec);
        self.wrap_left.tiles.remove(spec);
        self.wrap_right.tiles.remove(spec);
    }

    fn clear(&mut self) {
        self.tiles.tiles.clear();
        self.wrap_left.tiles.clear();
        self.wrap_right.tiles.clear();
    }
}

impl TiledMapScene {
    /// Diff the retained scene graph against the current scene state.
    /// Pass the previous frame's graph back in to update it in place;
    /// returns `None` for an empty viewport.
    pub fn update_scene_graph(
        &mut self,
        old_node: Option<MapSceneNode>,
        pixel_ratio: f64,
    ) -> Option<MapSceneNode> {
        let (width, height) = self.screen_size;
        if width == 0 || height == 0 {
            return None;
        }

        let mut root = old_node.unwrap_or_default();
        root.clip_rect = (width, height);

        let w = f64::from(width);
        let h = f64::from(height);
        root.item_matrix = DMat4::from_scale(DVec3::new(w / 2.0, h / 2.0, 1.0))
            * DMat4::from_translation(DVec3::new(1.0, 1.0, 0.0))
            * DMat4::from_scale(DVec3::new(1.0, -1.0, 1.0));

        if std::mem::take(&mut self.drop_textures) {
            root.clear();
        }

        // Evict quads whose over-zoom stand-in was superseded by the
        // exact texture.
        for spec in std::mem::take(&mut self.updated_textures) {
            root.remove_everywhere(&spec);
        }

        let side = SCALE_FACTOR * f64::from(self.tile_size) * f64::from(self.side_length);

        self.update_container(&mut root.tiles, 0.0, pixel_ratio);
        self.update_container(&mut root.wrap_left, side, pixel_ratio);
        self.update_container(&mut root.wrap_right, -side, pixel_ratio);

        root.is_texture_linear = self.linear_scaling;

        Some(root)
    }

    fn update_container(
        &self,
        container: &mut TileContainerNode,
        camera_adjust: f64,
        pixel_ratio: f64,
    ) {
        let mut eye = self.camera_eye;
        eye.x += camera_adjust;
        let mut center = self.camera_center;
        center.x += camera_adjust;

        let camera_matrix = DMat4::look_at_rh(eye, center, self.camera_up);
        container.matrix = self.projection * camera_matrix;

        let straight = !self.is_tilted_or_rotated();

        // drop quads that left the visible set
        let stale: Vec<TileSpec> = container
            .tiles
            .keys()
            .filter(|spec| !self.visible_tiles.contains(*spec))
            .cloned()
            .collect();
        for spec in stale {
            container.tiles.remove(&spec);
        }

        // refresh surviving quads against the new camera
        let resident: Vec<TileSpec> = container.tiles.keys().cloned().collect();
        for spec in resident {
            let Some(node) = container.tiles.get(&spec) else {
                continue;
            };
            let texture = Arc::clone(&node.texture);
            match self.build_geometry(&spec, &texture) {
                Some((rect, source_rect, overzoom))
                    if tile_in_viewport(&rect, &container.matrix, straight) =>
                {
                    let filtering = self.select_filtering(&texture, overzoom, pixel_ratio);
                    if let Some(node) = container.tiles.get_mut(&spec) {
                        node.rect = rect;
                        node.source_rect = source_rect;
                        node.filtering = filtering;
                    }
                }
                _ => {
                    container.tiles.remove(&spec);
                }
            }
        }

        // add quads for newly textured tiles
        for spec in &self.visible_tiles {
            if container.tiles.contains_key(spec) {
                continue;
            }
            let Some(texture) = self.textures.get(spec) else {
                continue;
            };
            let Some((rect, source_rect, overzoom)) = self.build_geometry(spec, texture) else {
                continue;
            };
            if !tile_in_viewport(&rect, &container.matrix, straight) {
                continue;
            }
            let filtering = self.select_filtering(texture, overzoom, pixel_ratio);
            container.tiles.insert(
                spec.clone(),
                ImageQuadNode {
                    spec: spec.clone(),
                    rect,
                    source_rect,
                    texture: Arc::clone(texture),
                    filtering,
                    mirror_vertically: true,
                },
            );
        }
    }

    fn select_filtering(
        &self,
        texture: &TileTexture,
        overzoom: bool,
        pixel_ratio: f64,
    ) -> TextureFiltering {
        if f64::from(texture.width()) > f64::from(self.tile_size) * pixel_ratio {
            // nearest sampling of mipmapped oversized rasters shimmers
            TextureFiltering::MipmapLinear
        } else if self.linear_scaling || overzoom {
            TextureFiltering::Linear
        } else {
            TextureFiltering::Nearest
        }
    }
}

fn tile_in_viewport(rect: &QuadRect, matrix: &DMat4, straight: bool) -> bool {
    let (min, max) = if straight {
        let p1 = project_point(matrix, rect.p1);
        let p2 = project_point(matrix, rect.p2);
        (p1.min(p2), p1.max(p2))
    } else {
        let corners = rect.corners().map(|c| project_point(matrix, c));
        let mut min = corners[0];
        let mut max = corners[0];
        for c in &corners[1..] {
            min = min.min(*c);
            max = max.max(*c);
        }
        (min, max)
    };

    min.x <= 1.0 && max.x >= -1.0 && min.y <= 1.0 && max.y >= -1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartograph_core::{CameraData, GeoCoordinate};
    use image::RgbaImage;
    use std::collections::BTreeSet;

    fn texture(spec: TileSpec, size: u32) -> Arc<TileTexture> {
        Arc::new(TileTexture {
            spec,
            image: RgbaImage::new(size, size),
        })
    }

    fn scene_at(zoom: f64, width: u32, height: u32) -> TiledMapScene {
        let mut resolver = crate::camera_tiles::CameraTiles::new();
        resolver.set_tile_size(256);
        let cam = CameraData {
            center: GeoCoordinate::new(0.0, 0.0),
            zoom,
            ..Default::default()
        };
        resolver.set_camera_data(cam);
        resolver.set_screen_size(width, height);

        let mut scene = TiledMapScene::new();
        scene.set_tile_size(256);
        scene.set_screen_size(width, height);
        scene.set_camera_data(cam);
        scene.set_visible_tiles(resolver.visible_tiles().clone());
        scene
    }

    fn texture_all(scene: &mut TiledMapScene) {
        for spec in scene.visible_tiles().clone() {
            scene.add_tile(spec.clone(), texture(spec, 256));
        }
    }

    #[test]
    fn empty_viewport_yields_no_graph() {
        let mut scene = TiledMapScene::new();
        assert!(scene.update_scene_graph(None, 1.0).is_none());
    }

    #[test]
    fn textured_tiles_become_quads() {
        let mut scene = scene_at(4.0, 512, 512);
        texture_all(&mut scene);

        let root = scene.update_scene_graph(None, 1.0).unwrap();
        assert_eq!(root.tiles.tiles.len(), scene.visible_tiles().len());
        assert_eq!(root.clip_rect, (512, 512));
        assert!(!root.is_texture_linear);

        for node in root.tiles.tiles.values() {
            assert!(node.mirror_vertically);
            assert_eq!(node.filtering, TextureFiltering::Nearest);
        }
    }

    #[test]
    fn fractional_zoom_switches_to_linear_filtering() {
        let mut scene = scene_at(4.3, 512, 512);
        texture_all(&mut scene);

        let root = scene.update_scene_graph(None, 1.0).unwrap();
        assert!(root.is_texture_linear);
        for node in root.tiles.tiles.values() {
            assert_eq!(node.filtering, TextureFiltering::Linear);
        }
    }

    #[test]
    fn oversized_rasters_get_mipmap_filtering() {
        let mut scene = scene_at(4.0, 512, 512);
        for spec in scene.visible_tiles().clone() {
            scene.add_tile(spec.clone(), texture(spec, 512));
        }

        let root = scene.update_scene_graph(None, 1.0).unwrap();
        for node in root.tiles.tiles.values() {
            assert_eq!(node.filtering, TextureFiltering::MipmapLinear);
        }
    }

    #[test]
    fn overzoom_placeholder_is_replaced_on_the_next_update() {
        let mut scene = scene_at(5.0, 512, 512);
        let child = scene.visible_tiles().iter().next().unwrap().clone();

        let parent = TileSpec::new(
            child.plugin.clone(),
            child.map_id,
            3,
            child.x / 4,
            child.y / 4,
        );
        scene.add_tile(child.clone(), texture(parent, 256));

        let root = scene.update_scene_graph(None, 1.0).unwrap();
        let node = &root.tiles.tiles[&child];
        assert_eq!(node.texture.spec.zoom, 3);
        assert_eq!(node.filtering, TextureFiltering::Linear);
        let mapped = node.source_rect.p2.x - node.source_rect.p1.x;
        assert!((mapped - 64.0).abs() < 1e-9);

        // The exact tile arrives: the placeholder quad is evicted and
        // rebuilt from the fine texture.
        scene.add_tile(child.clone(), texture(child.clone(), 256));
        let root = scene.update_scene_graph(Some(root), 1.0).unwrap();
        let node = &root.tiles.tiles[&child];
        assert_eq!(node.texture.spec, child);
        assert_eq!(node.source_rect.p2.x - node.source_rect.p1.x, 256.0);
    }

    #[test]
    fn clear_textured_tiles_empties_the_graph() {
        let mut scene = scene_at(4.0, 512, 512);
        texture_all(&mut scene);
        let root = scene.update_scene_graph(None, 1.0).unwrap();
        assert!(!root.tiles.tiles.is_empty());

        scene.clear_textured_tiles();
        let root = scene.update_scene_graph(Some(root), 1.0).unwrap();
        assert!(root.tiles.tiles.is_empty());
    }

    #[test]
    fn stale_quads_are_dropped_when_the_set_moves() {
        let mut scene = scene_at(4.0, 512, 512);
        texture_all(&mut scene);
        let root = scene.update_scene_graph(None, 1.0).unwrap();
        let before = root.tiles.tiles.len();
        assert!(before > 0);

        scene.set_visible_tiles(BTreeSet::new());
        let root = scene.update_scene_graph(Some(root), 1.0).unwrap();
        assert!(root.tiles.tiles.is_empty());
    }

    #[test]
    fn wrap_containers_fill_when_multiple_map_copies_fit() {
        // Zoom 0 in a large viewport: the world tile repeats on both
        // sides, served by the wrap containers.
        let mut scene = scene_at(0.0, 1024, 1024);
        texture_all(&mut scene);

        let root = scene.update_scene_graph(None, 1.0).unwrap();
        assert_eq!(root.tiles.tiles.len(), 1);
        assert_eq!(root.wrap_left.tiles.len(), 1);
        assert_eq!(root.wrap_right.tiles.len(), 1);

        // Far from the map edges only the main copy is on screen.
        let mut scene = scene_at(4.0, 512, 512);
        texture_all(&mut scene);
        let root = scene.update_scene_graph(None, 1.0).unwrap();
        assert!(!root.tiles.tiles.is_empty());
        assert!(root.wrap_left.tiles.is_empty());
        assert!(root.wrap_right.tiles.is_empty());
    }
}

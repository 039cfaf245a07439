//! Convex polygon splitting and map clipping for the frustum footprint.
//!
//! All polygons here are convex, right-handed, and live on the ground
//! plane z = 0 in map-tile units (one unit per tile edge at the active
//! integer zoom).

use cartograph_core::fuzzy::{fuzzy_compare, fuzzy_is_null};
use glam::DVec3;

pub(crate) type Polygon = Vec<DVec3>;

/// The footprint split into up to three polygons, each within
/// `x ∈ [0, side]`. `left` and `right` are the parts that wrapped
/// around the dateline.
pub(crate) struct ClippedFootprint {
    pub left: Polygon,
    pub mid: Polygon,
    pub right: Polygon,
}

pub(crate) fn axis_value(v: &DVec3, axis: usize) -> f64 {
    if axis == 0 {
        v.x
    } else {
        v.y
    }
}

/// Split a convex polygon along `axis = value` into the part below the
/// value and the part above it. Vertices on the line go to the side(s)
/// their neighbours make relevant; crossing edges contribute the
/// intersection point to both parts.
pub(crate) fn split_polygon_at_axis_value(
    polygon: &Polygon,
    axis: usize,
    value: f64,
) -> (Polygon, Polygon) {
    let mut below = Polygon::new();
    let mut above = Polygon::new();

    let size = polygon.len();
    if size == 0 {
        return (below, above);
    }

    let comparisons: Vec<i32> = polygon
        .iter()
        .map(|p| {
            let v = axis_value(p, axis);
            if fuzzy_compare(v - value + 1.0, 1.0) {
                0
            } else if v < value {
                -1
            } else {
                1
            }
        })
        .collect();

    for index in 0..size {
        let prev_index = (index + size - 1) % size;
        let next_index = (index + 1) % size;

        let prev_comp = comparisons[prev_index];
        let comp = comparisons[index];
        let next_comp = comparisons[next_index];

        if comp == 0 {
            match prev_comp {
                -1 => {
                    below.push(polygon[index]);
                    if next_comp == 1 {
                        above.push(polygon[index]);
                    }
                }
                1 => {
                    above.push(polygon[index]);
                    if next_comp == -1 {
                        below.push(polygon[index]);
                    }
                }
                _ => {
                    if next_comp == -1 {
                        below.push(polygon[index]);
                    } else if next_comp == 1 {
                        above.push(polygon[index]);
                    }
                }
            }
        } else {
            if comp == -1 {
                below.push(polygon[index]);
            } else {
                above.push(polygon[index]);
            }

            // The edge to the next vertex crosses the splitting line;
            // its intersection belongs to both parts.
            if next_comp != 0 && next_comp != comp {
                let p1 = polygon[index];
                let p2 = polygon[next_index];

                let p1v = axis_value(&p1, axis);
                let p2v = axis_value(&p2, axis);

                let f = (p1v - value) / (p1v - p2v);

                if (0.0..=1.0).contains(&f)
                    || fuzzy_compare(f + 1.0, 1.0)
                    || fuzzy_compare(f + 1.0, 2.0)
                {
                    let mid_point = (1.0 - f) * p1 + f * p2;
                    below.push(mid_point);
                    above.push(mid_point);
                }
            }
        }
    }

    (below, above)
}

fn add_x_offset(polygon: &mut Polygon, xoff: f64) {
    for v in polygon.iter_mut() {
        v.x += xoff;
    }
}

/// Clip the footprint to `y ∈ [0, side]` and split it at the vertical
/// map edges into up to three polygons, each translated into
/// `x ∈ [0, side]`.
///
/// A footprint that only touches a vertical edge without crossing it
/// still produces a degenerate sliver on the far side (width 1e-3) so
/// the adjacent tile column becomes visible.
pub(crate) fn clip_footprint_to_map(footprint: &Polygon, side_length: i32) -> ClippedFootprint {
    let side = f64::from(side_length);

    let mut clip_y0 = false;
    let mut clip_y1 = false;
    for p in footprint {
        if p.y < 0.0 {
            clip_y0 = true;
        }
        if p.y > side {
            clip_y1 = true;
        }
    }

    let mut results = footprint.clone();
    if clip_y0 {
        results = split_polygon_at_axis_value(&results, 1, 0.0).1;
    }
    if clip_y1 {
        results = split_polygon_at_axis_value(&results, 1, side).0;
    }

    let mut clip_x0 = false;
    let mut clip_x1 = false;
    for p in &results {
        if p.x < 0.0 || fuzzy_is_null(p.x) {
            clip_x0 = true;
        }
        if p.x > side || fuzzy_compare(side, p.x) {
            clip_x1 = true;
        }
    }

    let mut min_x = f64::MAX;
    let mut max_x = f64::MIN;
    for v in &results {
        min_x = min_x.min(v.x);
        max_x = max_x.max(v.x);
    }
    let footprint_width = max_x - min_x;

    if clip_x0 {
        if clip_x1 {
            if footprint_width > side {
                let mut right_part = split_polygon_at_axis_value(&results, 0, side).1;
                add_x_offset(&mut right_part, -side);
                // clip again, should the polygon span multiple copies
                let right_part = split_polygon_at_axis_value(&right_part, 0, side).0;

                let mut left_part = split_polygon_at_axis_value(&results, 0, 0.0).0;
                add_x_offset(&mut left_part, side);
                let left_part = split_polygon_at_axis_value(&left_part, 0, 0.0).1;

                let results = split_polygon_at_axis_value(&results, 0, 0.0).1;
                let results = split_polygon_at_axis_value(&results, 0, side).0;
                ClippedFootprint {
                    left: left_part,
                    mid: results,
                    right: right_part,
                }
            } else {
                // fitting the map square exactly
                let results = split_polygon_at_axis_value(&results, 0, 0.0).1;
                let results = split_polygon_at_axis_value(&results, 0, side).0;
                ClippedFootprint {
                    left: Polygon::new(),
                    mid: results,
                    right: Polygon::new(),
                }
            }
        } else {
            let (mut below, above) = split_polygon_at_axis_value(&results, 0, 0.0);
            if below.is_empty() {
                // touched the left edge but did not cross it
                for p in &above {
                    if fuzzy_is_null(p.x) {
                        below.push(*p);
                    }
                }
                if below.len() == 2 {
                    let y0 = below[0].y;
                    let y1 = below[1].y;
                    below.clear();
                    below.push(DVec3::new(side, y0, 0.0));
                    below.push(DVec3::new(side - 0.001, y0, 0.0));
                    below.push(DVec3::new(side - 0.001, y1, 0.0));
                    below.push(DVec3::new(side, y1, 0.0));
                } else if below.len() == 1 {
                    // single-point contact: a triangular sliver across
                    // the edge keeps the adjacent column visible
                    let y = below[0].y;
                    below.clear();
                    below.push(DVec3::new(side - 0.001, y, 0.0));
                    below.push(DVec3::new(side, y + 0.001, 0.0));
                    below.push(DVec3::new(side, y - 0.001, 0.0));
                }
            } else {
                add_x_offset(&mut below, side);
                if footprint_width > side {
                    below = split_polygon_at_axis_value(&below, 0, 0.0).1;
                }
            }
            ClippedFootprint {
                left: below,
                mid: above,
                right: Polygon::new(),
            }
        }
    } else if clip_x1 {
        let (below, mut above) = split_polygon_at_axis_value(&results, 0, side);
        if above.is_empty() {
            // touched the right edge but did not cross it
            for p in &below {
                if fuzzy_compare(side, p.x) {
                    above.push(*p);
                }
            }
            if above.len() == 2 {
                let y0 = above[0].y;
                let y1 = above[1].y;
                above.clear();
                above.push(DVec3::new(0.0, y0, 0.0));
                above.push(DVec3::new(0.001, y0, 0.0));
                above.push(DVec3::new(0.001, y1, 0.0));
                above.push(DVec3::new(0.0, y1, 0.0));
            } else if above.len() == 1 {
                let y = above[0].y;
                above.clear();
                above.push(DVec3::new(0.001, y, 0.0));
                above.push(DVec3::new(0.0, y - 0.001, 0.0));
                above.push(DVec3::new(0.0, y + 0.001, 0.0));
            }
        } else {
            add_x_offset(&mut above, -side);
            if footprint_width > side {
                above = split_polygon_at_axis_value(&above, 0, side).0;
            }
        }
        ClippedFootprint {
            left: Polygon::new(),
            mid: below,
            right: above,
        }
    } else {
        ClippedFootprint {
            left: Polygon::new(),
            mid: results,
            right: Polygon::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        vec![
            DVec3::new(x0, y0, 0.0),
            DVec3::new(x1, y0, 0.0),
            DVec3::new(x1, y1, 0.0),
            DVec3::new(x0, y1, 0.0),
        ]
    }

    #[test]
    fn split_keeps_both_halves() {
        let poly = square(0.0, 0.0, 4.0, 4.0);
        let (below, above) = split_polygon_at_axis_value(&poly, 0, 2.0);

        assert_eq!(below.len(), 4);
        assert_eq!(above.len(), 4);
        assert!(below.iter().all(|p| p.x <= 2.0 + 1e-9));
        assert!(above.iter().all(|p| p.x >= 2.0 - 1e-9));
    }

    #[test]
    fn split_entirely_on_one_side() {
        let poly = square(0.0, 0.0, 4.0, 4.0);
        let (below, above) = split_polygon_at_axis_value(&poly, 0, 10.0);
        assert_eq!(below.len(), 4);
        assert!(above.is_empty());
    }

    #[test]
    fn interior_footprint_stays_whole() {
        let poly = square(1.0, 1.0, 3.0, 3.0);
        let clipped = clip_footprint_to_map(&poly, 4);
        assert!(clipped.left.is_empty());
        assert!(clipped.right.is_empty());
        assert_eq!(clipped.mid.len(), 4);
    }

    #[test]
    fn footprint_across_the_left_edge_wraps() {
        let poly = square(-1.0, 1.0, 1.0, 3.0);
        let clipped = clip_footprint_to_map(&poly, 4);

        assert!(!clipped.left.is_empty());
        assert!(!clipped.mid.is_empty());
        assert!(clipped.right.is_empty());
        // The wrapped part lands against the right edge.
        assert!(clipped.left.iter().all(|p| p.x >= 3.0 - 1e-9));
        assert!(clipped.mid.iter().all(|p| (0.0..=1.0 + 1e-9).contains(&p.x)));
    }

    #[test]
    fn tangential_touch_produces_a_sliver() {
        // Touches x = 4 along one edge without crossing it.
        let poly = square(2.0, 1.0, 4.0, 3.0);
        let clipped = clip_footprint_to_map(&poly, 4);

        assert!(!clipped.right.is_empty());
        assert!(clipped.right.iter().all(|p| p.x <= 0.001 + 1e-9));
    }

    #[test]
    fn vertical_overflow_is_clipped() {
        let poly = square(1.0, -2.0, 3.0, 6.0);
        let clipped = clip_footprint_to_map(&poly, 4);
        assert!(clipped
            .mid
            .iter()
            .all(|p| p.y >= -1e-9 && p.y <= 4.0 + 1e-9));
    }
}

//! Bridging direction detection.
//!
//! A part bridges when it rests on separate islands of the layer below; the
//! skin infill then wants to run straight across the unsupported span. The
//! detector intersects the part outline with each part of the previous layer
//! (bounding-box pruned) and, when the part rests on a handful of islands,
//! returns the direction of the line joining the centres of mass of the two
//! largest. Anything else (no prior layer, fully supported, or resting on many
//! islands) returns -1: no preferred direction.

use crate::clipper;
use crate::storage::{SliceLayer, SliceLayerPart};

/// Preferred infill direction in degrees for `part`, or -1.
pub fn bridge_angle(part: &SliceLayerPart, prev_layer: &SliceLayer) -> i32 {
    let mut islands = Vec::new();
    for prev_part in &prev_layer.parts {
        if !part.boundary_box.hit(&prev_part.boundary_box) {
            continue;
        }
        for island in clipper::split_into_parts(
            &clipper::intersection(&part.outline, &prev_part.outline),
            false,
        ) {
            islands.push(island);
        }
    }

    // Resting on many islands is not a span with one direction
    if islands.len() > 5 || islands.len() < 2 {
        return -1;
    }

    // The span runs between the two largest resting islands
    let mut area0 = 0.0;
    let mut area1 = 0.0;
    let mut idx0 = usize::MAX;
    let mut idx1 = usize::MAX;
    for (n, island) in islands.iter().enumerate() {
        let area = island.area().abs();
        if area > area0 {
            area1 = area0;
            idx1 = idx0;
            area0 = area;
            idx0 = n;
        } else if area > area1 {
            area1 = area;
            idx1 = n;
        }
    }
    if idx0 == usize::MAX || idx1 == usize::MAX {
        return -1;
    }

    let center0 = islands[idx0][0].center_of_mass();
    let center1 = islands[idx1][0].center_of_mass();
    let dx = (center1.x - center0.x) as f64;
    let dy = (center1.y - center0.y) as f64;
    // Measured from the Y axis: an infill rotation of this angle lays the
    // scanline fill straight across the span.
    let mut angle = dx.atan2(dy).to_degrees();
    if angle < 0.0 {
        angle += 360.0;
    }
    angle.round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polygon, Polygons};
    use crate::storage::SliceLayerPart;
    use crate::Coord;

    fn part_from(polys: Vec<Polygon>) -> SliceLayerPart {
        let outline = Polygons::from_polygons(polys);
        SliceLayerPart {
            boundary_box: outline.bounding_box(),
            outline,
            bridge_angle: -1,
            ..Default::default()
        }
    }

    fn square(x: Coord, y: Coord, w: Coord, h: Coord) -> Polygon {
        Polygon::rectangle(Point::new(x, y), Point::new(x + w, y + h))
    }

    #[test]
    fn test_two_pillars_give_span_direction() {
        // A 30x10 slab resting on two 5x10 pillars at its ends
        let slab = part_from(vec![square(0, 0, 30_000, 10_000)]);
        let below = SliceLayer {
            z: 0,
            parts: vec![
                part_from(vec![square(0, 0, 5_000, 10_000)]),
                part_from(vec![square(25_000, 0, 5_000, 10_000)]),
            ],
        };
        let angle = bridge_angle(&slab, &below);
        // Span runs along X: a quarter turn from the scanline direction
        assert!(angle == 90 || angle == 270, "angle {}", angle);
    }

    #[test]
    fn test_vertical_span() {
        let slab = part_from(vec![square(0, 0, 10_000, 30_000)]);
        let below = SliceLayer {
            z: 0,
            parts: vec![
                part_from(vec![square(0, 0, 10_000, 5_000)]),
                part_from(vec![square(0, 25_000, 10_000, 5_000)]),
            ],
        };
        let angle = bridge_angle(&slab, &below);
        assert!(angle == 0 || angle == 180, "angle {}", angle);
    }

    #[test]
    fn test_fully_supported_is_not_a_bridge() {
        let slab = part_from(vec![square(0, 0, 10_000, 10_000)]);
        let below = SliceLayer {
            z: 0,
            parts: vec![part_from(vec![square(-1_000, -1_000, 12_000, 12_000)])],
        };
        assert_eq!(bridge_angle(&slab, &below), -1);
    }

    #[test]
    fn test_unsupported_part_has_no_direction() {
        let slab = part_from(vec![square(0, 0, 10_000, 10_000)]);
        let below = SliceLayer {
            z: 0,
            parts: vec![part_from(vec![square(50_000, 50_000, 10_000, 10_000)])],
        };
        assert_eq!(bridge_angle(&slab, &below), -1);
    }

    #[test]
    fn test_two_largest_islands_win() {
        // Two big pillars and a small one: the small one is ignored
        let slab = part_from(vec![square(0, 0, 30_000, 10_000)]);
        let below = SliceLayer {
            z: 0,
            parts: vec![
                part_from(vec![square(0, 0, 5_000, 10_000)]),
                part_from(vec![square(14_000, 4_000, 2_000, 2_000)]),
                part_from(vec![square(25_000, 0, 5_000, 10_000)]),
            ],
        };
        let angle = bridge_angle(&slab, &below);
        assert!(angle == 90 || angle == 270, "angle {}", angle);
    }

    #[test]
    fn test_many_islands_give_no_direction() {
        let slab = part_from(vec![square(0, 0, 70_000, 10_000)]);
        let mut parts = Vec::new();
        for i in 0..7 {
            parts.push(part_from(vec![square(i * 10_000, 0, 4_000, 10_000)]));
        }
        let below = SliceLayer { z: 0, parts };
        assert_eq!(bridge_angle(&slab, &below), -1);
    }
}

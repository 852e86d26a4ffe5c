//! Wall (inset) generation.
//!
//! For a wall count N and extrusion width W, each part gets N nested inward
//! offsets of its outline at W/2, 3W/2, 5W/2, ... Generation stops early when
//! an offset collapses to nothing. The combing boundary is the outline shrunk
//! by one extrusion width; parts whose outermost wall collapses are dropped
//! from the layer.

use crate::clipper;
use crate::storage::{SliceLayer, SliceLayerPart};
use crate::Coord;

fn generate_part_insets(part: &mut SliceLayerPart, extrusion_width: Coord, inset_count: i32) {
    part.comb_boundary = clipper::offset(&part.outline, -extrusion_width);

    if inset_count == 0 {
        // Spiralize-style single wall directly on the outline
        part.insets.push(part.outline.clone());
        return;
    }

    for i in 0..inset_count as Coord {
        let inset = clipper::offset(&part.outline, -extrusion_width * i - extrusion_width / 2);
        if inset.is_empty() {
            break;
        }
        part.insets.push(inset);
    }
}

/// Generate insets for every part of a layer, dropping parts too small to
/// carry a single wall.
pub fn generate_insets(layer: &mut SliceLayer, extrusion_width: Coord, inset_count: i32) {
    for part in &mut layer.parts {
        generate_part_insets(part, extrusion_width, inset_count);
    }
    layer.parts.retain(|part| !part.insets.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polygon, Polygons};
    use crate::storage::SliceLayerPart;

    fn part(size: Coord) -> SliceLayerPart {
        let outline: Polygons =
            Polygon::rectangle(Point::new(0, 0), Point::new(size, size)).into();
        SliceLayerPart {
            boundary_box: outline.bounding_box(),
            outline,
            bridge_angle: -1,
            ..Default::default()
        }
    }

    fn layer_with(parts: Vec<SliceLayerPart>) -> SliceLayer {
        SliceLayer {
            z: 0,
            parts,
        }
    }

    #[test]
    fn test_inset_count_and_spacing() {
        let mut layer = layer_with(vec![part(10_000)]);
        generate_insets(&mut layer, 400, 2);

        let part = &layer.parts[0];
        assert_eq!(part.insets.len(), 2);
        // inset[0] at W/2: 10mm square becomes 9.6mm
        let bb0 = part.insets[0].bounding_box();
        assert_eq!(bb0.min, Point::new(200, 200));
        assert_eq!(bb0.max, Point::new(9_800, 9_800));
        // inset[1] at 3W/2
        let bb1 = part.insets[1].bounding_box();
        assert_eq!(bb1.min, Point::new(600, 600));
    }

    #[test]
    fn test_inset_area_monotonically_decreases() {
        let mut layer = layer_with(vec![part(10_000)]);
        generate_insets(&mut layer, 400, 8);

        let insets = &layer.parts[0].insets;
        assert!(insets.len() >= 2);
        for pair in insets.windows(2) {
            assert!(pair[1].area() <= pair[0].area());
        }
    }

    #[test]
    fn test_collapse_stops_early() {
        // A 1mm square fits one 0.4mm wall but not four
        let mut layer = layer_with(vec![part(1_000)]);
        generate_insets(&mut layer, 400, 4);

        let insets = &layer.parts[0].insets;
        assert!(!insets.is_empty());
        assert!(insets.len() < 4);
    }

    #[test]
    fn test_too_small_part_is_dropped() {
        let mut layer = layer_with(vec![part(10_000), part(300)]);
        generate_insets(&mut layer, 400, 2);
        assert_eq!(layer.parts.len(), 1);
    }

    #[test]
    fn test_zero_inset_count_keeps_outline() {
        let mut layer = layer_with(vec![part(10_000)]);
        generate_insets(&mut layer, 400, 0);
        assert_eq!(layer.parts[0].insets.len(), 1);
        assert_eq!(layer.parts[0].insets[0], layer.parts[0].outline);
    }

    #[test]
    fn test_comb_boundary_inside_outline() {
        let mut layer = layer_with(vec![part(10_000)]);
        generate_insets(&mut layer, 400, 2);
        let bb = layer.parts[0].comb_boundary.bounding_box();
        assert_eq!(bb.min, Point::new(400, 400));
    }
}

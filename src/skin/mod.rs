//! Skin and sparse-infill region generation.
//!
//! Skin is the solid surface where a part is exposed above or below: the area
//! inside the walls minus whatever is still covered `downSkinCount` layers
//! below and `upSkinCount` layers above. What remains of the interior becomes
//! sparse infill. Both generators only read the neighbouring layers; they
//! mutate nothing but their own layer's parts.

use crate::clipper;
use crate::geometry::Polygons;
use crate::storage::SliceVolumeStorage;
use crate::Coord;
use std::f64::consts::PI;

/// Exposed patches smaller than this fraction of a wall loop are noise.
fn min_skin_area(extrusion_width: Coord) -> f64 {
    2.0 * PI * (extrusion_width as f64) * (extrusion_width as f64) * 0.3
}

/// Skin patches below this area (um^2) are filled sparsely instead; tiny
/// solid islands in large sparse regions only cause blobs.
const SPARSE_MIN_SKIN_AREA: f64 = 3.0e6;

/// Innermost wall regions of every part of `layer_nr` whose bounding box
/// overlaps `own_box`.
fn covering_regions(
    storage: &SliceVolumeStorage,
    layer_nr: usize,
    own_box: &crate::geometry::Aabb,
) -> Vec<Polygons> {
    storage.layers[layer_nr]
        .parts
        .iter()
        .filter(|p| p.boundary_box.hit(own_box))
        .filter_map(|p| p.insets.last().cloned())
        .collect()
}

/// Derive the skin outline of every part of layer `layer_nr`.
pub fn generate_skins(
    layer_nr: usize,
    storage: &mut SliceVolumeStorage,
    extrusion_width: Coord,
    down_skin_count: i32,
    up_skin_count: i32,
) {
    let layer_count = storage.layers.len();
    let part_count = storage.layers[layer_nr].parts.len();

    for part_idx in 0..part_count {
        let own_box = storage.layers[layer_nr].parts[part_idx].boundary_box;
        let innermost = match storage.layers[layer_nr].parts[part_idx].insets.last() {
            Some(inset) => inset.clone(),
            None => continue,
        };
        let inside = clipper::offset(&innermost, -(extrusion_width / 2));

        let mut downskin = inside.clone();
        if layer_nr >= down_skin_count as usize && down_skin_count > 0 {
            let below = layer_nr - down_skin_count as usize;
            for cover in covering_regions(storage, below, &own_box) {
                downskin = clipper::difference(&downskin, &cover);
            }
        }

        let mut upskin = inside;
        if layer_nr + (up_skin_count as usize) < layer_count && up_skin_count > 0 {
            let above = layer_nr + up_skin_count as usize;
            for cover in covering_regions(storage, above, &own_box) {
                upskin = clipper::difference(&upskin, &cover);
            }
        }

        let mut skin = clipper::union(&downskin, &upskin);
        let min_area = min_skin_area(extrusion_width);
        skin.retain(|poly| poly.area().abs() >= min_area);

        storage.layers[layer_nr].parts[part_idx].skin_outline = skin;
    }
}

/// Derive the sparse-infill outline of every part of layer `layer_nr`.
/// Must run after [`generate_skins`] logic conceptually, but recomputes the
/// exposure itself so the two stay independent.
pub fn generate_sparse(
    layer_nr: usize,
    storage: &mut SliceVolumeStorage,
    extrusion_width: Coord,
    down_skin_count: i32,
    up_skin_count: i32,
) {
    let layer_count = storage.layers.len();
    let part_count = storage.layers[layer_nr].parts.len();

    for part_idx in 0..part_count {
        let own_box = storage.layers[layer_nr].parts[part_idx].boundary_box;
        let innermost = match storage.layers[layer_nr].parts[part_idx].insets.last() {
            Some(inset) => inset.clone(),
            None => continue,
        };
        let sparse = clipper::offset(&innermost, -(extrusion_width / 2));

        let mut downskin = sparse.clone();
        if layer_nr >= down_skin_count as usize && down_skin_count > 0 {
            let below = layer_nr - down_skin_count as usize;
            for cover in covering_regions(storage, below, &own_box) {
                downskin = clipper::difference(&downskin, &cover);
            }
        }

        let mut upskin = sparse.clone();
        if layer_nr + (up_skin_count as usize) < layer_count && up_skin_count > 0 {
            let above = layer_nr + up_skin_count as usize;
            for cover in covering_regions(storage, above, &own_box) {
                upskin = clipper::difference(&upskin, &cover);
            }
        }

        let mut skin = clipper::union(&downskin, &upskin);
        skin.retain(|poly| poly.area().abs() >= SPARSE_MIN_SKIN_AREA);

        storage.layers[layer_nr].parts[part_idx].sparse_outline =
            clipper::difference(&sparse, &skin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polygon, Polygons};
    use crate::inset::generate_insets;
    use crate::storage::{SliceLayer, SliceLayerPart};

    fn square_part(size: Coord) -> SliceLayerPart {
        let outline: Polygons =
            Polygon::rectangle(Point::new(0, 0), Point::new(size, size)).into();
        SliceLayerPart {
            boundary_box: outline.bounding_box(),
            outline,
            bridge_angle: -1,
            ..Default::default()
        }
    }

    /// A tower of identical 20mm square layers with insets generated.
    fn tower(layers: usize) -> SliceVolumeStorage {
        let mut storage = SliceVolumeStorage::default();
        for i in 0..layers {
            let mut layer = SliceLayer {
                z: 300 + i as Coord * 100,
                parts: vec![square_part(20_000)],
            };
            generate_insets(&mut layer, 400, 2);
            storage.layers.push(layer);
        }
        storage
    }

    #[test]
    fn test_bottom_layer_is_all_skin() {
        let mut storage = tower(10);
        generate_skins(0, &mut storage, 400, 2, 2);
        generate_sparse(0, &mut storage, 400, 2, 2);

        let part = &storage.layers[0].parts[0];
        assert!(part.skin_outline.area() > 0.0);
        assert!(part.sparse_outline.area().abs() < 1.0);
    }

    #[test]
    fn test_middle_layer_is_all_sparse() {
        let mut storage = tower(10);
        generate_skins(5, &mut storage, 400, 2, 2);
        generate_sparse(5, &mut storage, 400, 2, 2);

        let part = &storage.layers[5].parts[0];
        assert!(part.skin_outline.area().abs() < 1.0);
        assert!(part.sparse_outline.area() > 0.0);
    }

    #[test]
    fn test_top_layer_is_all_skin() {
        let mut storage = tower(10);
        generate_skins(9, &mut storage, 400, 2, 2);
        generate_sparse(9, &mut storage, 400, 2, 2);

        let part = &storage.layers[9].parts[0];
        assert!(part.skin_outline.area() > 0.0);
        assert!(part.sparse_outline.area().abs() < 1.0);
    }

    #[test]
    fn test_step_exposes_top_skin() {
        // A wide base with a narrow column on top: where the column does not
        // cover the base, the base's top layer is exposed
        let mut storage = SliceVolumeStorage::default();
        for i in 0..6 {
            let size = if i < 3 { 20_000 } else { 8_000 };
            let mut layer = SliceLayer {
                z: 300 + i as Coord * 100,
                parts: vec![square_part(size)],
            };
            generate_insets(&mut layer, 400, 2);
            storage.layers.push(layer);
        }

        generate_skins(2, &mut storage, 400, 1, 1);
        let part = &storage.layers[2].parts[0];
        let skin_area = part.skin_outline.area();
        // Exposed ring is roughly the base interior minus the column interior
        assert!(skin_area > 0.0);
        assert!(skin_area < 20_000.0 * 20_000.0);
        assert!(skin_area > 100e6);
    }

    #[test]
    fn test_sparse_plus_skin_covers_interior() {
        let mut storage = tower(10);
        generate_skins(2, &mut storage, 400, 6, 6);
        generate_sparse(2, &mut storage, 400, 6, 6);

        let part = &storage.layers[2].parts[0];
        let innermost = part.insets.last().unwrap();
        let interior = clipper::offset(innermost, -200);
        let total = part.skin_outline.area() + part.sparse_outline.area();
        assert!((total - interior.area()).abs() / interior.area() < 0.01);
    }
}

//! Bed adhesion helpers: skirt and raft.
//!
//! The skirt is a set of loops drawn around everything on the first layer to
//! prime the nozzle; loops keep being added past the configured count until
//! the accumulated perimeter reaches the configured minimum length. The raft
//! is a sacrificial base: its outline is stored here and emitted later as two
//! perpendicular line-infill sub-layers.

use crate::clipper;
use crate::geometry::Polygons;
use crate::settings::SliceSettings;
use crate::storage::SliceDataStorage;
use crate::support;
use crate::Coord;

/// Everything that touches the first layer, offset outward by `distance`.
fn first_layer_outline(
    storage: &SliceDataStorage,
    settings: &SliceSettings,
    distance: Coord,
) -> Polygons {
    let mut result = clipper::offset(&storage.wipe_tower, distance);
    for volume in &storage.volumes {
        if let Some(layer) = volume.layers.first() {
            for part in &layer.parts {
                result = clipper::union(&result, &clipper::offset(&part.outline, distance));
            }
        }
    }
    if storage.support.generated {
        let support_polys =
            support::support_polygons_at(storage, settings, settings.initial_layer_thickness);
        result = clipper::union(&result, &clipper::offset(&support_polys, distance));
    }
    result
}

/// Generate the skirt loops into `storage.skirt`.
pub fn generate_skirt(storage: &mut SliceDataStorage, settings: &SliceSettings) {
    let mut count = settings.skirt_line_count;
    let mut skirt_nr = 0;
    while skirt_nr < count {
        let offset_distance = settings.skirt_distance
            + settings.extrusion_width * skirt_nr as Coord
            + settings.extrusion_width / 2;

        let mut loop_polygons = first_layer_outline(storage, settings, offset_distance);
        // Inner holes of the first layer would draw useless loops inside it
        loop_polygons.retain(|poly| poly.area() > 0.0);

        storage.skirt.extend(&loop_polygons);

        let length = storage.skirt.polygon_length();
        if skirt_nr + 1 >= count && length > 0 && length < settings.skirt_min_length {
            count += 1;
        }
        skirt_nr += 1;
    }
}

/// Generate the raft outline into `storage.raft_outline`.
pub fn generate_raft(storage: &mut SliceDataStorage, settings: &SliceSettings) {
    storage.raft_outline = first_layer_outline(storage, settings, settings.raft_margin);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polygon, Polygons};
    use crate::storage::{SliceLayer, SliceLayerPart, SliceVolumeStorage};

    fn storage_with_first_layer(size: Coord) -> SliceDataStorage {
        let outline: Polygons =
            Polygon::rectangle(Point::new(0, 0), Point::new(size, size)).into();
        let part = SliceLayerPart {
            boundary_box: outline.bounding_box(),
            outline,
            bridge_angle: -1,
            ..Default::default()
        };
        let mut volume = SliceVolumeStorage::default();
        volume.layers.push(SliceLayer {
            z: 300,
            parts: vec![part],
        });
        SliceDataStorage {
            volumes: vec![volume],
            ..Default::default()
        }
    }

    #[test]
    fn test_single_skirt_loop() {
        let mut storage = storage_with_first_layer(20_000);
        let settings = SliceSettings::default();
        generate_skirt(&mut storage, &settings);

        assert_eq!(storage.skirt.len(), 1);
        // 20mm square offset by 6mm + W/2: 32.4mm square, perimeter 129.6mm
        let expected = 4 * (20_000 + 2 * (6_000 + 200));
        assert_eq!(storage.skirt.polygon_length(), expected);
    }

    #[test]
    fn test_min_length_adds_loops() {
        let mut storage = storage_with_first_layer(20_000);
        let mut settings = SliceSettings::default();
        settings.skirt_min_length = 300_000; // 300mm forces a second loop
        generate_skirt(&mut storage, &settings);

        assert!(storage.skirt.len() >= 2);
        assert!(storage.skirt.polygon_length() >= settings.skirt_min_length);
    }

    #[test]
    fn test_skirt_loops_are_spaced_one_width_apart() {
        let mut storage = storage_with_first_layer(20_000);
        let mut settings = SliceSettings::default();
        settings.skirt_line_count = 2;
        generate_skirt(&mut storage, &settings);

        assert_eq!(storage.skirt.len(), 2);
        let bb0 = storage.skirt[0].bounding_box();
        let bb1 = storage.skirt[1].bounding_box();
        assert_eq!(bb0.min.x - bb1.min.x, settings.extrusion_width);
    }

    #[test]
    fn test_raft_outline_margin() {
        let mut storage = storage_with_first_layer(20_000);
        let settings = SliceSettings::default();
        generate_raft(&mut storage, &settings);

        let bb = storage.raft_outline.bounding_box();
        assert_eq!(bb.min, Point::new(-5_000, -5_000));
        assert_eq!(bb.max, Point::new(25_000, 25_000));
    }

    #[test]
    fn test_no_first_layer_no_skirt() {
        let mut storage = SliceDataStorage::default();
        let settings = SliceSettings::default();
        generate_skirt(&mut storage, &settings);
        assert!(storage.skirt.is_empty());
    }
}

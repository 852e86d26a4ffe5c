//! Ooze shield generation.
//!
//! The ooze shield is a sacrificial wall printed around the model to catch
//! nozzle drool while another extruder works. Per layer, the shield is the
//! union of all part outlines offset outward by a guard distance, eroded and
//! dilated to remove slivers. Two relaxation passes, ascending then descending
//! layer index, union each layer's shield with its neighbour's shrunk by the
//! rise a maximum-overhang wall can manage per layer, which keeps the printed
//! wall continuous and self-supporting.

use crate::clipper;
use crate::geometry::Polygons;
use crate::settings::SliceSettings;
use crate::storage::SliceDataStorage;
use crate::Coord;

/// Populate `storage.ooze_shield`, one polygon set per layer.
pub fn generate_ooze_shield(storage: &mut SliceDataStorage, settings: &SliceSettings) {
    let total_layers = storage
        .volumes
        .iter()
        .map(|v| v.layers.len())
        .max()
        .unwrap_or(0);

    storage.ooze_shield.clear();
    for layer_nr in 0..total_layers {
        let mut shield = Polygons::new();
        for volume in &storage.volumes {
            if layer_nr >= volume.layers.len() {
                continue;
            }
            for part in &volume.layers[layer_nr].parts {
                shield = clipper::union(
                    &shield,
                    &clipper::offset(&part.outline, settings.ooze_shield_distance),
                );
            }
        }
        storage.ooze_shield.push(shield);
    }

    // Erode-dilate pass removes slivers narrower than twice the distance
    let sliver = settings.ooze_shield_sliver_distance;
    for shield in &mut storage.ooze_shield {
        let opened = clipper::offset(&clipper::offset(shield, -sliver), sliver);
        *shield = opened;
    }

    // Relaxation: each layer must be reachable from its neighbour within the
    // maximum overhang angle at this layer thickness
    let angle = (settings.ooze_shield_max_angle as f64).to_radians();
    let offset_angle = (angle.tan() * settings.layer_thickness as f64) as Coord;

    for layer_nr in 1..total_layers {
        let below = clipper::offset(&storage.ooze_shield[layer_nr - 1], -offset_angle);
        storage.ooze_shield[layer_nr] = clipper::union(&storage.ooze_shield[layer_nr], &below);
    }
    for layer_nr in (1..total_layers).rev() {
        let above = clipper::offset(&storage.ooze_shield[layer_nr], -offset_angle);
        storage.ooze_shield[layer_nr - 1] =
            clipper::union(&storage.ooze_shield[layer_nr - 1], &above);
    }
}

//! Slice storage model.
//!
//! Per-volume, per-layer polygon sets plus the global artifacts derived by the
//! pipeline (skirt, raft outline, per-layer ooze shield, wipe tower). A
//! [`SliceDataStorage`] is created once per model, populated in strict
//! pipeline order, and read-only during emission.

use crate::clipper;
use crate::geometry::{Aabb, Point, Point3, Polygons};
use crate::slice::Slicer;
use crate::support::SupportGrid;
use crate::Coord;

/// One connected region of a layer.
#[derive(Clone, Debug, Default)]
pub struct SliceLayerPart {
    /// Outer contour plus nested holes.
    pub outline: Polygons,
    /// Bounding box of the outline, for cheap overlap pruning.
    pub boundary_box: Aabb,
    /// Wall contours, outermost first.
    pub insets: Vec<Polygons>,
    /// Solid top/bottom surface region.
    pub skin_outline: Polygons,
    /// Sparse interior infill region.
    pub sparse_outline: Polygons,
    /// Preferred infill direction over unsupported spans (degrees); -1 unset.
    pub bridge_angle: i32,
    /// Region travel moves are constrained to.
    pub comb_boundary: Polygons,
}

/// All parts of one volume at one Z height.
#[derive(Clone, Debug, Default)]
pub struct SliceLayer {
    /// Height of this layer's cut (um).
    pub z: Coord,
    pub parts: Vec<SliceLayerPart>,
}

/// Bottom-to-top layers of one mesh volume.
#[derive(Clone, Debug, Default)]
pub struct SliceVolumeStorage {
    pub layers: Vec<SliceLayer>,
}

/// Everything derived for one model, in pipeline order.
#[derive(Clone, Debug, Default)]
pub struct SliceDataStorage {
    pub volumes: Vec<SliceVolumeStorage>,

    /// Skirt loops around the first layer.
    pub skirt: Polygons,
    /// Raft outline under the model.
    pub raft_outline: Polygons,
    /// Ooze shield, indexed by layer.
    pub ooze_shield: Vec<Polygons>,
    /// Wipe/prime tower shape, empty when disabled.
    pub wipe_tower: Polygons,
    /// Nozzle wipe position on the tower.
    pub wipe_point: Point,

    pub model_size: Point3,
    pub model_min: Point3,
    pub model_max: Point3,

    /// Column grid from the support-grid builder.
    pub support: SupportGrid,
}

/// Decompose a volume's sliced outlines into connected parts by containment.
/// `union_all` merges self-overlapping contours first (slicing fix for
/// malformed models).
pub fn create_layer_parts(
    storage: &mut SliceVolumeStorage,
    slicer: &Slicer,
    union_all: bool,
) {
    for sliced in &slicer.layers {
        let mut layer = SliceLayer {
            z: sliced.z,
            parts: Vec::new(),
        };
        for outline in clipper::split_into_parts(&sliced.polygons, union_all) {
            let boundary_box = outline.bounding_box();
            layer.parts.push(SliceLayerPart {
                outline,
                boundary_box,
                bridge_angle: -1,
                ..Default::default()
            });
        }
        storage.layers.push(layer);
    }
}

/// Expand the parts of each volume into the regions covered by the other
/// volumes, so adjacent volumes of one model bond when printed.
pub fn generate_multi_volume_overlap(volumes: &mut [SliceVolumeStorage], overlap: Coord) {
    if volumes.len() < 2 || overlap <= 0 {
        return;
    }
    let layer_count = volumes.iter().map(|v| v.layers.len()).min().unwrap_or(0);

    for layer_nr in 0..layer_count {
        for volume_idx in 0..volumes.len() {
            let mut others = Polygons::new();
            for (other_idx, other) in volumes.iter().enumerate() {
                if other_idx == volume_idx {
                    continue;
                }
                for part in &other.layers[layer_nr].parts {
                    others.extend(&part.outline);
                }
            }
            if others.is_empty() {
                continue;
            }
            for part in &mut volumes[volume_idx].layers[layer_nr].parts {
                let grown = clipper::offset(&part.outline, overlap / 2);
                let gained = clipper::intersection(&grown, &others);
                part.outline = clipper::union(&part.outline, &gained);
                part.boundary_box = part.outline.bounding_box();
            }
        }
    }
}

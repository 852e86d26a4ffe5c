//! Support structures.
//!
//! A column grid over the build area records, per 200 um cell, the heights at
//! which model surfaces cross that column and how flat those surfaces are.
//! The grid is built once from the optimised mesh; per-layer queries project
//! the supported cells into polygons, subtract the model outlines grown by the
//! XY clearance, smooth the result and split it into islands that are filled
//! with alternating line infill.

use crate::clipper;
use crate::geometry::{Point, Polygon, Polygons};
use crate::infill::generate_line_infill;
use crate::optimize::OptimizedMesh;
use crate::settings::SliceSettings;
use crate::storage::SliceDataStorage;
use crate::Coord;

/// Cell size of the support grid (um).
const GRID_SCALE: Coord = 200;

/// One model-surface crossing of a grid column.
#[derive(Clone, Copy, Debug)]
pub struct SupportPoint {
    /// Height of the surface at this column (um).
    pub z: Coord,
    /// Cosine of the surface tilt: 1.0 is flat, 0.0 vertical.
    pub cos_angle: f64,
}

/// Per-column support height grid.
#[derive(Clone, Debug, Default)]
pub struct SupportGrid {
    pub generated: bool,
    pub grid_offset: Point,
    pub grid_width: usize,
    pub grid_height: usize,
    /// Surface crossings per column, sorted by height.
    pub grid: Vec<Vec<SupportPoint>>,
}

impl SupportGrid {
    fn column(&self, x: usize, y: usize) -> &[SupportPoint] {
        &self.grid[x + y * self.grid_width]
    }
}

/// Rasterise the model into the support grid. Disabled (and flagged so) when
/// the overhang threshold is negative.
pub fn generate_support_grid(
    storage: &mut SliceDataStorage,
    mesh: &OptimizedMesh,
    settings: &SliceSettings,
) {
    let grid = &mut storage.support;
    grid.generated = settings.support_angle >= 0;
    if !grid.generated {
        return;
    }

    grid.grid_offset = Point::new(mesh.min.x, mesh.min.y);
    grid.grid_width = ((mesh.max.x - mesh.min.x) / GRID_SCALE + 1) as usize;
    grid.grid_height = ((mesh.max.y - mesh.min.y) / GRID_SCALE + 1) as usize;
    grid.grid = vec![Vec::new(); grid.grid_width * grid.grid_height];

    for volume in &mesh.volumes {
        for face in &volume.faces {
            let p0 = volume.points[face[0] as usize];
            let p1 = volume.points[face[1] as usize];
            let p2 = volume.points[face[2] as usize];

            // Full 3D normal; its z-component equals the projected 2D cross
            let ux = (p1.x - p0.x) as f64;
            let uy = (p1.y - p0.y) as f64;
            let uz = (p1.z - p0.z) as f64;
            let vx = (p2.x - p0.x) as f64;
            let vy = (p2.y - p0.y) as f64;
            let vz = (p2.z - p0.z) as f64;
            let nx = uy * vz - uz * vy;
            let ny = uz * vx - ux * vz;
            let nz = ux * vy - uy * vx;
            let nlen = (nx * nx + ny * ny + nz * nz).sqrt();
            if nlen == 0.0 || nz.abs() < 1e-9 {
                continue; // degenerate or vertical: no column crossing
            }
            let cos_angle = nz.abs() / nlen;

            let min_x = p0.x.min(p1.x).min(p2.x);
            let max_x = p0.x.max(p1.x).max(p2.x);
            let min_y = p0.y.min(p1.y).min(p2.y);
            let max_y = p0.y.max(p1.y).max(p2.y);

            let ix0 = ((min_x - grid.grid_offset.x) / GRID_SCALE).max(0) as usize;
            let ix1 = (((max_x - grid.grid_offset.x) / GRID_SCALE) as usize)
                .min(grid.grid_width - 1);
            let iy0 = ((min_y - grid.grid_offset.y) / GRID_SCALE).max(0) as usize;
            let iy1 = (((max_y - grid.grid_offset.y) / GRID_SCALE) as usize)
                .min(grid.grid_height - 1);

            for iy in iy0..=iy1 {
                for ix in ix0..=ix1 {
                    let cx = (grid.grid_offset.x + ix as Coord * GRID_SCALE + GRID_SCALE / 2)
                        as f64;
                    let cy = (grid.grid_offset.y + iy as Coord * GRID_SCALE + GRID_SCALE / 2)
                        as f64;

                    // Barycentric coordinates of the cell centre
                    let dx = cx - p0.x as f64;
                    let dy = cy - p0.y as f64;
                    let beta = (dx * vy - dy * vx) / nz;
                    let gamma = (ux * dy - uy * dx) / nz;
                    if beta < 0.0 || gamma < 0.0 || beta + gamma > 1.0 {
                        continue;
                    }
                    let z = p0.z as f64 + beta * uz + gamma * vz;
                    grid.grid[ix + iy * grid.grid_width].push(SupportPoint {
                        z: z.round() as Coord,
                        cos_angle,
                    });
                }
            }
        }
    }

    for column in &mut grid.grid {
        column.sort_by_key(|p| p.z);
    }
}

fn needs_support(column: &[SupportPoint], z: Coord, settings: &SliceSettings) -> bool {
    if column.is_empty() {
        return false;
    }
    let cos_threshold = (settings.support_angle as f64).to_radians().cos();
    let clearance = settings.support_z_distance;

    if !settings.support_everywhere {
        // Only columns reaching the bed: everything hangs from the lowest
        // surface of the model
        let first = column[0];
        return first.cos_angle >= cos_threshold && z < first.z - clearance;
    }

    // Inside the model there is no room for support
    let below = column.iter().take_while(|p| p.z <= z).count();
    if below % 2 == 1 {
        return false;
    }
    // The next surface up must be clear of the column and flat enough
    match column[below..].iter().find(|p| p.z > z + clearance) {
        Some(surface) => surface.cos_angle >= cos_threshold,
        None => false,
    }
}

/// Project the support grid at height `z` into polygons: supported cell runs
/// become rectangles, unioned into contours.
pub fn support_polygons_at(
    storage: &SliceDataStorage,
    settings: &SliceSettings,
    z: Coord,
) -> Polygons {
    let grid = &storage.support;
    if !grid.generated || grid.grid.is_empty() {
        return Polygons::new();
    }

    let mut rects = Polygons::new();
    for y in 0..grid.grid_height {
        let mut run_start: Option<usize> = None;
        for x in 0..=grid.grid_width {
            let supported =
                x < grid.grid_width && needs_support(grid.column(x, y), z, settings);
            match (supported, run_start) {
                (true, None) => run_start = Some(x),
                (false, Some(start)) => {
                    let min = Point::new(
                        grid.grid_offset.x + start as Coord * GRID_SCALE,
                        grid.grid_offset.y + y as Coord * GRID_SCALE,
                    );
                    let max = Point::new(
                        grid.grid_offset.x + x as Coord * GRID_SCALE,
                        grid.grid_offset.y + (y + 1) as Coord * GRID_SCALE,
                    );
                    rects.push(Polygon::rectangle(min, max));
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    clipper::union_all(&rects)
}

/// Derive the printable support islands for one layer: grid projection minus
/// every part outline grown by the XY clearance, smoothed by an
/// erode-then-dilate pass at three extrusion widths.
pub fn generate_support_areas(
    storage: &SliceDataStorage,
    settings: &SliceSettings,
    layer_nr: usize,
    z: Coord,
) -> Vec<Polygons> {
    let mut polygons = support_polygons_at(storage, settings, z);
    if polygons.is_empty() {
        return Vec::new();
    }

    for volume in &storage.volumes {
        if layer_nr >= volume.layers.len() {
            continue;
        }
        for part in &volume.layers[layer_nr].parts {
            polygons = clipper::difference(
                &polygons,
                &clipper::offset(&part.outline, settings.support_xy_distance),
            );
        }
    }

    let smooth = settings.extrusion_width * 3;
    polygons = clipper::offset(&clipper::offset(&polygons, -smooth), smooth);

    clipper::split_into_parts(&polygons, false)
}

/// Line infill for one support island: alternating 0/90 degrees by layer
/// parity, or both directions at doubled spacing when the lines sit far
/// apart.
pub fn generate_support_lines(
    island: &Polygons,
    settings: &SliceSettings,
    layer_nr: usize,
) -> Polygons {
    let mut lines = Polygons::new();
    if settings.support_line_distance <= 0 {
        return lines;
    }
    if settings.support_line_distance > settings.extrusion_width * 4 {
        generate_line_infill(
            island,
            &mut lines,
            settings.extrusion_width,
            settings.support_line_distance * 2,
            settings.infill_overlap,
            0.0,
        );
        generate_line_infill(
            island,
            &mut lines,
            settings.extrusion_width,
            settings.support_line_distance * 2,
            settings.infill_overlap,
            90.0,
        );
    } else {
        let rotation = if layer_nr % 2 == 1 { 0.0 } else { 90.0 };
        generate_line_infill(
            island,
            &mut lines,
            settings.extrusion_width,
            settings.support_line_distance,
            settings.infill_overlap,
            rotation,
        );
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::mesh::SimpleMesh;
    use crate::optimize::OptimizedMesh;
    use crate::storage::SliceDataStorage;

    /// A 10mm cube floating 5mm above the bed.
    fn floating_cube() -> (SliceDataStorage, SliceSettings) {
        let mesh = SimpleMesh::cube(10.0);
        let mut om = OptimizedMesh::new(&mesh, Point::new(0, 0), 0);
        for volume in &mut om.volumes {
            for p in &mut volume.points {
                p.z += 5_000;
            }
        }
        om.min.z += 5_000;
        om.max.z += 5_000;

        let mut settings = SliceSettings::default();
        settings.support_angle = 45;

        let mut storage = SliceDataStorage::default();
        generate_support_grid(&mut storage, &om, &settings);
        (storage, settings)
    }

    #[test]
    fn test_grid_disabled_by_negative_angle() {
        let mesh = SimpleMesh::cube(10.0);
        let om = OptimizedMesh::new(&mesh, Point::new(0, 0), 0);
        let settings = SliceSettings::default(); // support_angle = -1
        let mut storage = SliceDataStorage::default();
        generate_support_grid(&mut storage, &om, &settings);
        assert!(!storage.support.generated);
        assert!(support_polygons_at(&storage, &settings, 1_000).is_empty());
    }

    #[test]
    fn test_support_under_floating_cube() {
        let (storage, settings) = floating_cube();
        assert!(storage.support.generated);

        let polys = support_polygons_at(&storage, &settings, 1_000);
        // Roughly the cube footprint
        let area = polys.area();
        assert!(area > 80e6, "area {}", area);
        assert!(area < 120e6, "area {}", area);
    }

    #[test]
    fn test_no_support_above_model_bottom() {
        let (storage, settings) = floating_cube();
        // Above the underside (5mm) nothing needs holding
        let polys = support_polygons_at(&storage, &settings, 8_000);
        assert!(polys.area().abs() < 1.0);
    }

    #[test]
    fn test_z_clearance_respected() {
        let (storage, settings) = floating_cube();
        // Just below the underside but within the clearance band
        let z = 5_000 - settings.support_z_distance / 2;
        let polys = support_polygons_at(&storage, &settings, z);
        assert!(polys.area().abs() < 1.0);
    }

    #[test]
    fn test_support_areas_avoid_model_with_clearance() {
        let (mut storage, settings) = floating_cube();
        // Pretend the model also owns a part at this layer, overlapping the
        // support column region
        use crate::geometry::Polygon;
        use crate::storage::{SliceLayer, SliceLayerPart, SliceVolumeStorage};
        let outline: Polygons =
            Polygon::rectangle(Point::new(-5_000, -5_000), Point::new(0, 5_000)).into();
        let mut volume = SliceVolumeStorage::default();
        volume.layers.push(SliceLayer {
            z: 1_000,
            parts: vec![SliceLayerPart {
                boundary_box: outline.bounding_box(),
                outline,
                bridge_angle: -1,
                ..Default::default()
            }],
        });
        storage.volumes.push(volume);

        let islands = generate_support_areas(&storage, &settings, 0, 1_000);
        for island in &islands {
            let bb = island.bounding_box();
            // XY clearance pushes support away from the part at x <= 0
            assert!(bb.min.x >= settings.support_xy_distance - GRID_SCALE);
        }
    }

    #[test]
    fn test_support_lines_alternate_by_parity() {
        let (storage, mut settings) = floating_cube();
        // Narrow spacing selects the single-direction, parity-alternating fill
        settings.support_line_distance = 1_000;
        let islands = generate_support_areas(&storage, &settings, 0, 1_000);
        assert!(!islands.is_empty());

        let lines_even = generate_support_lines(&islands[0], &settings, 0);
        let lines_odd = generate_support_lines(&islands[0], &settings, 1);
        assert!(!lines_even.is_empty());
        assert!(!lines_odd.is_empty());

        // Even layers run at 90 degrees (horizontal), odd at 0 (vertical)
        let p = lines_even[0].points();
        assert_eq!(p[0].y, p[1].y);
        let p = lines_odd[0].points();
        assert_eq!(p[0].x, p[1].x);
    }
}

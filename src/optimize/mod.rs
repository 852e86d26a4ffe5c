//! Mesh optimisation.
//!
//! Turns raw triangle soup into an indexed mesh: vertices within the meld
//! distance collapse to one point, degenerate faces are dropped, and the model
//! is translated so its centre sits at the configured object position with its
//! lowest point on the bed plane (minus the configured sink). Pure and
//! deterministic.

use crate::geometry::{Point, Point3};
use crate::mesh::SimpleMesh;
use crate::Coord;
use log::debug;
use std::collections::HashMap;

/// Vertices closer than this collapse into one (um).
const MELD_DIST: Coord = 30;

/// An indexed triangle volume.
#[derive(Clone, Debug, Default)]
pub struct OptimizedVolume {
    pub points: Vec<Point3>,
    pub faces: Vec<[u32; 3]>,
}

/// The optimised model: indexed volumes plus placement bounds.
#[derive(Clone, Debug, Default)]
pub struct OptimizedMesh {
    pub volumes: Vec<OptimizedVolume>,
    pub min: Point3,
    pub max: Point3,
    pub size: Point3,
}

impl OptimizedMesh {
    /// Build an optimised model from raw soup, placing its XY centre at
    /// `object_position` and sinking it `object_sink` below the bed plane.
    pub fn new(mesh: &SimpleMesh, object_position: Point, object_sink: Coord) -> OptimizedMesh {
        let mut result = OptimizedMesh::default();

        for volume in &mesh.volumes {
            let mut optimized = OptimizedVolume::default();
            // Spatial hash on MELD_DIST-sized cells; candidates checked in the
            // 27 neighbouring cells so near-boundary duplicates still meld.
            let mut index: HashMap<(Coord, Coord, Coord), Vec<u32>> = HashMap::new();

            let mut meld = |p: Point3, points: &mut Vec<Point3>| -> u32 {
                let cell = (p.x / MELD_DIST, p.y / MELD_DIST, p.z / MELD_DIST);
                for dx in -1..=1 {
                    for dy in -1..=1 {
                        for dz in -1..=1 {
                            let key = (cell.0 + dx, cell.1 + dy, cell.2 + dz);
                            if let Some(candidates) = index.get(&key) {
                                for &i in candidates {
                                    let q = points[i as usize];
                                    let d = p - q;
                                    if d.x.abs() < MELD_DIST
                                        && d.y.abs() < MELD_DIST
                                        && d.z.abs() < MELD_DIST
                                    {
                                        return i;
                                    }
                                }
                            }
                        }
                    }
                }
                let i = points.len() as u32;
                points.push(p);
                index.entry(cell).or_default().push(i);
                i
            };

            for face in &volume.faces {
                let i0 = meld(face.v[0], &mut optimized.points);
                let i1 = meld(face.v[1], &mut optimized.points);
                let i2 = meld(face.v[2], &mut optimized.points);
                if i0 == i1 || i1 == i2 || i0 == i2 {
                    continue; // collapsed to a sliver
                }
                optimized.faces.push([i0, i1, i2]);
            }

            debug!(
                "optimized volume: {} -> {} faces, {} -> {} vertices",
                volume.faces.len(),
                optimized.faces.len(),
                volume.faces.len() * 3,
                optimized.points.len()
            );
            result.volumes.push(optimized);
        }

        result.recompute_bounds();

        // Centre on the object position, floor onto the bed
        let center = Point::new(
            (result.min.x + result.max.x) / 2,
            (result.min.y + result.max.y) / 2,
        );
        let offset = Point3::new(
            object_position.x - center.x,
            object_position.y - center.y,
            -result.min.z - object_sink,
        );
        for volume in &mut result.volumes {
            for p in &mut volume.points {
                *p = *p + offset;
            }
        }
        result.recompute_bounds();
        result
    }

    fn recompute_bounds(&mut self) {
        let mut min = Point3::new(Coord::MAX, Coord::MAX, Coord::MAX);
        let mut max = Point3::new(Coord::MIN, Coord::MIN, Coord::MIN);
        for volume in &self.volumes {
            for &p in &volume.points {
                min = min.min(p);
                max = max.max(p);
            }
        }
        if min.x > max.x {
            min = Point3::new(0, 0, 0);
            max = Point3::new(0, 0, 0);
        }
        self.min = min;
        self.max = max;
        self.size = max - min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::SimpleMesh;

    #[test]
    fn test_cube_dedup() {
        let mesh = SimpleMesh::cube(10.0);
        let om = OptimizedMesh::new(&mesh, Point::new(0, 0), 0);
        // 12 triangles reference only 8 distinct corners
        assert_eq!(om.volumes[0].faces.len(), 12);
        assert_eq!(om.volumes[0].points.len(), 8);
    }

    #[test]
    fn test_cube_placement() {
        let mesh = SimpleMesh::cube(10.0);
        let om = OptimizedMesh::new(&mesh, Point::new(50_000, 50_000), 0);
        // Centered in XY, floored in Z
        assert_eq!(om.min.x, 45_000);
        assert_eq!(om.max.x, 55_000);
        assert_eq!(om.min.z, 0);
        assert_eq!(om.size.z, 10_000);
    }

    #[test]
    fn test_sink_lowers_model() {
        let mesh = SimpleMesh::cube(10.0);
        let om = OptimizedMesh::new(&mesh, Point::new(0, 0), 2_000);
        assert_eq!(om.min.z, -2_000);
    }

    #[test]
    fn test_near_duplicate_vertices_meld() {
        let mut mesh = SimpleMesh::cube(10.0);
        // Nudge one face's vertex by less than the meld distance
        let face = &mut mesh.volumes[0].faces[0];
        face.v[0] = face.v[0] + Point3::new(10, 0, 0);
        let om = OptimizedMesh::new(&mesh, Point::new(0, 0), 0);
        assert_eq!(om.volumes[0].points.len(), 8);
    }
}

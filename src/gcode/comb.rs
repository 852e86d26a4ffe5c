//! Travel combing.
//!
//! Keeps travel moves inside a part's comb boundary so the nozzle never
//! crosses open air where it would string. A travel is checked against the
//! boundary contours; where the straight line would cross one, the path is
//! routed around it along the shorter side, with the waypoints nudged off the
//! contour into the allowed region. Travels that start or end outside the
//! boundary cannot be combed and fall back to retraction.

use crate::geometry::{Point, Polygons};
use crate::Coord;

/// Waypoints stay this far off the boundary contour (um).
const COMB_OFFSET: Coord = 200;

pub struct Comb<'a> {
    boundary: &'a Polygons,
}

#[derive(Clone, Copy)]
struct Crossing {
    /// Position along the travel line (um from start).
    along: i64,
    poly_idx: usize,
    /// Index of the edge's first vertex.
    edge_idx: usize,
}

impl<'a> Comb<'a> {
    pub fn new(boundary: &'a Polygons) -> Self {
        Self { boundary }
    }

    pub fn inside(&self, p: Point) -> bool {
        self.boundary.inside(p)
    }

    /// Plan a combed travel from `start` to `end`. `Some(points)` is the list
    /// of intermediate waypoints (possibly empty); `None` means the travel
    /// cannot stay inside the boundary.
    pub fn calc(&self, start: Point, end: Point) -> Option<Vec<Point>> {
        if !self.inside(start) || !self.inside(end) {
            return None;
        }

        let crossings = self.collect_crossings(start, end);
        if crossings.is_empty() {
            return Some(Vec::new());
        }

        // Entry/exit pair per crossed contour, ordered along the travel
        let mut per_poly: Vec<(usize, Crossing, Crossing)> = Vec::new();
        for crossing in &crossings {
            match per_poly.iter_mut().find(|(idx, _, _)| *idx == crossing.poly_idx) {
                Some((_, entry, exit)) => {
                    if crossing.along < entry.along {
                        *entry = *crossing;
                    }
                    if crossing.along > exit.along {
                        *exit = *crossing;
                    }
                }
                None => per_poly.push((crossing.poly_idx, *crossing, *crossing)),
            }
        }
        per_poly.sort_by_key(|(_, entry, _)| entry.along);

        let mut points = Vec::new();
        for (poly_idx, entry, exit) in per_poly {
            self.route_around(poly_idx, entry.edge_idx, exit.edge_idx, &mut points);
        }
        Some(points)
    }

    fn collect_crossings(&self, start: Point, end: Point) -> Vec<Crossing> {
        let dir = end - start;
        let len2 = dir.vsize2();
        if len2 == 0 {
            return Vec::new();
        }

        let mut crossings = Vec::new();
        for (poly_idx, poly) in self.boundary.iter().enumerate() {
            let pts = poly.points();
            if pts.len() < 3 {
                continue;
            }
            for edge_idx in 0..pts.len() {
                let a = pts[edge_idx];
                let b = pts[(edge_idx + 1) % pts.len()];
                if let Some(along) = segment_intersection(start, end, a, b) {
                    crossings.push(Crossing {
                        along,
                        poly_idx,
                        edge_idx,
                    });
                }
            }
        }
        crossings
    }

    /// Append waypoints walking around contour `poly_idx` from the entry edge
    /// to the exit edge, along whichever side is shorter.
    fn route_around(
        &self,
        poly_idx: usize,
        entry_edge: usize,
        exit_edge: usize,
        points: &mut Vec<Point>,
    ) {
        let poly = &self.boundary[poly_idx];
        let n = poly.len();
        if n < 3 || entry_edge == exit_edge {
            return;
        }

        // Vertices strictly between the two edges, walking forward
        let mut forward = Vec::new();
        let mut i = (entry_edge + 1) % n;
        loop {
            forward.push(i);
            if i == exit_edge {
                break;
            }
            i = (i + 1) % n;
        }
        // And walking backward
        let mut backward = Vec::new();
        let mut i = entry_edge;
        loop {
            backward.push(i);
            if i == (exit_edge + 1) % n {
                break;
            }
            i = (i + n - 1) % n;
        }

        let path_length = |indices: &[usize]| -> i64 {
            indices
                .windows(2)
                .map(|w| (poly.points()[w[0]] - poly.points()[w[1]]).vsize())
                .sum()
        };
        let chosen = if path_length(&forward) <= path_length(&backward) {
            forward
        } else {
            backward
        };

        for idx in chosen {
            points.push(offset_vertex(poly.points(), idx));
        }
    }

    /// Move `p` to the nearest location `distance` inside the boundary.
    /// Returns `None` when `p` is already inside.
    pub fn move_inside(&self, p: Point, distance: Coord) -> Option<Point> {
        if self.inside(p) {
            return None;
        }

        let mut best: Option<Point> = None;
        let mut best_dist2 = i128::MAX;
        for poly in self.boundary {
            let pts = poly.points();
            if pts.len() < 3 {
                continue;
            }
            for i in 0..pts.len() {
                let a = pts[i];
                let b = pts[(i + 1) % pts.len()];
                let proj = project_to_segment(p, a, b);
                let d2 = (p - proj).vsize2();
                if d2 < best_dist2 {
                    // The allowed region lies left of the edge direction
                    let dir = b - a;
                    let len = dir.vsize().max(1);
                    let normal = Point::new(-dir.y, dir.x);
                    best_dist2 = d2;
                    best = Some(Point::new(
                        proj.x + normal.x * distance / len,
                        proj.y + normal.y * distance / len,
                    ));
                }
            }
        }
        best
    }
}

/// Where segment (a,b) crosses the travel (start,end), the distance along the
/// travel in micrometers; `None` when they do not properly cross.
fn segment_intersection(start: Point, end: Point, a: Point, b: Point) -> Option<i64> {
    let r = end - start;
    let s = b - a;
    let denom = r.x as i128 * s.y as i128 - r.y as i128 * s.x as i128;
    if denom == 0 {
        return None; // parallel
    }
    let qp = a - start;
    let t_num = qp.x as i128 * s.y as i128 - qp.y as i128 * s.x as i128;
    let u_num = qp.x as i128 * r.y as i128 - qp.y as i128 * r.x as i128;

    // Proper crossing: strictly interior on both segments
    let t_ok = if denom > 0 {
        t_num > 0 && t_num < denom
    } else {
        t_num < 0 && t_num > denom
    };
    let u_ok = if denom > 0 {
        u_num > 0 && u_num < denom
    } else {
        u_num < 0 && u_num > denom
    };
    if !t_ok || !u_ok {
        return None;
    }

    let t = t_num as f64 / denom as f64;
    Some((t * r.vsize_f()) as i64)
}

/// A contour vertex nudged off the contour into the allowed region: the
/// region lies left of the edges, so the nudge follows the left normals of
/// the two adjacent edges.
fn offset_vertex(points: &[Point], idx: usize) -> Point {
    let n = points.len();
    let prev = points[(idx + n - 1) % n];
    let here = points[idx];
    let next = points[(idx + 1) % n];

    let d0 = here - prev;
    let d1 = next - here;
    let norm = |v: Point| -> (f64, f64) {
        let len = v.vsize_f().max(1.0);
        (-v.y as f64 / len, v.x as f64 / len)
    };
    let (n0x, n0y) = norm(d0);
    let (n1x, n1y) = norm(d1);
    let (mut nx, mut ny) = (n0x + n1x, n0y + n1y);
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-9 {
        nx = n0x;
        ny = n0y;
    } else {
        nx /= len;
        ny /= len;
    }
    Point::new(
        here.x + (nx * COMB_OFFSET as f64) as Coord,
        here.y + (ny * COMB_OFFSET as f64) as Coord,
    )
}

fn project_to_segment(p: Point, a: Point, b: Point) -> Point {
    let ab = b - a;
    let len2 = ab.vsize2();
    if len2 == 0 {
        return a;
    }
    let t = ((p - a).x as i128 * ab.x as i128 + (p - a).y as i128 * ab.y as i128).clamp(0, len2);
    Point::new(
        a.x + ((ab.x as i128 * t) / len2) as Coord,
        a.y + ((ab.y as i128 * t) / len2) as Coord,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;

    /// A 20mm square boundary with a 6mm square hole in the middle.
    fn boundary_with_hole() -> Polygons {
        let mut boundary = Polygons::new();
        boundary.push(Polygon::rectangle(
            Point::new(0, 0),
            Point::new(20_000, 20_000),
        ));
        let mut hole = Polygon::rectangle(Point::new(7_000, 7_000), Point::new(13_000, 13_000));
        hole.reverse();
        boundary.push(hole);
        boundary
    }

    #[test]
    fn test_direct_travel_needs_no_waypoints() {
        let boundary = boundary_with_hole();
        let comb = Comb::new(&boundary);
        let path = comb.calc(Point::new(1_000, 1_000), Point::new(5_000, 1_000));
        assert_eq!(path, Some(Vec::new()));
    }

    #[test]
    fn test_travel_across_hole_routes_around() {
        let boundary = boundary_with_hole();
        let comb = Comb::new(&boundary);
        let path = comb
            .calc(Point::new(1_000, 10_000), Point::new(19_000, 10_000))
            .expect("combable travel");
        assert!(!path.is_empty());
        // No waypoint may sit inside the hole
        for p in &path {
            let in_hole = p.x > 7_000 && p.x < 13_000 && p.y > 7_000 && p.y < 13_000;
            assert!(!in_hole, "waypoint {} in hole", p);
        }
    }

    #[test]
    fn test_endpoint_outside_boundary_fails() {
        let boundary = boundary_with_hole();
        let comb = Comb::new(&boundary);
        assert!(comb
            .calc(Point::new(1_000, 1_000), Point::new(30_000, 1_000))
            .is_none());
        // Inside the hole counts as outside the region
        assert!(comb
            .calc(Point::new(1_000, 1_000), Point::new(10_000, 10_000))
            .is_none());
    }

    #[test]
    fn test_move_inside_from_outside() {
        let boundary = boundary_with_hole();
        let comb = Comb::new(&boundary);
        let moved = comb.move_inside(Point::new(-2_000, 10_000), 400).unwrap();
        assert!(comb.inside(moved), "moved point {}", moved);
    }

    #[test]
    fn test_move_inside_noop_when_inside() {
        let boundary = boundary_with_hole();
        let comb = Comb::new(&boundary);
        assert!(comb.move_inside(Point::new(1_000, 1_000), 400).is_none());
    }
}

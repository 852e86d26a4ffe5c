//! Travel-minimising path ordering.
//!
//! Greedy nearest-neighbour ordering of contours: each step visits the
//! contour whose best start vertex is closest to the nozzle. Closed loops may
//! start at any vertex and end where they started; 2-point lines may be
//! traversed in either direction.

use crate::geometry::{Point, Polygon};

/// Visiting order plus per-contour start vertex.
#[derive(Clone, Debug, Default)]
pub struct PathOrder {
    pub poly_order: Vec<usize>,
    pub poly_start: Vec<usize>,
}

/// Order `polygons` starting from `start_point`.
pub fn optimize(polygons: &[&Polygon], start_point: Point) -> PathOrder {
    let mut order = PathOrder {
        poly_order: Vec::with_capacity(polygons.len()),
        poly_start: vec![0; polygons.len()],
    };
    let mut picked = vec![false; polygons.len()];
    let mut position = start_point;

    for _ in 0..polygons.len() {
        let mut best = usize::MAX;
        let mut best_dist2 = i128::MAX;
        for (n, poly) in polygons.iter().enumerate() {
            if picked[n] || poly.is_empty() {
                continue;
            }
            if poly.len() == 2 {
                // A line: nearer end wins
                let d0 = (poly.points()[0] - position).vsize2();
                let d1 = (poly.points()[1] - position).vsize2();
                let (d, start) = if d0 <= d1 { (d0, 0) } else { (d1, 1) };
                if d < best_dist2 {
                    best_dist2 = d;
                    best = n;
                    order.poly_start[n] = start;
                }
            } else {
                for (i, &p) in poly.points().iter().enumerate() {
                    let d = (p - position).vsize2();
                    if d < best_dist2 {
                        best_dist2 = d;
                        best = n;
                        order.poly_start[n] = i;
                    }
                }
            }
        }
        if best == usize::MAX {
            break;
        }
        picked[best] = true;
        order.poly_order.push(best);

        let poly = polygons[best];
        if poly.len() == 2 {
            // Leave from the other end
            position = poly.points()[1 - order.poly_start[best]];
        } else {
            // Loops end where they started
            position = poly.points()[order.poly_start[best]];
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use crate::Coord;

    fn square(x: Coord, y: Coord, size: Coord) -> Polygon {
        Polygon::rectangle(Point::new(x, y), Point::new(x + size, y + size))
    }

    #[test]
    fn test_nearest_first() {
        let far = square(100_000, 0, 10_000);
        let near = square(10_000, 0, 10_000);
        let polys = vec![&far, &near];

        let order = optimize(&polys, Point::new(0, 0));
        assert_eq!(order.poly_order, vec![1, 0]);
    }

    #[test]
    fn test_start_vertex_is_closest() {
        let sq = square(10_000, 10_000, 10_000);
        let polys = vec![&sq];

        let order = optimize(&polys, Point::new(21_000, 21_000));
        // Vertex (20000, 20000) is nearest to the nozzle
        assert_eq!(order.poly_start[0], 2);
    }

    #[test]
    fn test_line_may_reverse() {
        let line = Polygon::from_points(vec![Point::new(0, 0), Point::new(10_000, 0)]);
        let polys = vec![&line];

        let order = optimize(&polys, Point::new(11_000, 0));
        assert_eq!(order.poly_start[0], 1);
    }

    #[test]
    fn test_chains_through_lines() {
        // Lines laid end to end get visited in sequence, not by index
        let a = Polygon::from_points(vec![Point::new(0, 0), Point::new(10_000, 0)]);
        let b = Polygon::from_points(vec![Point::new(30_000, 0), Point::new(20_000, 0)]);
        let c = Polygon::from_points(vec![Point::new(10_500, 0), Point::new(20_000, 0)]);
        let polys = vec![&a, &b, &c];

        let order = optimize(&polys, Point::new(0, 0));
        assert_eq!(order.poly_order, vec![0, 2, 1]);
    }

    #[test]
    fn test_empty_input() {
        let order = optimize(&[], Point::new(0, 0));
        assert!(order.poly_order.is_empty());
    }
}

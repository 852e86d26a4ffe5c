//! Line infill generation.
//!
//! Fills a region with parallel lines at a configurable angle and spacing.
//! Used for skin, sparse interior infill, support, raft sub-layers and the
//! wipe tower. Lines are emitted as 2-point contours; the planner treats
//! contours with fewer than 3 points as open paths.

use crate::clipper;
use crate::geometry::{Point, Polygon, Polygons};
use crate::Coord;

/// Rotation helper mapping the requested infill angle onto vertical
/// scanlines and back.
#[derive(Clone, Copy)]
struct PointMatrix {
    cos: f64,
    sin: f64,
}

impl PointMatrix {
    fn new(rotation_deg: f64) -> Self {
        let r = rotation_deg.to_radians();
        Self {
            cos: r.cos(),
            sin: r.sin(),
        }
    }

    fn apply(&self, p: Point) -> Point {
        Point::new(
            (p.x as f64 * self.cos + p.y as f64 * self.sin).round() as Coord,
            (-(p.x as f64) * self.sin + p.y as f64 * self.cos).round() as Coord,
        )
    }

    fn unapply(&self, p: Point) -> Point {
        Point::new(
            (p.x as f64 * self.cos - p.y as f64 * self.sin).round() as Coord,
            (p.x as f64 * self.sin + p.y as f64 * self.cos).round() as Coord,
        )
    }
}

/// Generate parallel infill lines covering `outline`, appended to `result`.
///
/// The outline is first expanded by `extrusion_width * infill_overlap / 100`
/// so the fill bonds to the surrounding walls. `rotation_deg` is the line
/// direction; holes interrupt lines through the even crossing count.
pub fn generate_line_infill(
    outline: &Polygons,
    result: &mut Polygons,
    extrusion_width: Coord,
    line_spacing: Coord,
    infill_overlap: i32,
    rotation_deg: f64,
) {
    if outline.is_empty() || line_spacing <= 0 {
        return;
    }
    let outline = clipper::offset(outline, extrusion_width * infill_overlap as Coord / 100);
    if outline.is_empty() {
        return;
    }

    let matrix = PointMatrix::new(rotation_deg);
    let rotated: Vec<Vec<Point>> = outline
        .iter()
        .map(|poly| poly.points().iter().map(|&p| matrix.apply(p)).collect())
        .collect();

    let mut min_x = Coord::MAX;
    let mut max_x = Coord::MIN;
    for poly in &rotated {
        for p in poly {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
        }
    }
    if min_x > max_x {
        return;
    }

    // Scanlines halfway between spacing multiples, so region edges that fall
    // exactly on a multiple do not produce odd crossing counts.
    let first_idx = min_x.div_euclid(line_spacing);
    let scanline_count = (max_x.div_euclid(line_spacing) - first_idx + 1) as usize;
    let scan_x = |idx: usize| (first_idx + idx as Coord) * line_spacing + line_spacing / 2;

    let mut cut_list: Vec<Vec<Coord>> = vec![Vec::new(); scanline_count];
    for poly in &rotated {
        if poly.len() < 3 {
            continue;
        }
        let mut p0 = poly[poly.len() - 1];
        for &p1 in poly {
            let (lo, hi) = if p0.x < p1.x { (p0, p1) } else { (p1, p0) };
            if lo.x != hi.x {
                for (idx, cuts) in cut_list.iter_mut().enumerate() {
                    let x = scan_x(idx);
                    if x >= lo.x && x < hi.x {
                        let y = lo.y as f64
                            + (hi.y - lo.y) as f64 * (x - lo.x) as f64 / (hi.x - lo.x) as f64;
                        cuts.push(y.round() as Coord);
                    }
                }
            }
            p0 = p1;
        }
    }

    for (idx, cuts) in cut_list.iter_mut().enumerate() {
        cuts.sort_unstable();
        let x = scan_x(idx);
        for pair in cuts.chunks_exact(2) {
            if pair[1] - pair[0] < extrusion_width / 4 {
                continue; // too short to extrude
            }
            let line = Polygon::from_points(vec![
                matrix.unapply(Point::new(x, pair[0])),
                matrix.unapply(Point::new(x, pair[1])),
            ]);
            result.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Polygon};

    fn square(x: Coord, y: Coord, size: Coord) -> Polygons {
        Polygon::rectangle(Point::new(x, y), Point::new(x + size, y + size)).into()
    }

    #[test]
    fn test_vertical_lines_cover_square() {
        let outline = square(0, 0, 10_000);
        let mut lines = Polygons::new();
        generate_line_infill(&outline, &mut lines, 400, 1_000, 0, 0.0);

        assert_eq!(lines.len(), 10);
        for line in &lines {
            assert_eq!(line.len(), 2);
            let p = line.points();
            assert_eq!(p[0].x, p[1].x); // vertical
            assert!((p[1].y - p[0].y).abs() >= 9_000);
        }
    }

    #[test]
    fn test_rotation_turns_lines() {
        let outline = square(0, 0, 10_000);
        let mut lines = Polygons::new();
        generate_line_infill(&outline, &mut lines, 400, 1_000, 0, 90.0);

        assert!(!lines.is_empty());
        for line in &lines {
            let p = line.points();
            assert_eq!(p[0].y, p[1].y); // horizontal
        }
    }

    #[test]
    fn test_hole_interrupts_lines() {
        let mut outline = square(0, 0, 20_000);
        let mut hole = Polygon::rectangle(Point::new(5_000, 5_000), Point::new(15_000, 15_000));
        hole.reverse();
        outline.push(hole);

        let mut lines = Polygons::new();
        generate_line_infill(&outline, &mut lines, 400, 1_000, 0, 0.0);

        for line in &lines {
            let p = line.points();
            let mid = Point::new((p[0].x + p[1].x) / 2, (p[0].y + p[1].y) / 2);
            let in_hole = mid.x > 5_000 && mid.x < 15_000 && mid.y > 5_000 && mid.y < 15_000;
            assert!(!in_hole, "line through hole at {}", mid);
        }
    }

    #[test]
    fn test_overlap_extends_lines_into_walls() {
        let outline = square(0, 0, 10_000);
        let mut plain = Polygons::new();
        generate_line_infill(&outline, &mut plain, 400, 1_000, 0, 0.0);
        let mut overlapped = Polygons::new();
        generate_line_infill(&outline, &mut overlapped, 400, 1_000, 15, 0.0);

        let span = |lines: &Polygons| -> Coord {
            lines
                .iter()
                .map(|l| (l.points()[1].y - l.points()[0].y).abs())
                .max()
                .unwrap_or(0)
        };
        assert!(span(&overlapped) > span(&plain));
    }

    #[test]
    fn test_empty_and_zero_spacing_do_nothing() {
        let mut lines = Polygons::new();
        generate_line_infill(&Polygons::new(), &mut lines, 400, 1_000, 0, 0.0);
        generate_line_infill(&square(0, 0, 10_000), &mut lines, 400, 0, 0, 0.0);
        assert!(lines.is_empty());
    }
}

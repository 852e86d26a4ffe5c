//! Polygon boolean operations module.
//!
//! This module provides the robust 2D kernel over the geo-clipper backend:
//! boolean set operations (union, intersection, difference), mitered
//! offsetting, and containment decomposition of flat polygon sets.
//!
//! These operations are essential for:
//! - Computing wall (inset) offsets
//! - Skin/infill region derivation
//! - Support, skirt, raft and ooze-shield geometry
//!
//! All operations return new polygon sets and never mutate their inputs.
//! Degenerate contours (fewer than 3 points, duplicate consecutive vertices,
//! zero area) are filtered before every backend call, so malformed geometry
//! degrades to smaller results instead of raising errors.

use crate::geometry::{Point, Polygon, Polygons};
use crate::{scale, unscale, Coord};
use geo::{Coord as GeoCoord, LineString, MultiPolygon, Polygon as GeoPolygon};
use geo_clipper::{Clipper, EndType, JoinType};

/// Precision factor handed to the Clipper backend; booleans run on integer
/// micrometers internally.
const CLIPPER_FACTOR: f64 = 1000.0;

/// Miter limit for offset joins. Bounds the spike a sharp convex corner can
/// produce before the join is squared off.
const MITER_LIMIT: f64 = 2.0;

/// Drop degenerate contours: duplicate consecutive vertices removed, contours
/// with fewer than 3 points or zero area discarded.
pub fn clean(polygons: &Polygons) -> Polygons {
    let mut result = Polygons::new();
    for poly in polygons {
        let mut p = poly.clone();
        p.remove_duplicate_points();
        if p.is_degenerate() || p.area() == 0.0 {
            continue;
        }
        result.push(p);
    }
    result
}

/// Convert one contour to a closed geo ring.
fn polygon_to_geo(poly: &Polygon) -> GeoPolygon<f64> {
    let mut ring: Vec<GeoCoord<f64>> = poly
        .points()
        .iter()
        .map(|p| GeoCoord {
            x: unscale(p.x),
            y: unscale(p.y),
        })
        .collect();

    // Close the ring; our Polygon keeps the closing edge implicit.
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }

    GeoPolygon::new(LineString::new(ring), vec![])
}

/// Convert a flat polygon set to a geo MultiPolygon. Each contour travels as
/// its own path; the non-zero fill rule lets winding encode holes.
fn polygons_to_geo_multi(polygons: &Polygons) -> MultiPolygon<f64> {
    MultiPolygon::new(clean(polygons).iter().map(polygon_to_geo).collect())
}

fn ring_to_polygon(ring: &LineString<f64>) -> Polygon {
    let mut points: Vec<Point> = ring
        .coords()
        .map(|c| Point::new(scale(c.x), scale(c.y)))
        .collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    Polygon::from_points(points)
}

/// Flatten a geo MultiPolygon back to our flat form. Exterior rings come back
/// with positive signed area, interior rings with negative.
fn geo_multi_to_polygons(multi: &MultiPolygon<f64>) -> Polygons {
    let mut result = Polygons::new();
    for geo_poly in &multi.0 {
        let exterior = ring_to_polygon(geo_poly.exterior());
        if !exterior.is_degenerate() {
            result.push(exterior);
        }
        for interior in geo_poly.interiors() {
            let hole = ring_to_polygon(interior);
            if !hole.is_degenerate() {
                result.push(hole);
            }
        }
    }
    result
}

/// Compute the union of two polygon sets (non-zero fill rule).
pub fn union(subject: &Polygons, clip: &Polygons) -> Polygons {
    if subject.is_empty() {
        return clip.clone();
    }
    if clip.is_empty() {
        return subject.clone();
    }

    let subject_geo = polygons_to_geo_multi(subject);
    let clip_geo = polygons_to_geo_multi(clip);

    let result = subject_geo.union(&clip_geo, CLIPPER_FACTOR);
    geo_multi_to_polygons(&result)
}

/// Union a single set with itself, merging self-overlapping contours and
/// normalising winding.
pub fn union_all(polygons: &Polygons) -> Polygons {
    if polygons.is_empty() {
        return Polygons::new();
    }

    let subject_geo = polygons_to_geo_multi(polygons);
    let empty: MultiPolygon<f64> = MultiPolygon::new(vec![]);

    let result = subject_geo.union(&empty, CLIPPER_FACTOR);
    geo_multi_to_polygons(&result)
}

/// Compute the intersection of two polygon sets (non-zero fill rule).
pub fn intersection(subject: &Polygons, clip: &Polygons) -> Polygons {
    if subject.is_empty() || clip.is_empty() {
        return Polygons::new();
    }

    let subject_geo = polygons_to_geo_multi(subject);
    let clip_geo = polygons_to_geo_multi(clip);

    let result = subject_geo.intersection(&clip_geo, CLIPPER_FACTOR);
    geo_multi_to_polygons(&result)
}

/// Compute the difference of two polygon sets (subject minus clip).
pub fn difference(subject: &Polygons, clip: &Polygons) -> Polygons {
    if subject.is_empty() {
        return Polygons::new();
    }
    if clip.is_empty() {
        return subject.clone();
    }

    let subject_geo = polygons_to_geo_multi(subject);
    let clip_geo = polygons_to_geo_multi(clip);

    let result = subject_geo.difference(&clip_geo, CLIPPER_FACTOR);
    geo_multi_to_polygons(&result)
}

/// Offset every contour by `distance` micrometers using mitered joins.
///
/// Positive distance grows solids, negative shrinks them; holes move the
/// opposite way automatically through the signed-area convention. A zero
/// distance returns the input unchanged.
pub fn offset(polygons: &Polygons, distance: Coord) -> Polygons {
    if polygons.is_empty() {
        return Polygons::new();
    }
    if distance == 0 {
        return polygons.clone();
    }

    let geo_multi = polygons_to_geo_multi(polygons);
    let result = geo_multi.offset(
        unscale(distance),
        JoinType::Miter(MITER_LIMIT),
        EndType::ClosedPolygon,
        CLIPPER_FACTOR,
    );
    geo_multi_to_polygons(&result)
}

/// Decompose a flat polygon set into groups of one outer contour plus its
/// directly nested holes, by containment rather than spatial clustering.
///
/// With `union_first` set, self-overlapping contours are merged through the
/// boolean backend before grouping. Without it, grouping is a pure containment
/// transform: recursion depth equals nesting depth, solids nested inside holes
/// start new groups, and unrelated islands come out as separate groups.
pub fn split_into_parts(polygons: &Polygons, union_first: bool) -> Vec<Polygons> {
    if union_first {
        let merged = polygons_to_geo_multi(polygons)
            .union(&MultiPolygon::new(vec![]), CLIPPER_FACTOR);
        return merged
            .0
            .iter()
            .map(|geo_poly| {
                let mut group = Polygons::new();
                let exterior = ring_to_polygon(geo_poly.exterior());
                if !exterior.is_degenerate() {
                    group.push(exterior);
                }
                for interior in geo_poly.interiors() {
                    let hole = ring_to_polygon(interior);
                    if !hole.is_degenerate() {
                        group.push(hole);
                    }
                }
                group
            })
            .filter(|g| !g.is_empty())
            .collect();
    }

    decompose_by_containment(&clean(polygons))
}

/// Explicit containment decomposition of an already-clean flat set.
fn decompose_by_containment(polygons: &Polygons) -> Vec<Polygons> {
    let n = polygons.len();
    if n == 0 {
        return Vec::new();
    }

    // Nesting depth of each contour: how many other contours enclose it.
    // A representative vertex stands in for the whole contour; contours of a
    // well-formed layer never cross, only nest.
    let mut depth = vec![0usize; n];
    let mut parent = vec![usize::MAX; n];
    for i in 0..n {
        let probe = polygons[i].points()[0];
        let mut parent_area = f64::INFINITY;
        for j in 0..n {
            if i == j {
                continue;
            }
            if polygons[j].inside(probe) {
                depth[i] += 1;
                // The immediate parent is the smallest enclosing contour.
                let area = polygons[j].area().abs();
                if area < parent_area {
                    parent_area = area;
                    parent[i] = j;
                }
            }
        }
    }

    // Even depth: outer contour of a group. Odd depth: hole of its parent.
    let mut group_of = vec![usize::MAX; n];
    let mut groups: Vec<Polygons> = Vec::new();
    for i in 0..n {
        if depth[i] % 2 != 0 {
            continue;
        }
        let mut outer = polygons[i].clone();
        if !outer.orientation() {
            outer.reverse();
        }
        group_of[i] = groups.len();
        let mut group = Polygons::new();
        group.push(outer);
        groups.push(group);
    }
    for i in 0..n {
        if depth[i] % 2 == 0 {
            continue;
        }
        let p = parent[i];
        if p == usize::MAX || group_of[p] == usize::MAX {
            continue;
        }
        let mut hole = polygons[i].clone();
        if hole.orientation() {
            hole.reverse();
        }
        groups[group_of[p]].push(hole);
    }
    groups
}

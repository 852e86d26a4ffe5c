//! Model loading.
//!
//! Loads a triangulated solid model from disk into a [`SimpleMesh`]: one or
//! more volumes of raw triangle soup in integer micrometer coordinates. A 3x3
//! transform is applied per vertex at load time together with the mm-to-um
//! scaling. Load failures are fatal to the pipeline.

use crate::geometry::Point3;
use crate::{Error, Result};
use log::debug;
use std::fs;
use std::path::Path;

/// Row-major 3x3 transform applied to model vertices at load time. The
/// application also scales millimeters to micrometers.
#[derive(Clone, Copy, Debug)]
pub struct Matrix3 {
    pub m: [[f64; 3]; 3],
}

impl Matrix3 {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Transform a vertex given in millimeters into micrometer coordinates.
    pub fn apply(&self, x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(
            ((self.m[0][0] * x + self.m[1][0] * y + self.m[2][0] * z) * 1000.0).round() as i64,
            ((self.m[0][1] * x + self.m[1][1] * y + self.m[2][1] * z) * 1000.0).round() as i64,
            ((self.m[0][2] * x + self.m[1][2] * y + self.m[2][2] * z) * 1000.0).round() as i64,
        )
    }
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// One triangle of a raw volume.
#[derive(Clone, Copy, Debug)]
pub struct SimpleFace {
    pub v: [Point3; 3],
}

/// A raw triangle soup for one mesh volume.
#[derive(Clone, Debug, Default)]
pub struct SimpleVolume {
    pub faces: Vec<SimpleFace>,
}

impl SimpleVolume {
    pub fn add_face(&mut self, v0: Point3, v1: Point3, v2: Point3) {
        self.faces.push(SimpleFace { v: [v0, v1, v2] });
    }
}

/// A loaded model: one or more triangle-soup volumes.
#[derive(Clone, Debug, Default)]
pub struct SimpleMesh {
    pub volumes: Vec<SimpleVolume>,
}

impl SimpleMesh {
    /// Load a model file, applying `matrix` to every vertex. Only STL input
    /// is recognised.
    pub fn load(path: &Path, matrix: &Matrix3) -> Result<SimpleMesh> {
        let data = fs::read(path)
            .map_err(|e| Error::Model(format!("failed to read {}: {}", path.display(), e)))?;
        if data.is_empty() {
            return Err(Error::Model(format!("empty model file: {}", path.display())));
        }

        let mesh = if looks_like_ascii_stl(&data) {
            load_ascii_stl(&data, matrix)?
        } else {
            load_binary_stl(&data, matrix)?
        };

        let faces: usize = mesh.volumes.iter().map(|v| v.faces.len()).sum();
        if faces == 0 {
            return Err(Error::Model(format!(
                "no triangles in model file: {}",
                path.display()
            )));
        }
        debug!("loaded {} triangles from {}", faces, path.display());
        Ok(mesh)
    }

    /// An axis-aligned cube of `size_mm` millimeters with its minimum corner
    /// at the origin. Used by tests and demos.
    pub fn cube(size_mm: f64) -> SimpleMesh {
        let s = (size_mm * 1000.0) as i64;
        let p = |x, y, z| Point3::new(x, y, z);
        let c = [
            p(0, 0, 0),
            p(s, 0, 0),
            p(s, s, 0),
            p(0, s, 0),
            p(0, 0, s),
            p(s, 0, s),
            p(s, s, s),
            p(0, s, s),
        ];
        let mut volume = SimpleVolume::default();
        // Two triangles per face, outward-facing winding
        let quads = [
            [0, 3, 2, 1], // bottom (normal -z)
            [4, 5, 6, 7], // top (+z)
            [0, 1, 5, 4], // front (-y)
            [1, 2, 6, 5], // right (+x)
            [2, 3, 7, 6], // back (+y)
            [3, 0, 4, 7], // left (-x)
        ];
        for q in quads {
            volume.add_face(c[q[0]], c[q[1]], c[q[2]]);
            volume.add_face(c[q[0]], c[q[2]], c[q[3]]);
        }
        SimpleMesh {
            volumes: vec![volume],
        }
    }
}

fn looks_like_ascii_stl(data: &[u8]) -> bool {
    // "solid" alone is not enough: some binary exporters write it into the
    // 80-byte header. Require an ASCII facet keyword as well.
    data.starts_with(b"solid")
        && data
            .windows(5)
            .take(4096)
            .any(|w| w == b"facet".as_slice())
}

fn load_ascii_stl(data: &[u8], matrix: &Matrix3) -> Result<SimpleMesh> {
    let text = String::from_utf8_lossy(data);
    let mut volume = SimpleVolume::default();
    let mut vertices: Vec<Point3> = Vec::with_capacity(3);

    for line in text.lines() {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("vertex") => {
                let coord = |w: Option<&str>| -> Result<f64> {
                    w.and_then(|v| v.parse().ok())
                        .ok_or_else(|| Error::Model(format!("bad vertex line: {:?}", line)))
                };
                let x = coord(words.next())?;
                let y = coord(words.next())?;
                let z = coord(words.next())?;
                vertices.push(matrix.apply(x, y, z));
            }
            Some("endloop") => {
                if vertices.len() == 3 {
                    volume.add_face(vertices[0], vertices[1], vertices[2]);
                }
                vertices.clear();
            }
            _ => {}
        }
    }

    Ok(SimpleMesh {
        volumes: vec![volume],
    })
}

fn load_binary_stl(data: &[u8], matrix: &Matrix3) -> Result<SimpleMesh> {
    const HEADER: usize = 80;
    const TRIANGLE: usize = 50;

    if data.len() < HEADER + 4 {
        return Err(Error::Model("binary STL truncated".into()));
    }
    let count = u32::from_le_bytes([
        data[HEADER],
        data[HEADER + 1],
        data[HEADER + 2],
        data[HEADER + 3],
    ]) as usize;
    let body = &data[HEADER + 4..];
    if body.len() < count * TRIANGLE {
        return Err(Error::Model("binary STL shorter than its triangle count".into()));
    }

    let read_f32 = |b: &[u8], at: usize| -> f64 {
        f32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]) as f64
    };

    let mut volume = SimpleVolume {
        faces: Vec::with_capacity(count),
    };
    for i in 0..count {
        let t = &body[i * TRIANGLE..(i + 1) * TRIANGLE];
        // Skip the 12-byte normal; it is recomputed from the winding.
        let mut v = [Point3::new(0, 0, 0); 3];
        for (n, vert) in v.iter_mut().enumerate() {
            let at = 12 + n * 12;
            *vert = matrix.apply(read_f32(t, at), read_f32(t, at + 4), read_f32(t, at + 8));
        }
        volume.add_face(v[0], v[1], v[2]);
    }

    Ok(SimpleMesh {
        volumes: vec![volume],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_face_count() {
        let mesh = SimpleMesh::cube(10.0);
        assert_eq!(mesh.volumes.len(), 1);
        assert_eq!(mesh.volumes[0].faces.len(), 12);
    }

    #[test]
    fn test_matrix_scales_mm_to_um() {
        let m = Matrix3::identity();
        assert_eq!(m.apply(1.0, 2.0, 3.0), Point3::new(1000, 2000, 3000));
    }

    #[test]
    fn test_ascii_stl_detection() {
        assert!(looks_like_ascii_stl(
            b"solid cube\n facet normal 0 0 1\n"
        ));
        // Binary file whose header happens to start with "solid"
        let mut binary = b"solid binary header".to_vec();
        binary.resize(200, 0u8);
        assert!(!looks_like_ascii_stl(&binary));
    }

    #[test]
    fn test_ascii_stl_parse() {
        let stl = b"solid t\n\
            facet normal 0 0 1\n\
            outer loop\n\
            vertex 0 0 0\n\
            vertex 1 0 0\n\
            vertex 0 1 0\n\
            endloop\n\
            endfacet\n\
            endsolid t\n";
        let mesh = load_ascii_stl(stl, &Matrix3::identity()).unwrap();
        assert_eq!(mesh.volumes[0].faces.len(), 1);
        assert_eq!(mesh.volumes[0].faces[0].v[1], Point3::new(1000, 0, 0));
    }

    #[test]
    fn test_binary_stl_parse() {
        let mut data = vec![0u8; 84];
        data[80..84].copy_from_slice(&1u32.to_le_bytes());
        let mut tri = vec![0u8; 50];
        let verts: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        for (i, v) in verts.iter().enumerate() {
            for (j, c) in v.iter().enumerate() {
                let at = 12 + i * 12 + j * 4;
                tri[at..at + 4].copy_from_slice(&c.to_le_bytes());
            }
        }
        data.extend_from_slice(&tri);

        let mesh = load_binary_stl(&data, &Matrix3::identity()).unwrap();
        assert_eq!(mesh.volumes[0].faces.len(), 1);
        assert_eq!(mesh.volumes[0].faces[0].v[2], Point3::new(0, 1000, 0));
    }
}

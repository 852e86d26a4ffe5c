//! # Stratoslice
//!
//! A per-layer toolpath engine for fused-filament fabrication.
//!
//! The library turns a 3D solid model into a line-oriented machine-control
//! instruction stream:
//! - STL mesh loading and vertex melding
//! - Plane slicing into closed per-layer outlines
//! - Wall (inset), skin and sparse-infill region derivation
//! - Support regions, skirt, raft, ooze shield and wipe tower
//! - Layer planning (combing, retraction, speed/cooling policy) and G-code
//!   emission
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratoslice::pipeline::FffProcessor;
//! use stratoslice::settings::SliceSettings;
//!
//! let mut processor = FffProcessor::new(SliceSettings::default());
//! processor.set_target_file("output.gcode")?;
//! processor.process_file("model.stl")?;
//! processor.finish()?;
//! ```

pub mod adhesion;
pub mod bridge;
pub mod clipper;
pub mod gcode;
pub mod geometry;
pub mod infill;
pub mod inset;
pub mod mesh;
pub mod optimize;
pub mod pipeline;
pub mod settings;
pub mod shield;
pub mod skin;
pub mod slice;
pub mod storage;
pub mod support;

// Re-export commonly used types
pub use clipper::{difference, intersection, offset, split_into_parts, union};
pub use geometry::{Aabb, Point, Point3, Polygon, Polygons};
pub use mesh::SimpleMesh;
pub use pipeline::FffProcessor;
pub use settings::{GcodeFlavor, SliceSettings, SupportType};
pub use storage::{SliceDataStorage, SliceLayer, SliceLayerPart, SliceVolumeStorage};

/// Coordinate type used throughout the engine.
/// Integer coordinates scaled by [`SCALING_FACTOR`] to avoid floating-point
/// robustness failures in boolean geometry.
pub type Coord = i64;

/// Floating-point coordinate type for unscaled (millimeter) values.
pub type CoordF = f64;

/// Scaling factor: 1 unit = 1 micrometer, so 1 mm = 1000 units.
pub const SCALING_FACTOR: f64 = 1000.0;

/// Scale a millimeter value to integer micrometers.
#[inline]
pub fn scale(v: CoordF) -> Coord {
    (v * SCALING_FACTOR).round() as Coord
}

/// Unscale integer micrometers to millimeters.
#[inline]
pub fn unscale(v: Coord) -> CoordF {
    v as CoordF / SCALING_FACTOR
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Slicing error: {0}")]
    Slice(String),

    #[error("G-code error: {0}")]
    Gcode(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling() {
        // 1mm should scale to 1000 microns
        assert_eq!(scale(1.0), 1_000);

        // And back
        assert!((unscale(1_000) - 1.0).abs() < 1e-10);

        // Sub-millimeter precision
        assert_eq!(scale(0.4), 400);
        assert_eq!(scale(0.001), 1);
    }
}

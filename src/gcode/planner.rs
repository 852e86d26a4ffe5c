//! Layer planning.
//!
//! Collects one layer's travel and extrusion paths before anything is
//! written, so layer-wide policies can still change them: combing or
//! retracting travels, the first-layer speed ramp, the minimum-layer-time
//! slowdown (which only ever slows, never speeds up) and the spiralize Z
//! ramp. `write_gcode` then streams the planned paths into the writer, which
//! is the only place the position/extrusion cursor is touched.

use super::comb::Comb;
use super::export::GcodeExport;
use super::path_order;
use crate::geometry::{Point, Polygon, Polygons};
use crate::{unscale, Coord};

/// Extrusion parameters shared by paths of one feature type.
#[derive(Clone, Debug, PartialEq)]
pub struct GcodePathConfig {
    /// Print speed (mm/s).
    pub speed: i32,
    /// Line width (um); 0 marks travel.
    pub line_width: Coord,
    /// Feature name written as a `;TYPE:` annotation.
    pub name: &'static str,
    /// Ramp Z continuously along this path.
    pub spiralize: bool,
}

impl GcodePathConfig {
    pub fn new(speed: i32, line_width: Coord, name: &'static str) -> Self {
        Self {
            speed,
            line_width,
            name,
            spiralize: false,
        }
    }

    fn travel(speed: i32) -> Self {
        Self {
            speed,
            line_width: 0,
            name: "",
            spiralize: false,
        }
    }
}

struct GcodePath {
    config: GcodePathConfig,
    retract: bool,
    points: Vec<Point>,
}

/// Plans and writes one layer.
pub struct GcodePlanner<'a> {
    gcode: &'a mut GcodeExport,
    paths: Vec<GcodePath>,

    travel_config: GcodePathConfig,
    retraction_minimal_distance: Coord,

    last_position: Point,
    comb_boundary: Option<Polygons>,
    always_retract: bool,
    force_retraction: bool,

    current_extruder: usize,
    extrude_speed_factor: i32,
    travel_speed_factor: i32,
    extra_time: f64,
}

impl<'a> GcodePlanner<'a> {
    pub fn new(
        gcode: &'a mut GcodeExport,
        travel_speed: i32,
        retraction_minimal_distance: Coord,
    ) -> Self {
        let last_position = gcode.position();
        let current_extruder = gcode.extruder();
        Self {
            gcode,
            paths: Vec::new(),
            travel_config: GcodePathConfig::travel(travel_speed),
            retraction_minimal_distance,
            last_position,
            comb_boundary: None,
            always_retract: false,
            force_retraction: false,
            current_extruder,
            extrude_speed_factor: 100,
            travel_speed_factor: 100,
            extra_time: 0.0,
        }
    }

    pub fn extruder(&self) -> usize {
        self.current_extruder
    }

    /// Where the nozzle will be after the paths planned so far.
    pub fn last_position(&self) -> Point {
        self.last_position
    }

    /// Fan commands go straight to the writer: planned paths are written
    /// later, so a fan change issued during planning precedes the layer.
    pub fn add_fan_command(&mut self, speed: i32) {
        self.gcode.add_fan_command(speed);
    }

    /// Select an extruder; returns true when this is an actual change.
    pub fn set_extruder(&mut self, extruder: usize) -> bool {
        if extruder == self.current_extruder {
            return false;
        }
        self.current_extruder = extruder;
        true
    }

    pub fn set_comb_boundary(&mut self, boundary: Option<&Polygons>) {
        self.comb_boundary = boundary.cloned();
    }

    pub fn set_always_retract(&mut self, always: bool) {
        self.always_retract = always;
    }

    pub fn force_retract(&mut self) {
        self.force_retraction = true;
    }

    pub fn extrude_speed_factor(&self) -> i32 {
        self.extrude_speed_factor
    }

    pub fn set_extrude_speed_factor(&mut self, factor: i32) {
        self.extrude_speed_factor = factor.max(1);
    }

    pub fn travel_speed_factor(&self) -> i32 {
        self.travel_speed_factor
    }

    pub fn set_travel_speed_factor(&mut self, factor: i32) {
        self.travel_speed_factor = factor.max(1);
    }

    pub fn add_travel(&mut self, p: Point) {
        let mut path = GcodePath {
            config: self.travel_config.clone(),
            retract: false,
            points: Vec::new(),
        };

        let needs_distance = !(self.last_position)
            .shorter_than(p, self.retraction_minimal_distance);

        if self.force_retraction {
            if needs_distance {
                path.retract = true;
            }
            self.force_retraction = false;
        } else if let Some(boundary) = &self.comb_boundary {
            let comb = Comb::new(boundary);
            match comb.calc(self.last_position, p) {
                Some(waypoints) => {
                    for waypoint in waypoints {
                        path.points.push(waypoint);
                    }
                }
                None => {
                    if needs_distance {
                        path.retract = true;
                    }
                }
            }
        } else if self.always_retract && needs_distance {
            path.retract = true;
        }

        path.points.push(p);
        self.last_position = p;
        self.paths.push(path);
    }

    pub fn add_extrusion_move(&mut self, p: Point, config: &GcodePathConfig) {
        match self.paths.last_mut() {
            Some(path) if path.config == *config => path.points.push(p),
            _ => self.paths.push(GcodePath {
                config: config.clone(),
                retract: false,
                points: vec![p],
            }),
        }
        self.last_position = p;
    }

    /// Extrude one contour starting at vertex `start_idx`. Loops of 3 or more
    /// points are closed back to the start; 2-point lines are not.
    pub fn add_polygon(&mut self, polygon: &Polygon, start_idx: usize, config: &GcodePathConfig) {
        let points = polygon.points();
        if points.is_empty() {
            return;
        }
        self.add_travel(points[start_idx]);
        for i in 1..points.len() {
            let p = points[(start_idx + i) % points.len()];
            self.add_extrusion_move(p, config);
        }
        if points.len() > 2 {
            self.add_extrusion_move(points[start_idx], config);
        }
    }

    /// Extrude a polygon set in travel-minimising order.
    pub fn add_polygons_by_optimizer(&mut self, polygons: &Polygons, config: &GcodePathConfig) {
        let refs: Vec<&Polygon> = polygons.iter().collect();
        let order = path_order::optimize(&refs, self.last_position);
        for &idx in &order.poly_order {
            self.add_polygon(&polygons[idx], order.poly_start[idx], config);
        }
    }

    /// After a part is done, park the nozzle inside the comb boundary so the
    /// next travel does not retract on the outer wall.
    pub fn move_inside_comb_boundary(&mut self, distance: Coord) {
        let moved = match &self.comb_boundary {
            Some(boundary) => Comb::new(boundary).move_inside(self.last_position, distance),
            None => None,
        };
        if let Some(p) = moved {
            self.add_travel(p);
        }
    }

    /// Estimated duration of the planned paths at current factors (seconds),
    /// split into (travel, extrude).
    fn estimate_times(&self) -> (f64, f64) {
        let mut travel_time = 0.0;
        let mut extrude_time = 0.0;
        let mut position = self.gcode.position();
        for path in &self.paths {
            for &p in &path.points {
                let dist = unscale((p - position).vsize());
                if path.config.line_width == 0 {
                    travel_time += dist / path.config.speed.max(1) as f64;
                } else {
                    extrude_time += dist / path.config.speed.max(1) as f64;
                }
                position = p;
            }
        }
        (travel_time, extrude_time)
    }

    /// Slow extrusion down so the layer takes at least `min_time` seconds,
    /// never below `minimal_feedrate` and never faster than already planned.
    pub fn force_minimal_layer_time(&mut self, min_time: f64, minimal_feedrate: i32) {
        let (travel_time, extrude_time) = self.estimate_times();
        let total_time = travel_time + extrude_time;
        if total_time >= min_time || extrude_time <= 0.0 {
            return;
        }

        let min_extrude_time = (min_time - travel_time).max(1.0);
        let mut factor = extrude_time / min_extrude_time;
        for path in &self.paths {
            if path.config.line_width == 0 {
                continue;
            }
            let speed = path.config.speed as f64 * factor;
            if speed < minimal_feedrate as f64 {
                factor = minimal_feedrate as f64 / path.config.speed as f64;
            }
        }

        // Only slow down: a first-layer ramp may already be stricter
        if (factor * 100.0) < self.extrude_speed_factor as f64 {
            self.set_extrude_speed_factor((factor * 100.0) as i32);
        } else {
            factor = self.extrude_speed_factor as f64 / 100.0;
        }

        let slowed_total = extrude_time / factor + travel_time;
        if min_time - slowed_total > 0.1 {
            self.extra_time = min_time - slowed_total;
        }
    }

    /// Stream the planned paths to the writer. `layer_thickness` feeds the
    /// spiralize Z ramp; `lift_head` adds a dwell away from the print when
    /// the layer still finishes too fast after slowdown.
    pub fn write_gcode(&mut self, lift_head: bool, layer_thickness: Coord) {
        self.gcode.switch_extruder(self.current_extruder);
        let layer_z = self.gcode.z();
        let mut last_type = "";

        for path in &self.paths {
            if path.retract {
                self.gcode.add_retraction();
            }
            if path.config.line_width == 0 {
                let speed = self.travel_config.speed * self.travel_speed_factor / 100;
                for &p in &path.points {
                    self.gcode.add_move(p, speed.max(1), 0);
                }
                continue;
            }

            if !path.config.name.is_empty() && path.config.name != last_type {
                self.gcode.add_comment(&format!("TYPE:{}", path.config.name));
                last_type = path.config.name;
            }
            let speed = path.config.speed * self.extrude_speed_factor / 100;

            if path.config.spiralize {
                let total: i64 = std::iter::once(self.gcode.position())
                    .chain(path.points.iter().copied())
                    .collect::<Vec<_>>()
                    .windows(2)
                    .map(|w| (w[1] - w[0]).vsize())
                    .sum();
                let mut walked = 0i64;
                let mut position = self.gcode.position();
                for &p in &path.points {
                    walked += (p - position).vsize();
                    position = p;
                    let z = if total > 0 {
                        layer_z + layer_thickness * walked / total
                    } else {
                        layer_z
                    };
                    self.gcode.set_z(z);
                    self.gcode.add_move(p, speed.max(1), path.config.line_width);
                }
            } else {
                for &p in &path.points {
                    self.gcode.add_move(p, speed.max(1), path.config.line_width);
                }
            }
        }

        if self.extra_time > 0.0 {
            self.gcode.add_comment("Small layer, adding delay");
            self.gcode.add_retraction();
            if lift_head {
                self.gcode.set_z(layer_z + 3_000);
                let position = self.gcode.position();
                let travel_speed = self.travel_config.speed;
                self.gcode.add_move(position, travel_speed, 0);
            }
            self.gcode.add_delay(self.extra_time);
            self.gcode.set_z(layer_z);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;

    fn export() -> GcodeExport {
        let mut gcode = GcodeExport::new();
        gcode.set_extrusion(100, 2890, 100);
        gcode.set_z(300);
        gcode
    }

    fn square_polygons(size: Coord) -> Polygons {
        Polygon::rectangle(Point::new(0, 0), Point::new(size, size)).into()
    }

    #[test]
    fn test_loop_is_closed() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        let config = GcodePathConfig::new(50, 400, "WALL-OUTER");
        planner.add_polygons_by_optimizer(&square_polygons(10_000), &config);
        planner.write_gcode(false, 100);

        // 1 travel + 4 extrusion moves (closing edge included)
        let extrudes = gcode
            .buffer()
            .lines()
            .filter(|l| l.starts_with("G1") && l.contains(" X"))
            .count();
        assert_eq!(extrudes, 4);
        assert!(gcode.buffer().contains(";TYPE:WALL-OUTER"));
    }

    #[test]
    fn test_two_point_line_not_closed() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        let config = GcodePathConfig::new(50, 400, "FILL");
        let line: Polygons =
            Polygon::from_points(vec![Point::new(0, 0), Point::new(10_000, 0)]).into();
        planner.add_polygons_by_optimizer(&line, &config);
        planner.write_gcode(false, 100);

        let extrudes = gcode
            .buffer()
            .lines()
            .filter(|l| l.starts_with("G1") && l.contains(" X"))
            .count();
        assert_eq!(extrudes, 1);
    }

    #[test]
    fn test_always_retract_long_travel() {
        let mut gcode = export();
        gcode.add_move(Point::new(0, 0), 50, 400); // prime some filament
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        planner.set_always_retract(true);
        planner.add_travel(Point::new(50_000, 0));
        planner.write_gcode(false, 100);
        assert!(gcode.buffer().contains("E-"), "expected a retraction");
    }

    #[test]
    fn test_short_travel_never_retracts() {
        let mut gcode = export();
        gcode.add_move(Point::new(0, 0), 50, 400);
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        planner.set_always_retract(true);
        planner.add_travel(Point::new(1_000, 0));
        planner.write_gcode(false, 100);
        assert!(!gcode.buffer().contains("E-"));
    }

    #[test]
    fn test_minimal_layer_time_slows_down() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        let config = GcodePathConfig::new(50, 400, "WALL-OUTER");
        // A tiny square prints in far under 5 seconds
        planner.add_polygons_by_optimizer(&square_polygons(5_000), &config);
        planner.force_minimal_layer_time(5.0, 10);
        assert!(planner.extrude_speed_factor() < 100);
    }

    #[test]
    fn test_minimal_feedrate_floor() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        let config = GcodePathConfig::new(50, 400, "WALL-OUTER");
        planner.add_polygons_by_optimizer(&square_polygons(2_000), &config);
        // Needing 60s would slow below the floor; the floor wins
        planner.force_minimal_layer_time(60.0, 10);
        // 10 mm/s out of 50 mm/s is a factor of 20%
        assert_eq!(planner.extrude_speed_factor(), 20);
    }

    #[test]
    fn test_minimal_layer_time_never_speeds_up() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        planner.set_extrude_speed_factor(40);
        let config = GcodePathConfig::new(50, 400, "WALL-OUTER");
        planner.add_polygons_by_optimizer(&square_polygons(200_000), &config);
        // A huge square takes longer than 1s on its own
        planner.force_minimal_layer_time(1.0, 10);
        assert_eq!(planner.extrude_speed_factor(), 40);
    }

    #[test]
    fn test_speed_factor_applied_to_output() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        planner.set_extrude_speed_factor(40);
        let config = GcodePathConfig::new(50, 400, "WALL-OUTER");
        planner.add_polygons_by_optimizer(&square_polygons(10_000), &config);
        planner.write_gcode(false, 100);
        // 50 mm/s at 40% = 20 mm/s = F1200
        assert!(gcode.buffer().contains("F1200"));
    }

    #[test]
    fn test_spiralize_ramps_z() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        let mut config = GcodePathConfig::new(50, 400, "WALL-OUTER");
        config.spiralize = true;
        planner.add_polygons_by_optimizer(&square_polygons(10_000), &config);
        planner.write_gcode(false, 100);

        // The final extrusion ends a full layer height up
        let z_values: Vec<&str> = gcode
            .buffer()
            .lines()
            .filter(|l| l.contains(" Z"))
            .collect();
        assert!(z_values.last().unwrap().contains("Z0.40"));
    }

    #[test]
    fn test_extra_time_dwell() {
        let mut gcode = export();
        let mut planner = GcodePlanner::new(&mut gcode, 150, 1_500);
        let config = GcodePathConfig::new(50, 400, "WALL-OUTER");
        planner.add_polygons_by_optimizer(&square_polygons(2_000), &config);
        planner.force_minimal_layer_time(30.0, 10);
        planner.write_gcode(true, 100);
        assert!(gcode.buffer().contains("G4 P"));
    }
}

//! Machine-instruction writer.
//!
//! A buffered, line-oriented G-code sink with position, filament and
//! print-time bookkeeping. The output file is opened up front so an
//! unwritable destination is fatal before any pipeline stage runs; lines are
//! buffered in memory (UltiGCode needs its header patched with totals at the
//! end) and flushed once on [`GcodeExport::finish`].

use crate::geometry::Point;
use crate::settings::{GcodeFlavor, MAX_EXTRUDERS};
use crate::{unscale, Coord, Error, Result};
use std::f64::consts::PI;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;

pub struct GcodeExport {
    file: Option<File>,
    buffer: String,

    flavor: GcodeFlavor,
    extruder_offset: [Point; MAX_EXTRUDERS],

    current_position: Point,
    current_z: Coord,
    /// Target Z for the next move.
    z: Coord,
    current_speed: i32,
    current_fan_speed: i32,

    extruder_nr: usize,
    /// E value in the writer's native unit: mm of filament, or mm^3 for
    /// UltiGCode.
    extrusion_amount: f64,
    /// Native E units per mm of travel per mm of line width.
    extrusion_per_mm: f64,
    extrusion_amount_at_previous_retraction: f64,
    is_retracted: bool,

    retraction_amount: f64,
    retraction_speed: i32,
    extruder_switch_retraction: f64,
    minimal_extrusion_before_retraction: f64,
    retraction_z_hop: Coord,

    total_print_time: f64,
    total_filament: [f64; MAX_EXTRUDERS],
}

impl GcodeExport {
    pub fn new() -> Self {
        Self {
            file: None,
            buffer: String::new(),
            flavor: GcodeFlavor::RepRap,
            extruder_offset: [Point::new(0, 0); MAX_EXTRUDERS],
            current_position: Point::new(0, 0),
            current_z: 0,
            z: 0,
            current_speed: 0,
            current_fan_speed: -1,
            extruder_nr: 0,
            extrusion_amount: 0.0,
            extrusion_per_mm: 0.0,
            extrusion_amount_at_previous_retraction: -1.0,
            is_retracted: false,
            retraction_amount: 4.5,
            retraction_speed: 45,
            extruder_switch_retraction: 14.5,
            minimal_extrusion_before_retraction: 0.1,
            retraction_z_hop: 0,
            total_print_time: 0.0,
            total_filament: [0.0; MAX_EXTRUDERS],
        }
    }

    /// Open the output destination. Failing here aborts the whole run before
    /// any stage executes.
    pub fn set_target_file(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| Error::Gcode(format!("cannot write {}: {}", path.display(), e)))?;
        self.file = Some(file);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    pub fn set_flavor(&mut self, flavor: GcodeFlavor) {
        self.flavor = flavor;
    }

    pub fn flavor(&self) -> GcodeFlavor {
        self.flavor
    }

    pub fn set_extruder_offset(&mut self, extruder: usize, offset: Point) {
        if extruder < MAX_EXTRUDERS {
            self.extruder_offset[extruder] = offset;
        }
    }

    /// Retraction lengths arrive in micrometers of filament and are kept in
    /// millimeters internally.
    pub fn set_retraction_settings(
        &mut self,
        amount: Coord,
        speed: i32,
        extruder_switch_amount: Coord,
        minimal_extrusion: Coord,
        z_hop: Coord,
    ) {
        self.retraction_amount = unscale(amount);
        self.retraction_speed = speed;
        self.extruder_switch_retraction = unscale(extruder_switch_amount);
        self.minimal_extrusion_before_retraction = unscale(minimal_extrusion);
        self.retraction_z_hop = z_hop;
    }

    /// Derive the extrusion rate for the coming layer.
    pub fn set_extrusion(&mut self, layer_thickness: Coord, filament_diameter: Coord, flow: i32) {
        if self.flavor == GcodeFlavor::UltiGcode {
            // Volumetric firmware: E carries mm^3
            self.extrusion_per_mm = unscale(layer_thickness);
        } else {
            let radius = unscale(filament_diameter) / 2.0;
            let filament_area = PI * radius * radius;
            self.extrusion_per_mm = unscale(layer_thickness) / filament_area * flow as f64 / 100.0;
        }
    }

    pub fn set_z(&mut self, z: Coord) {
        self.z = z;
    }

    pub fn z(&self) -> Coord {
        self.z
    }

    pub fn position(&self) -> Point {
        self.current_position
    }

    pub fn extruder(&self) -> usize {
        self.extruder_nr
    }

    pub fn total_print_time(&self) -> f64 {
        self.total_print_time
    }

    /// Filament drawn through `extruder`, in native E units.
    pub fn total_filament_used(&self, extruder: usize) -> f64 {
        let mut total = self.total_filament[extruder];
        if extruder == self.extruder_nr {
            total += self.extrusion_amount;
        }
        total
    }

    fn write_line(&mut self, line: &str) {
        if self.flavor == GcodeFlavor::Mach3 {
            // Mach3 addresses the extruder axis as A
            self.buffer.push_str(&line.replace(" E", " A"));
        } else {
            self.buffer.push_str(line);
        }
        self.buffer.push('\n');
    }

    /// Emit raw lines (start/end sequences, firmware headers).
    pub fn add_code(&mut self, code: &str) {
        for line in code.lines() {
            if !line.is_empty() {
                self.write_line(line);
            }
        }
    }

    pub fn add_comment(&mut self, comment: &str) {
        self.write_line(&format!(";{}", comment));
    }

    /// Travel (`line_width == 0`) or extrusion move to `p` at `speed` mm/s.
    pub fn add_move(&mut self, p: Point, speed: i32, line_width: Coord) {
        let mut line = String::new();

        if line_width != 0 {
            if self.is_retracted {
                if self.flavor == GcodeFlavor::UltiGcode {
                    self.write_line("G11");
                } else {
                    let prime = format!(
                        "G1 F{} E{:.5}",
                        self.retraction_speed * 60,
                        self.extrusion_amount
                    );
                    self.write_line(&prime);
                    self.current_speed = self.retraction_speed;
                }
                if self.retraction_z_hop > 0 {
                    self.z -= self.retraction_z_hop;
                }
                // Keep E readable in long prints
                if self.extrusion_amount > 10_000.0 {
                    self.reset_extrusion_value();
                }
                self.is_retracted = false;
            }
            let dist = unscale((p - self.current_position).vsize());
            self.extrusion_amount += unscale(line_width) * self.extrusion_per_mm * dist;
            line.push_str("G1");
        } else {
            line.push_str("G0");
        }

        if speed != self.current_speed {
            line.push_str(&format!(" F{}", speed * 60));
            self.current_speed = speed;
        }

        let offset = self.extruder_offset[self.extruder_nr];
        line.push_str(&format!(
            " X{:.2} Y{:.2}",
            unscale(p.x - offset.x),
            unscale(p.y - offset.y)
        ));
        if self.z != self.current_z {
            line.push_str(&format!(" Z{:.2}", unscale(self.z)));
            self.current_z = self.z;
        }
        if line_width != 0 {
            line.push_str(&format!(" E{:.5}", self.extrusion_amount));
        }
        self.write_line(&line);

        let dist = unscale((p - self.current_position).vsize());
        if speed > 0 {
            self.total_print_time += dist / speed as f64;
        }
        self.current_position = p;
    }

    pub fn add_retraction(&mut self) {
        if self.retraction_amount <= 0.0 || self.is_retracted {
            return;
        }
        if self.extrusion_amount_at_previous_retraction + self.minimal_extrusion_before_retraction
            > self.extrusion_amount
        {
            return;
        }

        if self.flavor == GcodeFlavor::UltiGcode {
            self.write_line("G10");
        } else {
            let retract = format!(
                "G1 F{} E{:.5}",
                self.retraction_speed * 60,
                self.extrusion_amount - self.retraction_amount
            );
            self.write_line(&retract);
            self.current_speed = self.retraction_speed;
        }
        if self.retraction_z_hop > 0 {
            self.z += self.retraction_z_hop;
        }
        self.extrusion_amount_at_previous_retraction = self.extrusion_amount;
        self.is_retracted = true;
    }

    /// Select another extruder, retracting the old filament first.
    pub fn switch_extruder(&mut self, new_extruder: usize) {
        if self.extruder_nr == new_extruder || new_extruder >= MAX_EXTRUDERS {
            return;
        }
        self.reset_extrusion_value();
        self.extruder_nr = new_extruder;

        if self.flavor == GcodeFlavor::UltiGcode {
            self.write_line("G10 S1");
        } else {
            let retract = format!(
                "G1 F{} E{:.5}",
                self.retraction_speed * 60,
                self.extrusion_amount - self.extruder_switch_retraction
            );
            self.write_line(&retract);
            self.current_speed = self.retraction_speed;
        }
        self.is_retracted = true;
        let select = format!("T{}", new_extruder);
        self.write_line(&select);
    }

    /// Zero the E axis, crediting what was extruded to the active extruder.
    pub fn reset_extrusion_value(&mut self) {
        if self.extrusion_amount != 0.0 {
            self.write_line("G92 E0");
            self.total_filament[self.extruder_nr] += self.extrusion_amount;
            self.extrusion_amount_at_previous_retraction -= self.extrusion_amount;
            self.extrusion_amount = 0.0;
        }
    }

    /// Fan strength in percent.
    pub fn add_fan_command(&mut self, speed: i32) {
        if self.current_fan_speed == speed {
            return;
        }
        if speed > 0 {
            if self.flavor == GcodeFlavor::Makerbot {
                self.write_line("M126 T0");
            } else {
                let cmd = format!("M106 S{}", speed * 255 / 100);
                self.write_line(&cmd);
            }
        } else if self.flavor == GcodeFlavor::Makerbot {
            self.write_line("M127 T0");
        } else {
            self.write_line("M107");
        }
        self.current_fan_speed = speed;
    }

    /// Dwell for `seconds`.
    pub fn add_delay(&mut self, seconds: f64) {
        let cmd = format!("G4 P{}", (seconds * 1000.0) as i64);
        self.write_line(&cmd);
        self.total_print_time += seconds;
    }

    /// Patch a placeholder written near the top of the stream (UltiGCode
    /// time/material header).
    pub fn replace_tag_in_start(&mut self, tag: &str, value: &str) {
        self.buffer = self.buffer.replacen(tag, value, 1);
    }

    /// Lines emitted so far; used by tests and diagnostics.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Flush everything to the output file.
    pub fn finish(&mut self) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Gcode("no output file set".into()))?;
        file.write_all(self.buffer.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

impl Default for GcodeExport {
    fn default() -> Self {
        Self::new()
    }
}

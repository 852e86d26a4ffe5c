//! Pipeline orchestration.
//!
//! [`FffProcessor`] drives the strict stage order from model file to
//! instruction stream:
//!
//! load -> optimize -> slice -> support grid -> layer parts -> insets ->
//! ooze shield -> skin/sparse -> wipe-tower shape -> skirt -> raft ->
//! bridge angles -> emission (raft layers at negative indices, then 0..N).
//!
//! Each stage trusts the storage populated by its producer; the only fatal
//! errors are unreadable input and an unwritable output destination, both
//! raised before any later stage runs.

use crate::adhesion;
use crate::bridge::bridge_angle;
use crate::gcode::{GcodeExport, GcodePathConfig, GcodePlanner};
use crate::geometry::{Point, Polygon, Polygons};
use crate::infill::generate_line_infill;
use crate::inset::generate_insets;
use crate::mesh::{Matrix3, SimpleMesh};
use crate::optimize::OptimizedMesh;
use crate::settings::{GcodeFlavor, SliceSettings, SupportType, MAX_EXTRUDERS};
use crate::shield::generate_ooze_shield;
use crate::skin::{generate_skins, generate_sparse};
use crate::slice::Slicer;
use crate::storage::{create_layer_parts, generate_multi_volume_overlap, SliceDataStorage};
use crate::support;
use crate::{Coord, Error, Result, VERSION};
use log::{debug, info};
use std::path::Path;
use std::time::Instant;

/// Extrusion configs per feature type, fixed for a run.
#[derive(Clone)]
struct PathConfigs {
    skirt: GcodePathConfig,
    inset0: GcodePathConfig,
    inset_x: GcodePathConfig,
    fill: GcodePathConfig,
    support: GcodePathConfig,
}

/// Fused-filament-fabrication processor: one instance per output stream,
/// reusable across model files (they stack into one print).
pub struct FffProcessor {
    settings: SliceSettings,
    gcode: GcodeExport,
    configs: PathConfigs,
    file_nr: i32,
    max_object_height: Coord,
}

impl FffProcessor {
    pub fn new(settings: SliceSettings) -> Self {
        let configs = PathConfigs {
            skirt: GcodePathConfig::new(settings.print_speed, settings.extrusion_width, "SKIRT"),
            inset0: GcodePathConfig::new(
                settings.print_speed,
                settings.extrusion_width,
                "WALL-OUTER",
            ),
            inset_x: GcodePathConfig::new(
                settings.print_speed,
                settings.extrusion_width,
                "WALL-INNER",
            ),
            fill: GcodePathConfig::new(settings.infill_speed, settings.extrusion_width, "FILL"),
            support: GcodePathConfig::new(
                settings.print_speed,
                settings.extrusion_width,
                "SUPPORT",
            ),
        };
        Self {
            settings,
            gcode: GcodeExport::new(),
            configs,
            file_nr: 1,
            max_object_height: 0,
        }
    }

    /// Open the output destination; fatal when unwritable. Nothing else runs
    /// before this succeeds.
    pub fn set_target_file(&mut self, path: &Path) -> Result<()> {
        self.gcode.set_target_file(path)?;
        self.gcode
            .add_comment(&format!("Generated with stratoslice {}", VERSION));
        Ok(())
    }

    /// Access to the writer; exposes totals and the emitted stream.
    pub fn gcode(&self) -> &GcodeExport {
        &self.gcode
    }

    /// Slice one model file into the output stream.
    pub fn process_file(&mut self, path: &Path) -> Result<()> {
        let matrix = Matrix3::identity();
        let mesh = SimpleMesh::load(path, &matrix)?;
        self.process_model(&mesh)?;
        Ok(())
    }

    /// Slice an in-memory model into the output stream. Returns the populated
    /// storage for inspection.
    pub fn process_model(&mut self, mesh: &SimpleMesh) -> Result<SliceDataStorage> {
        if !self.gcode.is_valid() {
            return Err(Error::Gcode("no output target set".into()));
        }
        self.settings.validate()?;
        self.pre_setup();

        let mut storage = SliceDataStorage::default();
        self.prepare_model(&mut storage, mesh);
        self.process_slice_data(&mut storage);
        self.write_gcode(&storage);
        Ok(storage)
    }

    fn pre_setup(&mut self) {
        for n in 0..MAX_EXTRUDERS {
            self.gcode.set_extruder_offset(n, self.settings.extruder_offset[n]);
        }
        self.gcode.set_flavor(self.settings.gcode_flavor);
        self.gcode.set_retraction_settings(
            self.settings.retraction_amount,
            self.settings.retraction_speed,
            self.settings.retraction_amount_extruder_switch,
            self.settings.minimal_extrusion_before_retraction,
            self.settings.retraction_z_hop,
        );
    }

    /// LOAD/OPTIMIZE/SLICE/SUPPORT-GRID/LAYER-PARTS stages.
    fn prepare_model(&mut self, storage: &mut SliceDataStorage, mesh: &SimpleMesh) {
        let timer = Instant::now();
        let optimized = OptimizedMesh::new(
            mesh,
            self.settings.object_position,
            self.settings.object_sink,
        );
        info!("optimized model in {:.3}s", timer.elapsed().as_secs_f64());

        let timer = Instant::now();
        let first_layer_z =
            self.settings.initial_layer_thickness - self.settings.layer_thickness / 2;
        let mut slicers = Vec::new();
        for volume in &optimized.volumes {
            let slicer = Slicer::new(
                volume,
                first_layer_z,
                self.settings.layer_thickness,
                self.settings.keep_open_faces,
                self.settings.extensive_stitching,
            );
            for (layer_nr, layer) in slicer.layers.iter().enumerate() {
                if !layer.open_polygons.is_empty() {
                    debug!(
                        "layer {}: {} unclosed contour(s)",
                        layer_nr,
                        layer.open_polygons.len()
                    );
                }
            }
            slicers.push(slicer);
        }
        info!("sliced model in {:.3}s", timer.elapsed().as_secs_f64());

        support::generate_support_grid(storage, &optimized, &self.settings);

        storage.model_size = optimized.size;
        storage.model_min = optimized.min;
        storage.model_max = optimized.max;

        let timer = Instant::now();
        for slicer in &slicers {
            let mut volume = Default::default();
            create_layer_parts(&mut volume, slicer, self.settings.union_all_parts);
            storage.volumes.push(volume);
        }
        info!(
            "generated layer parts in {:.3}s",
            timer.elapsed().as_secs_f64()
        );
    }

    /// INSETS through BRIDGE-ANGLE stages.
    fn process_slice_data(&mut self, storage: &mut SliceDataStorage) {
        generate_multi_volume_overlap(&mut storage.volumes, self.settings.multi_volume_overlap);

        let total_layers = storage
            .volumes
            .iter()
            .map(|v| v.layers.len())
            .max()
            .unwrap_or(0);

        let timer = Instant::now();
        for layer_nr in 0..total_layers {
            for volume in &mut storage.volumes {
                if layer_nr >= volume.layers.len() {
                    continue;
                }
                let mut inset_count = self.settings.inset_count;
                if self.settings.spiralize_mode
                    && (layer_nr as i32) < self.settings.down_skin_count
                    && layer_nr % 2 == 1
                {
                    // Extra walls every second bottom layer keep spiralized
                    // cups watertight
                    inset_count += 5;
                }
                generate_insets(
                    &mut volume.layers[layer_nr],
                    self.settings.extrusion_width,
                    inset_count,
                );
            }
        }
        info!("generated insets in {:.3}s", timer.elapsed().as_secs_f64());

        if self.settings.enable_ooze_shield {
            generate_ooze_shield(storage, &self.settings);
        }

        let timer = Instant::now();
        for layer_nr in 0..total_layers {
            if self.settings.spiralize_mode
                && layer_nr as i32 >= self.settings.down_skin_count
            {
                continue; // spiralize prints a single wall above the bottom
            }
            for volume in &mut storage.volumes {
                if layer_nr >= volume.layers.len() {
                    continue;
                }
                generate_skins(
                    layer_nr,
                    volume,
                    self.settings.extrusion_width,
                    self.settings.down_skin_count,
                    self.settings.up_skin_count,
                );
                generate_sparse(
                    layer_nr,
                    volume,
                    self.settings.extrusion_width,
                    self.settings.down_skin_count,
                    self.settings.up_skin_count,
                );
            }
        }
        info!(
            "generated top/bottom skin in {:.3}s",
            timer.elapsed().as_secs_f64()
        );

        if self.settings.wipe_tower_size > 0 {
            let size = self.settings.wipe_tower_size;
            let min = Point::new(
                storage.model_min.x - 3_000 - size,
                storage.model_max.y + 3_000,
            );
            let max = Point::new(storage.model_min.x - 3_000, storage.model_max.y + 3_000 + size);
            storage.wipe_tower.push(Polygon::rectangle(min, max));
            storage.wipe_point = Point::new((min.x + max.x) / 2, (min.y + max.y) / 2);
        }

        adhesion::generate_skirt(storage, &self.settings);
        adhesion::generate_raft(storage, &self.settings);

        for volume in &mut storage.volumes {
            for layer_nr in 1..volume.layers.len() {
                let (below, at) = volume.layers.split_at_mut(layer_nr);
                let prev_layer = &below[layer_nr - 1];
                for part in &mut at[0].parts {
                    part.bridge_angle = bridge_angle(part, prev_layer);
                }
            }
        }
    }

    /// GCODE-EMIT stage.
    fn write_gcode(&mut self, storage: &SliceDataStorage) {
        let settings = self.settings.clone();
        let configs = self.configs.clone();

        if self.file_nr == 1 {
            if settings.gcode_flavor == GcodeFlavor::UltiGcode {
                self.gcode.add_code(";FLAVOR:UltiGCode");
                self.gcode.add_code(";TIME:<__TIME__>");
                self.gcode.add_code(";MATERIAL:<FILAMENT>");
                self.gcode.add_code(";MATERIAL2:<FILAMEN2>");
            }
            self.gcode.add_code(&settings.start_code);
        } else {
            // Another model into the same stream: clear the previous one
            self.gcode.add_fan_command(0);
            self.gcode.reset_extrusion_value();
            self.gcode.add_retraction();
            self.gcode.set_z(self.max_object_height + 5_000);
            self.gcode.add_move(
                Point::new(storage.model_min.x, storage.model_min.y),
                settings.move_speed,
                0,
            );
        }
        self.file_nr += 1;

        let total_layers = storage
            .volumes
            .iter()
            .map(|v| v.layers.len())
            .max()
            .unwrap_or(0);
        self.gcode.add_comment(&format!("Layer count: {}", total_layers));

        let raft_thickness = settings.raft_base_thickness + settings.raft_interface_thickness;
        if settings.raft_base_thickness > 0 && settings.raft_interface_thickness > 0 {
            let base_config = GcodePathConfig::new(
                settings.initial_layer_speed,
                settings.raft_base_linewidth,
                "SUPPORT",
            );
            let interface_config = GcodePathConfig::new(
                settings.initial_layer_speed,
                settings.raft_interface_linewidth,
                "SUPPORT",
            );

            self.gcode.add_comment("LAYER:-2");
            self.gcode.add_comment("RAFT");
            self.gcode.set_z(settings.raft_base_thickness);
            self.gcode.set_extrusion(
                settings.raft_base_thickness,
                settings.filament_diameter,
                settings.filament_flow,
            );
            let mut planner = GcodePlanner::new(
                &mut self.gcode,
                settings.move_speed,
                settings.retraction_minimal_distance,
            );
            planner.add_polygons_by_optimizer(&storage.raft_outline, &base_config);
            let mut raft_lines = Polygons::new();
            generate_line_infill(
                &storage.raft_outline,
                &mut raft_lines,
                settings.raft_base_linewidth,
                settings.raft_line_spacing,
                settings.infill_overlap,
                0.0,
            );
            planner.add_polygons_by_optimizer(&raft_lines, &base_config);
            planner.write_gcode(false, settings.raft_base_thickness);

            self.gcode.add_comment("LAYER:-1");
            self.gcode.add_comment("RAFT");
            self.gcode.set_z(raft_thickness);
            self.gcode.set_extrusion(
                settings.raft_interface_thickness,
                settings.filament_diameter,
                settings.filament_flow,
            );
            let mut planner = GcodePlanner::new(
                &mut self.gcode,
                settings.move_speed,
                settings.retraction_minimal_distance,
            );
            let mut raft_lines = Polygons::new();
            generate_line_infill(
                &storage.raft_outline,
                &mut raft_lines,
                settings.raft_interface_linewidth,
                settings.raft_line_spacing,
                settings.infill_overlap,
                90.0,
            );
            planner.add_polygons_by_optimizer(&raft_lines, &interface_config);
            planner.write_gcode(false, settings.raft_interface_thickness);
        }

        let mut volume_idx = 0;
        for layer_nr in 0..total_layers {
            self.gcode.add_comment(&format!("LAYER:{}", layer_nr));
            let layer_thickness = if layer_nr == 0 {
                settings.initial_layer_thickness
            } else {
                settings.layer_thickness
            };
            self.gcode.set_extrusion(
                layer_thickness,
                settings.filament_diameter,
                settings.filament_flow,
            );
            let z = settings.initial_layer_thickness
                + layer_nr as Coord * settings.layer_thickness
                + raft_thickness;
            self.gcode.set_z(z);

            let mut planner = GcodePlanner::new(
                &mut self.gcode,
                settings.move_speed,
                settings.retraction_minimal_distance,
            );

            let print_support_first = storage.support.generated
                && settings.support_extruder > 0
                && settings.support_extruder as usize == planner.extruder();
            if print_support_first {
                add_support(&settings, &configs, storage, &mut planner, layer_nr);
            }

            for volume_cnt in 0..storage.volumes.len() {
                if volume_cnt > 0 {
                    volume_idx = (volume_idx + 1) % storage.volumes.len();
                }
                add_volume_layer(&settings, &configs, storage, &mut planner, volume_idx, layer_nr);
            }
            if !print_support_first {
                add_support(&settings, &configs, storage, &mut planner, layer_nr);
            }

            // First layers print slower, ramping linearly up to full speed
            if (layer_nr as i32) < settings.initial_speedup_layers {
                let factor = initial_speed_factor(&settings, layer_nr as i32);
                planner.set_extrude_speed_factor(factor);
                if layer_nr == 0 {
                    planner.set_travel_speed_factor(factor);
                }
            }
            planner.force_minimal_layer_time(
                settings.minimal_layer_time as f64,
                settings.minimal_feedrate,
            );

            let fan_speed = fan_speed_for(&settings, planner.extrude_speed_factor(), layer_nr as i32);
            planner.add_fan_command(fan_speed);

            planner.write_gcode(settings.cool_head_lift, layer_thickness);
        }

        info!(
            "wrote {} layer(s), estimated print time {:.0}s",
            total_layers,
            self.gcode.total_print_time()
        );

        // Later models must clear everything already printed
        self.max_object_height = self.max_object_height.max(storage.model_size.z);
    }

    /// Emit the tail of the stream and flush to disk.
    pub fn finish(&mut self) -> Result<()> {
        if !self.gcode.is_valid() {
            return Err(Error::Gcode("no output target set".into()));
        }
        self.gcode.add_fan_command(0);
        self.gcode.add_retraction();
        self.gcode.set_z(self.max_object_height + 5_000);
        let position = self.gcode.position();
        let move_speed = self.settings.move_speed;
        self.gcode.add_move(position, move_speed, 0);
        let end_code = self.settings.end_code.clone();
        self.gcode.add_code(&end_code);

        info!("print time: {:.0}s", self.gcode.total_print_time());
        for e in 0..2 {
            info!("filament {}: {:.0}mm", e, self.gcode.total_filament_used(e));
        }

        if self.settings.gcode_flavor == GcodeFlavor::UltiGcode {
            let time = format!("{}", self.gcode.total_print_time() as i64);
            self.gcode.replace_tag_in_start("<__TIME__>", &time);
            let filament = format!("{}", self.gcode.total_filament_used(0) as i64);
            self.gcode.replace_tag_in_start("<FILAMENT>", &filament);
            let filament2 = format!("{}", self.gcode.total_filament_used(1) as i64);
            self.gcode.replace_tag_in_start("<FILAMEN2>", &filament2);
        }

        self.gcode.finish()
    }
}

/// Extrude-speed factor (percent) for the first-layer ramp: the layer-0
/// factor is `initialLayerSpeed / printSpeed`, rising linearly to 100% at
/// layer `initialSpeedupLayers - 1`.
fn initial_speed_factor(settings: &SliceSettings, layer_nr: i32) -> i32 {
    let n = settings.initial_speedup_layers;
    let layer0_factor = settings.initial_layer_speed * 100 / settings.print_speed;
    if layer_nr >= n {
        return 100;
    }
    if n <= 1 {
        return layer0_factor;
    }
    (layer0_factor * (n - 1 - layer_nr) + 100 * layer_nr) / (n - 1)
}

/// Fan strength (percent): full fan when extrusion is slowed to half speed or
/// less, linearly down to the minimum at full speed, and ramped in from zero
/// over the first `fanFullOnLayerNr` layers.
fn fan_speed_for(settings: &SliceSettings, extrude_speed_factor: i32, layer_nr: i32) -> i32 {
    let mut fan_speed = if extrude_speed_factor <= 50 {
        settings.fan_speed_max
    } else {
        let n = (extrude_speed_factor - 50).min(50);
        settings.fan_speed_min * n / 50 + settings.fan_speed_max * (50 - n) / 50
    };
    if layer_nr < settings.fan_full_on_layer_nr && settings.fan_full_on_layer_nr > 0 {
        fan_speed = fan_speed * layer_nr / settings.fan_full_on_layer_nr;
    }
    fan_speed
}

/// Emit one volume's layer: skirt (layer 0), wipe tower on extruder change,
/// ooze shield, then per part the walls inner-to-outer, skin and sparse
/// infill, ending inside the comb boundary.
fn add_volume_layer(
    settings: &SliceSettings,
    configs: &PathConfigs,
    storage: &SliceDataStorage,
    planner: &mut GcodePlanner,
    volume_idx: usize,
    layer_nr: usize,
) {
    let prev_extruder = planner.extruder();
    let extruder_changed = planner.set_extruder(volume_idx);

    if layer_nr == 0 && volume_idx == 0 {
        planner.add_polygons_by_optimizer(&storage.skirt, &configs.skirt);
    }

    let volume = &storage.volumes[volume_idx];
    if layer_nr >= volume.layers.len() {
        return;
    }
    let layer = &volume.layers[layer_nr];

    if extruder_changed {
        add_wipe_tower(settings, configs, storage, planner, layer_nr, prev_extruder);
    }

    if layer_nr < storage.ooze_shield.len() && storage.volumes.len() > 1 {
        planner.set_always_retract(true);
        planner.add_polygons_by_optimizer(&storage.ooze_shield[layer_nr], &configs.skirt);
        planner.set_always_retract(!settings.enable_combing);
    }

    // Visit parts in travel-minimising order of their outer wall starts
    let outer_walls: Vec<&Polygon> = layer
        .parts
        .iter()
        .map(|part| &part.insets[0][0])
        .collect();
    let order = crate::gcode::path_order::optimize(&outer_walls, planner.last_position());

    for &part_idx in &order.poly_order {
        let part = &layer.parts[part_idx];

        if settings.enable_combing {
            planner.set_comb_boundary(Some(&part.comb_boundary));
        } else {
            planner.set_always_retract(true);
        }

        if settings.inset_count > 0 {
            let mut inset0_config = configs.inset0.clone();
            if settings.spiralize_mode {
                if layer_nr as i32 >= settings.down_skin_count {
                    inset0_config.spiralize = true;
                }
                if layer_nr as i32 == settings.down_skin_count && !part.insets.is_empty() {
                    // One normal outer wall under the spiral seals the bottom
                    planner.add_polygons_by_optimizer(&part.insets[0], &configs.inset_x);
                }
            }
            for inset_nr in (0..part.insets.len()).rev() {
                let config = if inset_nr == 0 {
                    &inset0_config
                } else {
                    &configs.inset_x
                };
                planner.add_polygons_by_optimizer(&part.insets[inset_nr], config);
            }
        }

        let mut fill_polygons = Polygons::new();
        let mut fill_angle = settings.infill_angle;
        if layer_nr % 2 == 1 {
            fill_angle += 90;
        }
        let skin_angle = if part.bridge_angle > -1 {
            part.bridge_angle
        } else {
            fill_angle
        };
        generate_line_infill(
            &part.skin_outline,
            &mut fill_polygons,
            settings.extrusion_width,
            settings.extrusion_width,
            settings.infill_overlap,
            skin_angle as f64,
        );
        if settings.sparse_infill_line_distance > 0 {
            if settings.sparse_infill_line_distance > settings.extrusion_width * 4 {
                // Wide spacing: cross-hatch both directions at double distance
                generate_line_infill(
                    &part.sparse_outline,
                    &mut fill_polygons,
                    settings.extrusion_width,
                    settings.sparse_infill_line_distance * 2,
                    settings.infill_overlap,
                    settings.infill_angle as f64,
                );
                generate_line_infill(
                    &part.sparse_outline,
                    &mut fill_polygons,
                    settings.extrusion_width,
                    settings.sparse_infill_line_distance * 2,
                    settings.infill_overlap,
                    (settings.infill_angle + 90) as f64,
                );
            } else {
                generate_line_infill(
                    &part.sparse_outline,
                    &mut fill_polygons,
                    settings.extrusion_width,
                    settings.sparse_infill_line_distance,
                    settings.infill_overlap,
                    fill_angle as f64,
                );
            }
        }
        planner.add_polygons_by_optimizer(&fill_polygons, &configs.fill);

        // Leave the nozzle off the outer wall so the next travel does not
        // retract sitting on the surface
        if !settings.spiralize_mode || (layer_nr as i32) < settings.down_skin_count {
            planner.move_inside_comb_boundary(settings.extrusion_width * 2);
        }
    }
    planner.set_comb_boundary(None);
}

/// Emit the support structure for one layer.
fn add_support(
    settings: &SliceSettings,
    configs: &PathConfigs,
    storage: &SliceDataStorage,
    planner: &mut GcodePlanner,
    layer_nr: usize,
) {
    if !storage.support.generated {
        return;
    }

    if settings.support_extruder > -1 {
        let prev_extruder = planner.extruder();
        if planner.set_extruder(settings.support_extruder as usize) {
            add_wipe_tower(settings, configs, storage, planner, layer_nr, prev_extruder);
        }
        if layer_nr < storage.ooze_shield.len() && storage.volumes.len() == 1 {
            planner.set_always_retract(true);
            planner.add_polygons_by_optimizer(&storage.ooze_shield[layer_nr], &configs.skirt);
            planner.set_always_retract(!settings.enable_combing);
        }
    }

    let z = settings.initial_layer_thickness + layer_nr as Coord * settings.layer_thickness;
    let islands = support::generate_support_areas(storage, settings, layer_nr, z);

    for island in &islands {
        let lines = support::generate_support_lines(island, settings, layer_nr);

        planner.force_retract();
        if settings.enable_combing {
            planner.set_comb_boundary(Some(island));
        }
        if settings.support_type == SupportType::Grid {
            planner.add_polygons_by_optimizer(island, &configs.support);
        }
        planner.add_polygons_by_optimizer(&lines, &configs.support);
        planner.set_comb_boundary(None);
    }
}

/// Print the wipe/prime tower after an extruder change and park the new
/// nozzle on the wipe point, offset-aligned with the old one.
fn add_wipe_tower(
    settings: &SliceSettings,
    configs: &PathConfigs,
    storage: &SliceDataStorage,
    planner: &mut GcodePlanner,
    layer_nr: usize,
    prev_extruder: usize,
) {
    if settings.wipe_tower_size < 1 {
        return;
    }
    planner.add_polygons_by_optimizer(&storage.wipe_tower, &configs.support);

    let mut fill_polygons = Polygons::new();
    generate_line_infill(
        &storage.wipe_tower,
        &mut fill_polygons,
        settings.extrusion_width,
        settings.extrusion_width,
        settings.infill_overlap,
        (45 + 90 * (layer_nr % 2)) as f64,
    );
    planner.add_polygons_by_optimizer(&fill_polygons, &configs.support);

    let wipe = storage.wipe_point - settings.extruder_offset[prev_extruder]
        + settings.extruder_offset[planner.extruder()];
    planner.add_travel(wipe);
}

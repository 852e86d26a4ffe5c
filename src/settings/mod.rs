//! Engine configuration.
//!
//! [`SliceSettings`] is the validated, typed parameter set the pipeline reads.
//! Ingestion by parameter name goes through one explicit table
//! ([`setting_table`]) mapping each name, plus its deprecated aliases, to a
//! typed setter. File parsing and persistence live outside the library; the
//! core only ever sees `set(key, value)` assignments that either parse to the
//! field's type or are rejected at this boundary.

use crate::geometry::Point;
use crate::{Coord, Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Maximum number of extruders addressable by the writer.
pub const MAX_EXTRUDERS: usize = 16;

/// Support fill style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupportType {
    /// X/Y line grid with an island outline; strong but harder to remove.
    Grid,
    /// Plain rows of lines that break off one at a time.
    Lines,
}

/// Target-firmware command vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcodeFlavor {
    /// Marlin/Sprinter/Repetier style. G0 moves, G1 extrusion, E in mm of
    /// filament, M106/M107 fan control.
    RepRap,
    /// UltiGCode: E in mm^3, retraction via G10/G11, no start/end code, header
    /// carries time/material placeholders filled in at finalize.
    UltiGcode,
    /// RepRap-like with MakerBot fan commands (M126/M127) and no G21/G90.
    Makerbot,
    /// CNC control vocabulary: extruder axis addressed as A instead of E.
    Mach3,
}

/// All parameters controlling a slice run. Distances are integer micrometers,
/// speeds mm/s, percentages whole percent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SliceSettings {
    // === Layers ===
    /// Layer thickness (um).
    pub layer_thickness: Coord,
    /// Thickness of the first layer (um).
    pub initial_layer_thickness: Coord,

    // === Extrusion ===
    /// Filament diameter (um).
    pub filament_diameter: Coord,
    /// Flow multiplier (%).
    pub filament_flow: i32,
    /// Extrusion line width (um).
    pub extrusion_width: Coord,

    // === Walls / skin / infill ===
    /// Number of wall (inset) loops.
    pub inset_count: i32,
    /// Solid layers counted from the bottom surface.
    pub down_skin_count: i32,
    /// Solid layers counted from the top surface.
    pub up_skin_count: i32,
    /// Line spacing of sparse interior infill (um); 0 disables sparse infill.
    pub sparse_infill_line_distance: Coord,
    /// Overlap of infill lines into the walls (% of extrusion width).
    pub infill_overlap: i32,
    /// Base infill direction (degrees).
    pub infill_angle: i32,

    // === Skirt ===
    /// Distance from the first layer outline to the innermost skirt loop (um).
    pub skirt_distance: Coord,
    /// Number of skirt loops.
    pub skirt_line_count: i32,
    /// Minimum accumulated skirt length (um); loops are added until reached.
    pub skirt_min_length: Coord,

    // === Retraction ===
    /// Retraction length (um of filament).
    pub retraction_amount: Coord,
    /// Retraction length on extruder switch (um of filament).
    pub retraction_amount_extruder_switch: Coord,
    /// Retraction speed (mm/s).
    pub retraction_speed: i32,
    /// Travels shorter than this never retract (um).
    pub retraction_minimal_distance: Coord,
    /// Minimum extrusion between two retractions (um of filament).
    pub minimal_extrusion_before_retraction: Coord,
    /// Z lift during retracted travels (um).
    pub retraction_z_hop: Coord,

    // === Travel ===
    /// Constrain travel moves within part boundaries to avoid stringing.
    pub enable_combing: bool,

    // === Multi-extrusion ===
    /// Print a sacrificial shield around the model to catch nozzle ooze.
    pub enable_ooze_shield: bool,
    /// Outward guard offset of the ooze shield from the part outlines (um).
    pub ooze_shield_distance: Coord,
    /// Erode-then-dilate distance removing ooze-shield slivers (um).
    pub ooze_shield_sliver_distance: Coord,
    /// Maximum self-supporting overhang angle of the shield (degrees).
    pub ooze_shield_max_angle: i32,
    /// Side length of the square wipe/prime tower (um); 0 disables it.
    pub wipe_tower_size: Coord,
    /// Overlap between volumes of one model (um).
    pub multi_volume_overlap: Coord,

    // === Speeds (mm/s) ===
    /// Number of layers over which printing speeds ramp up to full.
    pub initial_speedup_layers: i32,
    /// Print speed on the first layer.
    pub initial_layer_speed: i32,
    /// Default print speed.
    pub print_speed: i32,
    /// Infill print speed.
    pub infill_speed: i32,
    /// Travel move speed.
    pub move_speed: i32,
    /// Layer index at which the cooling fan first runs at full strength.
    pub fan_full_on_layer_nr: i32,

    // === Support ===
    /// Support fill style.
    pub support_type: SupportType,
    /// Overhang angle threshold (degrees); negative disables support.
    pub support_angle: i32,
    /// Allow support resting on the model, not only the build plate.
    pub support_everywhere: bool,
    /// Support infill line spacing (um).
    pub support_line_distance: Coord,
    /// Horizontal clearance between support and model (um).
    pub support_xy_distance: Coord,
    /// Vertical clearance between support and model (um).
    pub support_z_distance: Coord,
    /// Extruder used for support; negative means the active extruder.
    pub support_extruder: i32,

    // === Cooling ===
    /// Minimum print time per layer (s); extrusion slows to reach it.
    pub minimal_layer_time: i32,
    /// Floor for slowed-down extrusion speed (mm/s).
    pub minimal_feedrate: i32,
    /// Lift the head and dwell when a layer finishes too fast anyway.
    pub cool_head_lift: bool,
    /// Fan strength at full print speed (%).
    pub fan_speed_min: i32,
    /// Fan strength when printing is slowed to half speed or less (%).
    pub fan_speed_max: i32,

    // === Raft ===
    /// Outward margin of the raft beyond the model outline (um).
    pub raft_margin: Coord,
    /// Raft infill line spacing (um).
    pub raft_line_spacing: Coord,
    /// Raft base sub-layer thickness (um); 0 disables the raft.
    pub raft_base_thickness: Coord,
    /// Raft base line width (um).
    pub raft_base_linewidth: Coord,
    /// Raft interface sub-layer thickness (um).
    pub raft_interface_thickness: Coord,
    /// Raft interface line width (um).
    pub raft_interface_linewidth: Coord,

    // === Placement ===
    /// Target position of the model centre on the bed (um).
    pub object_position: Point,
    /// Distance the model is sunk below the bed plane (um).
    pub object_sink: Coord,

    // === Slicing fixes ===
    /// Keep unclosed slice contours by force-closing them.
    pub keep_open_faces: bool,
    /// Try harder to stitch open contour chains together.
    pub extensive_stitching: bool,
    /// Union all outlines of a layer before decomposing into parts.
    pub union_all_parts: bool,

    // === Output ===
    /// Print the model as one continuous spiralling outer wall.
    pub spiralize_mode: bool,
    /// Target-firmware command vocabulary.
    pub gcode_flavor: GcodeFlavor,
    /// Per-extruder nozzle offsets (um).
    pub extruder_offset: [Point; MAX_EXTRUDERS],
    /// Raw G-code emitted before the first layer.
    pub start_code: String,
    /// Raw G-code emitted after the last layer.
    pub end_code: String,
}

impl Default for SliceSettings {
    fn default() -> Self {
        Self {
            layer_thickness: 100,
            initial_layer_thickness: 300,
            filament_diameter: 2890,
            filament_flow: 100,
            extrusion_width: 400,
            inset_count: 2,
            down_skin_count: 6,
            up_skin_count: 6,
            sparse_infill_line_distance: 100 * 400 / 20,
            infill_overlap: 15,
            infill_angle: 45,
            skirt_distance: 6000,
            skirt_line_count: 1,
            skirt_min_length: 0,
            retraction_amount: 4500,
            retraction_amount_extruder_switch: 14500,
            retraction_speed: 45,
            retraction_minimal_distance: 1500,
            minimal_extrusion_before_retraction: 100,
            retraction_z_hop: 0,
            enable_combing: true,
            enable_ooze_shield: false,
            ooze_shield_distance: 2000,
            ooze_shield_sliver_distance: 1000,
            ooze_shield_max_angle: 60,
            wipe_tower_size: 0,
            multi_volume_overlap: 0,
            initial_speedup_layers: 4,
            initial_layer_speed: 20,
            print_speed: 50,
            infill_speed: 50,
            move_speed: 200,
            fan_full_on_layer_nr: 2,
            support_type: SupportType::Grid,
            support_angle: -1,
            support_everywhere: false,
            support_line_distance: 100 * 400 / 20,
            support_xy_distance: 700,
            support_z_distance: 150,
            support_extruder: -1,
            minimal_layer_time: 5,
            minimal_feedrate: 10,
            cool_head_lift: false,
            fan_speed_min: 100,
            fan_speed_max: 100,
            raft_margin: 5000,
            raft_line_spacing: 1000,
            raft_base_thickness: 0,
            raft_base_linewidth: 0,
            raft_interface_thickness: 0,
            raft_interface_linewidth: 0,
            object_position: Point::new(102_500, 102_500),
            object_sink: 0,
            keep_open_faces: false,
            extensive_stitching: false,
            union_all_parts: false,
            spiralize_mode: false,
            gcode_flavor: GcodeFlavor::RepRap,
            extruder_offset: [Point::new(0, 0); MAX_EXTRUDERS],
            start_code: concat!(
                "M109 S210     ;Heatup to 210C\n",
                "G21           ;metric values\n",
                "G90           ;absolute positioning\n",
                "G28           ;Home\n",
                "G1 Z15.0 F300 ;move the platform down 15mm\n",
                "G92 E0        ;zero the extruded length\n",
                "G1 F200 E5    ;extrude 5mm of feed stock\n",
                "G92 E0        ;zero the extruded length again\n"
            )
            .to_string(),
            end_code: concat!(
                "M104 S0                     ;extruder heater off\n",
                "M140 S0                     ;heated bed heater off (if you have it)\n",
                "G91                         ;relative positioning\n",
                "G1 E-1 F300                 ;retract a bit to release pressure\n",
                "G1 Z+0.5 E-5 X-20 Y-20 F9000;lift and retract even more\n",
                "G28 X0 Y0                   ;move X/Y to min endstops\n",
                "M84                         ;steppers off\n",
                "G90                         ;absolute positioning\n"
            )
            .to_string(),
        }
    }
}

impl SliceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign one parameter by name. Deprecated aliases resolve through the
    /// setting table; unknown keys and unparsable values are rejected here so
    /// the pipeline only ever sees validated values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim().trim_matches('"');
        for spec in setting_table() {
            if spec.name == key || spec.aliases.iter().any(|a| *a == key) {
                return (spec.apply)(self, value)
                    .map_err(|e| Error::Settings(format!("{}: {}", key, e)));
            }
        }
        Err(Error::Settings(format!("unknown setting: {}", key)))
    }

    /// Check cross-field consistency before a run.
    pub fn validate(&self) -> Result<()> {
        if self.layer_thickness <= 0 {
            return Err(Error::Settings("layerThickness must be positive".into()));
        }
        if self.initial_layer_thickness <= 0 {
            return Err(Error::Settings(
                "initialLayerThickness must be positive".into(),
            ));
        }
        if self.extrusion_width <= 0 {
            return Err(Error::Settings("extrusionWidth must be positive".into()));
        }
        if self.filament_diameter <= 0 {
            return Err(Error::Settings("filamentDiameter must be positive".into()));
        }
        if self.inset_count < 0 {
            return Err(Error::Settings("insetCount cannot be negative".into()));
        }
        if self.print_speed <= 0 || self.move_speed <= 0 || self.initial_layer_speed <= 0 {
            return Err(Error::Settings("speeds must be positive".into()));
        }
        Ok(())
    }
}

/// One entry of the settings-ingestion table.
pub struct SettingSpec {
    /// Canonical parameter name.
    pub name: &'static str,
    /// Deprecated names still accepted from old settings files.
    pub aliases: &'static [&'static str],
    /// Typed setter; rejects unparsable values.
    pub apply: fn(&mut SliceSettings, &str) -> std::result::Result<(), String>,
}

fn parse_coord(v: &str) -> std::result::Result<Coord, String> {
    // Integer settings historically accept float text
    v.parse::<f64>()
        .map(|f| f as Coord)
        .map_err(|_| format!("not a number: {:?}", v))
}

fn parse_i32(v: &str) -> std::result::Result<i32, String> {
    v.parse::<f64>()
        .map(|f| f as i32)
        .map_err(|_| format!("not a number: {:?}", v))
}

fn parse_bool(v: &str) -> std::result::Result<bool, String> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("not a boolean: {:?}", v)),
    }
}

macro_rules! coord_setting {
    ($name:literal, [$($alias:literal),*], $field:ident) => {
        SettingSpec {
            name: $name,
            aliases: &[$($alias),*],
            apply: |s, v| {
                s.$field = parse_coord(v)?;
                Ok(())
            },
        }
    };
}

macro_rules! int_setting {
    ($name:literal, [$($alias:literal),*], $field:ident) => {
        SettingSpec {
            name: $name,
            aliases: &[$($alias),*],
            apply: |s, v| {
                s.$field = parse_i32(v)?;
                Ok(())
            },
        }
    };
}

macro_rules! bool_setting {
    ($name:literal, [$($alias:literal),*], $field:ident) => {
        SettingSpec {
            name: $name,
            aliases: &[$($alias),*],
            apply: |s, v| {
                s.$field = parse_bool(v)?;
                Ok(())
            },
        }
    };
}

macro_rules! string_setting {
    ($name:literal, [$($alias:literal),*], $field:ident) => {
        SettingSpec {
            name: $name,
            aliases: &[$($alias),*],
            apply: |s, v| {
                s.$field = v.replace("\\n", "\n");
                Ok(())
            },
        }
    };
}

/// The explicit name-to-setter table, built once. Alias data lives here, at
/// the ingestion boundary, not in the core types.
pub fn setting_table() -> &'static [SettingSpec] {
    static TABLE: OnceLock<Vec<SettingSpec>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            coord_setting!("layerThickness", [], layer_thickness),
            coord_setting!(
                "initialLayerThickness",
                ["firstLayerThickness"],
                initial_layer_thickness
            ),
            coord_setting!("filamentDiameter", [], filament_diameter),
            int_setting!("filamentFlow", [], filament_flow),
            coord_setting!("extrusionWidth", [], extrusion_width),
            int_setting!("insetCount", ["perimeterCount"], inset_count),
            int_setting!("downSkinCount", [], down_skin_count),
            int_setting!("upSkinCount", [], up_skin_count),
            coord_setting!(
                "sparseInfillLineDistance",
                ["infillLineDistance"],
                sparse_infill_line_distance
            ),
            int_setting!("infillOverlap", [], infill_overlap),
            int_setting!("infillAngle", ["infillAngleDegrees"], infill_angle),
            coord_setting!("skirtDistance", [], skirt_distance),
            int_setting!("skirtLineCount", [], skirt_line_count),
            coord_setting!("skirtMinLength", [], skirt_min_length),
            coord_setting!("retractionAmount", [], retraction_amount),
            coord_setting!(
                "retractionAmountExtruderSwitch",
                [],
                retraction_amount_extruder_switch
            ),
            int_setting!("retractionSpeed", [], retraction_speed),
            coord_setting!(
                "retractionMinimalDistance",
                [],
                retraction_minimal_distance
            ),
            coord_setting!(
                "minimalExtrusionBeforeRetraction",
                [],
                minimal_extrusion_before_retraction
            ),
            coord_setting!("retractionZHop", [], retraction_z_hop),
            bool_setting!("enableCombing", [], enable_combing),
            bool_setting!("enableOozeShield", [], enable_ooze_shield),
            coord_setting!("oozeShieldDistance", [], ooze_shield_distance),
            coord_setting!(
                "oozeShieldSliverDistance",
                [],
                ooze_shield_sliver_distance
            ),
            int_setting!("oozeShieldMaxAngle", [], ooze_shield_max_angle),
            coord_setting!("wipeTowerSize", [], wipe_tower_size),
            coord_setting!("multiVolumeOverlap", [], multi_volume_overlap),
            int_setting!("initialSpeedupLayers", [], initial_speedup_layers),
            int_setting!("initialLayerSpeed", [], initial_layer_speed),
            int_setting!("printSpeed", [], print_speed),
            int_setting!("infillSpeed", [], infill_speed),
            int_setting!("moveSpeed", ["travelSpeed"], move_speed),
            int_setting!("fanFullOnLayerNr", [], fan_full_on_layer_nr),
            SettingSpec {
                name: "supportType",
                aliases: &[],
                apply: |s, v| {
                    s.support_type = match v.to_ascii_uppercase().as_str() {
                        "GRID" => SupportType::Grid,
                        "LINES" => SupportType::Lines,
                        _ => return Err(format!("unknown support type: {:?}", v)),
                    };
                    Ok(())
                },
            },
            int_setting!("supportAngle", ["supportAngleDegrees"], support_angle),
            bool_setting!("supportEverywhere", [], support_everywhere),
            coord_setting!("supportLineDistance", [], support_line_distance),
            coord_setting!("supportXYDistance", [], support_xy_distance),
            coord_setting!("supportZDistance", [], support_z_distance),
            int_setting!("supportExtruder", [], support_extruder),
            int_setting!("minimalLayerTime", [], minimal_layer_time),
            int_setting!("minimalFeedrate", [], minimal_feedrate),
            bool_setting!("coolHeadLift", [], cool_head_lift),
            int_setting!("fanSpeedMin", ["fanSpeedMinPercent"], fan_speed_min),
            int_setting!("fanSpeedMax", ["fanSpeedMaxPercent"], fan_speed_max),
            coord_setting!("raftMargin", [], raft_margin),
            coord_setting!("raftLineSpacing", [], raft_line_spacing),
            coord_setting!("raftBaseThickness", [], raft_base_thickness),
            coord_setting!("raftBaseLinewidth", [], raft_base_linewidth),
            coord_setting!("raftInterfaceThickness", [], raft_interface_thickness),
            coord_setting!("raftInterfaceLinewidth", [], raft_interface_linewidth),
            coord_setting!("objectSink", [], object_sink),
            bool_setting!("keepOpenFaces", [], keep_open_faces),
            bool_setting!("extensiveStitching", [], extensive_stitching),
            bool_setting!("unionAllParts", [], union_all_parts),
            bool_setting!("spiralizeMode", [], spiralize_mode),
            SettingSpec {
                name: "gcodeFlavor",
                aliases: &[],
                apply: |s, v| {
                    s.gcode_flavor = match v.to_ascii_uppercase().as_str() {
                        "REPRAP" => GcodeFlavor::RepRap,
                        "ULTIGCODE" => GcodeFlavor::UltiGcode,
                        "MAKERBOT" => GcodeFlavor::Makerbot,
                        "MACH3" => GcodeFlavor::Mach3,
                        _ => return Err(format!("unknown gcode flavor: {:?}", v)),
                    };
                    Ok(())
                },
            },
            SettingSpec {
                name: "objectPosition",
                aliases: &[],
                apply: |s, v| {
                    let parts: Vec<&str> = v
                        .trim_matches(|c| c == '(' || c == ')')
                        .split(',')
                        .collect();
                    if parts.len() != 2 {
                        return Err(format!("expected x,y pair: {:?}", v));
                    }
                    s.object_position =
                        Point::new(parse_coord(parts[0])?, parse_coord(parts[1])?);
                    Ok(())
                },
            },
            string_setting!("startCode", [], start_code),
            string_setting!("endCode", [], end_code),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SliceSettings::default().validate().is_ok());
    }

    #[test]
    fn test_set_by_name() {
        let mut s = SliceSettings::default();
        s.set("layerThickness", "200").unwrap();
        assert_eq!(s.layer_thickness, 200);

        s.set("printSpeed", "60").unwrap();
        assert_eq!(s.print_speed, 60);

        s.set("enableCombing", "false").unwrap();
        assert!(!s.enable_combing);
    }

    #[test]
    fn test_legacy_alias_resolves() {
        let mut s = SliceSettings::default();
        s.set("supportAngleDegrees", "45").unwrap();
        assert_eq!(s.support_angle, 45);

        s.set("perimeterCount", "3").unwrap();
        assert_eq!(s.inset_count, 3);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut s = SliceSettings::default();
        assert!(s.set("noSuchSetting", "1").is_err());
    }

    #[test]
    fn test_bad_value_rejected() {
        let mut s = SliceSettings::default();
        assert!(s.set("layerThickness", "thick").is_err());
        assert!(s.set("gcodeFlavor", "TEAPOT").is_err());
    }

    #[test]
    fn test_enum_parse() {
        let mut s = SliceSettings::default();
        s.set("gcodeFlavor", "ULTIGCODE").unwrap();
        assert_eq!(s.gcode_flavor, GcodeFlavor::UltiGcode);
        s.set("supportType", "LINES").unwrap();
        assert_eq!(s.support_type, SupportType::Lines);
    }

    #[test]
    fn test_object_position_pair() {
        let mut s = SliceSettings::default();
        s.set("objectPosition", "100000,90000").unwrap();
        assert_eq!(s.object_position, Point::new(100_000, 90_000));
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let mut s = SliceSettings::default();
        s.layer_thickness = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_no_duplicate_names_in_table() {
        let mut seen = std::collections::HashSet::new();
        for spec in setting_table() {
            assert!(seen.insert(spec.name), "duplicate name {}", spec.name);
            for alias in spec.aliases {
                assert!(seen.insert(alias), "duplicate alias {}", alias);
            }
        }
    }
}

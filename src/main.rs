//! Stratoslice CLI - slice solid models into machine instructions.
//!
//! Usage:
//!   stratoslice slice <input.stl> -o <output.gcode> [options]
//!   stratoslice slice <input.stl> -s layerThickness=200 -s insetCount=3
//!   stratoslice slice <input.stl> --config profile.json
//!   stratoslice info <input.stl>
//!   stratoslice settings

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use stratoslice::mesh::{Matrix3, SimpleMesh};
use stratoslice::pipeline::FffProcessor;
use stratoslice::settings::{setting_table, SliceSettings};

/// A per-layer toolpath engine for fused-filament fabrication
#[derive(Parser, Debug)]
#[command(name = "stratoslice")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Slice a model file and generate machine instructions
    Slice {
        /// Input STL file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output G-code file (defaults to the input with a .gcode extension)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Settings file: JSON object or key=value lines
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Override a single setting (repeatable), e.g. -s layerThickness=200
        #[arg(short = 's', long = "setting", value_name = "KEY=VALUE")]
        settings: Vec<String>,
    },

    /// Display information about a model file
    Info {
        /// Input STL file
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// List accepted setting names (including deprecated aliases)
    Settings,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Slice {
            input,
            output,
            config,
            settings,
        } => run_slice(input, output, config, settings),
        Commands::Info { input } => run_info(input),
        Commands::Settings => run_settings(),
    }
}

fn run_slice(
    input: PathBuf,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    overrides: Vec<String>,
) -> Result<()> {
    let mut settings = SliceSettings::default();

    if let Some(path) = &config {
        apply_config_file(&mut settings, path)
            .with_context(|| format!("loading settings from {}", path.display()))?;
    }
    for entry in &overrides {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got {:?}", entry))?;
        settings
            .set(key, value)
            .with_context(|| format!("applying -s {}", entry))?;
    }
    settings.validate().context("invalid settings")?;

    let output = output.unwrap_or_else(|| input.with_extension("gcode"));

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .expect("static template"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));

    let timer = Instant::now();
    let mut processor = FffProcessor::new(settings);

    progress.set_message(format!("slicing {}", input.display()));
    processor
        .set_target_file(&output)
        .with_context(|| format!("opening {}", output.display()))?;
    processor
        .process_file(&input)
        .with_context(|| format!("slicing {}", input.display()))?;
    processor.finish().context("writing output")?;

    progress.finish_and_clear();
    info!("total time {:.2}s", timer.elapsed().as_secs_f64());

    println!("wrote {}", output.display());
    println!(
        "estimated print time: {:.0}s",
        processor.gcode().total_print_time()
    );
    println!(
        "filament used: {:.0}mm",
        processor.gcode().total_filament_used(0)
    );
    Ok(())
}

fn apply_config_file(settings: &mut SliceSettings, path: &PathBuf) -> Result<()> {
    let text = fs::read_to_string(path)?;

    if path.extension().is_some_and(|e| e == "json") {
        let map: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&text).context("parsing JSON settings")?;
        for (key, value) in &map {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            settings.set(key, &value)?;
        }
        return Ok(());
    }

    for (line_nr, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .with_context(|| format!("line {}: expected KEY=VALUE", line_nr + 1))?;
        settings.set(key.trim(), value.trim())?;
    }
    Ok(())
}

fn run_info(input: PathBuf) -> Result<()> {
    let mesh = SimpleMesh::load(&input, &Matrix3::identity())
        .with_context(|| format!("loading {}", input.display()))?;

    println!("{}", input.display());
    println!("volumes: {}", mesh.volumes.len());
    for (i, volume) in mesh.volumes.iter().enumerate() {
        println!("  volume {}: {} triangles", i, volume.faces.len());
        let mut min = stratoslice::geometry::Point3::new(i64::MAX, i64::MAX, i64::MAX);
        let mut max = stratoslice::geometry::Point3::new(i64::MIN, i64::MIN, i64::MIN);
        for face in &volume.faces {
            for &v in &face.v {
                min = min.min(v);
                max = max.max(v);
            }
        }
        if volume.faces.is_empty() {
            continue;
        }
        println!(
            "  size: {:.2} x {:.2} x {:.2} mm",
            (max.x - min.x) as f64 / 1000.0,
            (max.y - min.y) as f64 / 1000.0,
            (max.z - min.z) as f64 / 1000.0,
        );
    }
    Ok(())
}

fn run_settings() -> Result<()> {
    if setting_table().is_empty() {
        bail!("no settings registered");
    }
    for spec in setting_table() {
        if spec.aliases.is_empty() {
            println!("{}", spec.name);
        } else {
            println!("{} (aliases: {})", spec.name, spec.aliases.join(", "));
        }
    }
    Ok(())
}

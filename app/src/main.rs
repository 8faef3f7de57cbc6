use std::ffi::OsStr;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use clap::{ArgAction, Parser, ValueEnum};
use env_logger::Builder;
use glob::glob;
use log::LevelFilter;

use pcc_core::settings::{ExportFormat, ImportFormat, ImportSettings, IntensityRange};
use pcc_pipeline::ConversionScheduler;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImportFormatArg {
    Las,
    Laz,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormatArg {
    /// Single-file container (V2).
    Ucpc,
    /// Tiled container with a root index (V3).
    Pcroot,
}

#[derive(Parser, Debug)]
#[command(
    name = "Point Cloud Converter",
    about = "Converts LAS/LAZ point clouds into UCPC or tiled PCROOT output",
    version = "0.1.0"
)]
struct Cli {
    /// Input file, directory, or glob pattern; repeatable.
    #[arg(short, long, required = true, num_args = 1.., value_name = "PATH")]
    input: Vec<String>,

    /// Output file (ucpc) or output root path (pcroot).
    #[arg(short, long, required = true, value_name = "PATH")]
    output: String,

    #[arg(long, value_enum, default_value = "las")]
    importformat: ImportFormatArg,

    #[arg(long, value_enum, default_value = "pcroot")]
    exportformat: ExportFormatArg,

    /// With no values: auto-offset from a global bounds pass.
    /// With three values: manual offset x y z.
    #[arg(long, num_args = 0..=3, value_name = "COORD")]
    offset: Option<Vec<f64>>,

    /// Include RGB channels (disable with --rgb=false).
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    rgb: bool,

    /// Include the intensity channel.
    #[arg(long, action = ArgAction::SetTrue)]
    intensity: bool,

    /// Renormalize input intensity from this min/max to the full range.
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    customintensityrange: Option<Vec<u16>>,

    /// Tile cell size in source units (pcroot only).
    #[arg(long, default_value_t = 5.0)]
    gridsize: f64,

    /// Drop tiles with fewer points than this (pcroot only).
    #[arg(long, default_value_t = 1000)]
    minpoints: u64,

    /// Multiplicative geometric scale.
    #[arg(long)]
    scale: Option<f64>,

    /// Swap the Y and Z axes.
    #[arg(long, action = ArgAction::SetTrue)]
    swap: bool,

    #[arg(long, action = ArgAction::SetTrue)]
    invertx: bool,

    #[arg(long, action = ArgAction::SetTrue)]
    invertz: bool,

    /// Pack sub-cell coordinates into fixed point (pcroot only).
    #[arg(long, action = ArgAction::SetTrue)]
    pack: bool,

    /// Quantization steps per axis for packed coordinates.
    #[arg(long, default_value_t = 64)]
    packmagic: u32,

    /// Cap points per file (0 = no cap).
    #[arg(long, default_value_t = 0)]
    limit: u64,

    /// Drop every N-th point (0 = off).
    #[arg(long, default_value_t = 0)]
    skip: u64,

    /// Keep every N-th point after skipping (0 = off).
    #[arg(long, default_value_t = 0)]
    keep: u64,

    /// Cap the number of files processed (0 = all).
    #[arg(long, default_value_t = 0)]
    maxfiles: usize,

    /// Shuffle the file processing order.
    #[arg(long, action = ArgAction::SetTrue)]
    randomize: bool,

    /// Seed for --randomize.
    #[arg(long)]
    seed: Option<u64>,

    /// Emit structured JSON log events on stdout.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Capture per-file header metadata into a JSON sidecar.
    #[arg(long, action = ArgAction::SetTrue)]
    metadata: bool,

    /// Only capture metadata; write no point output.
    #[arg(long, action = ArgAction::SetTrue)]
    metadataonly: bool,

    /// Include the GPS time channel in the output records.
    #[arg(long, action = ArgAction::SetTrue)]
    averagetimestamp: bool,

    /// Warn when a tile receives points from several source files.
    #[arg(long, action = ArgAction::SetTrue)]
    checkoverlap: bool,

    /// Worker parallelism bound (0 = number of cpus).
    #[arg(long, default_value_t = 0)]
    maxthreads: usize,
}

/// Expands globs, scans directories, and passes plain files through.
fn expand_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            match glob(pattern) {
                Ok(entries) => {
                    for entry in entries {
                        match entry {
                            Ok(path) => paths.push(path),
                            Err(e) => log::warn!("glob entry error: {e}"),
                        }
                    }
                }
                Err(e) => log::warn!("bad glob pattern {pattern:?}: {e}"),
            }
            continue;
        }
        let path = PathBuf::from(pattern);
        if path.is_dir() {
            let mut found = Vec::new();
            match std::fs::read_dir(&path) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let candidate = entry.path();
                        let ext = candidate
                            .extension()
                            .and_then(OsStr::to_str)
                            .map(str::to_ascii_lowercase);
                        if matches!(ext.as_deref(), Some("las") | Some("laz")) {
                            found.push(candidate);
                        }
                    }
                }
                Err(e) => log::warn!("cannot scan {path:?}: {e}"),
            }
            found.sort();
            paths.extend(found);
        } else {
            paths.push(path);
        }
    }
    paths
}

fn settings_from_cli(args: &Cli) -> ImportSettings {
    let (auto_offset, manual_offset) = match &args.offset {
        None => (false, None),
        Some(values) if values.is_empty() => (true, None),
        Some(values) if values.len() == 3 => (false, Some([values[0], values[1], values[2]])),
        Some(values) => {
            log::warn!(
                "--offset takes zero or three values, got {}; using auto-offset",
                values.len()
            );
            (true, None)
        }
    };

    ImportSettings {
        input_files: expand_inputs(&args.input),
        output: PathBuf::from(&args.output),
        import_format: match args.importformat {
            ImportFormatArg::Las => ImportFormat::Las,
            ImportFormatArg::Laz => ImportFormat::Laz,
        },
        export_format: match args.exportformat {
            ExportFormatArg::Ucpc => ExportFormat::Ucpc,
            ExportFormatArg::Pcroot => ExportFormat::Pcroot,
        },
        auto_offset,
        manual_offset,
        import_rgb: args.rgb,
        import_intensity: args.intensity,
        custom_intensity_range: args
            .customintensityrange
            .as_ref()
            .map(|range| IntensityRange {
                min: range[0],
                max: range[1],
            }),
        grid_size: args.gridsize,
        min_points_per_tile: args.minpoints,
        scale: args.scale,
        swap_yz: args.swap,
        invert_x: args.invertx,
        invert_z: args.invertz,
        pack_colors: args.pack,
        pack_magic: args.packmagic,
        limit: args.limit,
        skip_every: args.skip,
        keep_every: args.keep,
        max_files: args.maxfiles,
        randomize: args.randomize,
        seed: args.seed,
        json_log: args.json,
        import_metadata: args.metadata,
        metadata_only: args.metadataonly,
        average_timestamp: args.averagetimestamp,
        check_overlap: args.checkoverlap,
        max_threads: args.maxthreads,
    }
}

fn main() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Cli::parse();
    let settings = settings_from_cli(&args);

    log::info!("input files: {}", settings.input_files.len());
    log::info!("output: {:?}", settings.output);

    let start = std::time::Instant::now();
    let scheduler = ConversionScheduler::new(settings);
    let code = match scheduler.run() {
        Ok(outcome) => {
            log::info!("finished in {:?}", start.elapsed());
            outcome.status.exit_code()
        }
        Err(e) => {
            log::error!("conversion failed: {e}");
            1
        }
    };
    std::process::exit(code);
}

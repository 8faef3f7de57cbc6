//! Immutable run configuration, produced by the CLI argument parser.

use std::path::PathBuf;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Las,
    Laz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Single-file container (`*.ucpc`).
    Ucpc,
    /// Tiled container (`*.pcroot` index plus `*.pct` tiles).
    Pcroot,
}

/// Alternate input intensity range, renormalized to the full u16 range.
#[derive(Debug, Clone, Copy)]
pub struct IntensityRange {
    pub min: u16,
    pub max: u16,
}

#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub input_files: Vec<PathBuf>,
    pub output: PathBuf,
    pub import_format: ImportFormat,
    pub export_format: ExportFormat,

    /// Global auto-offset (bounds pass) when true and no manual offset given.
    pub auto_offset: bool,
    pub manual_offset: Option<[f64; 3]>,

    pub import_rgb: bool,
    pub import_intensity: bool,
    pub custom_intensity_range: Option<IntensityRange>,

    pub grid_size: f64,
    pub min_points_per_tile: u64,

    pub scale: Option<f64>,
    pub swap_yz: bool,
    pub invert_x: bool,
    pub invert_z: bool,

    pub pack_colors: bool,
    pub pack_magic: u32,

    pub limit: u64,
    pub skip_every: u64,
    pub keep_every: u64,
    pub max_files: usize,

    pub randomize: bool,
    pub seed: Option<u64>,

    pub json_log: bool,
    pub import_metadata: bool,
    pub metadata_only: bool,
    pub average_timestamp: bool,
    pub check_overlap: bool,

    pub max_threads: usize,
}

impl ImportSettings {
    /// Rejects option combinations the pipeline cannot run with. Called once
    /// by the scheduler before anything touches the disk.
    pub fn validate(&self) -> Result<()> {
        if self.input_files.is_empty() {
            return Err(Error::InvalidSettings("no input files".into()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(Error::InvalidSettings("output path is empty".into()));
        }
        if !self.import_rgb && !self.import_intensity {
            return Err(Error::InvalidSettings(
                "at least one of rgb and intensity must be enabled".into(),
            ));
        }
        if self.export_format == ExportFormat::Pcroot && !(self.grid_size > 0.0) {
            return Err(Error::InvalidSettings(format!(
                "gridsize must be positive, got {}",
                self.grid_size
            )));
        }
        if self.pack_colors && !(2..=1024).contains(&self.pack_magic) {
            return Err(Error::InvalidSettings(format!(
                "packmagic must be in [2, 1024], got {}",
                self.pack_magic
            )));
        }
        if let Some(scale) = self.scale {
            if scale == 0.0 || !scale.is_finite() {
                return Err(Error::InvalidSettings(format!(
                    "scale must be finite and non-zero, got {scale}"
                )));
            }
        }
        if let Some(range) = self.custom_intensity_range {
            if range.max <= range.min {
                return Err(Error::InvalidSettings(format!(
                    "customintensityrange max must exceed min ({} <= {})",
                    range.max, range.min
                )));
            }
        }
        Ok(())
    }

    /// Whether a header-only bounds pass must run before conversion.
    pub fn needs_bounds_pass(&self) -> bool {
        if self.metadata_only || self.manual_offset.is_some() {
            return false;
        }
        self.auto_offset || (self.import_intensity && self.import_rgb && self.pack_colors)
    }

    /// Metadata capture is implied by a metadata-only run.
    pub fn captures_metadata(&self) -> bool {
        self.import_metadata || self.metadata_only
    }

    /// Output stem used for the metadata sidecar and tile filenames.
    pub fn output_stem(&self) -> String {
        self.output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            input_files: Vec::new(),
            output: PathBuf::new(),
            import_format: ImportFormat::Las,
            export_format: ExportFormat::Ucpc,
            auto_offset: false,
            manual_offset: None,
            import_rgb: true,
            import_intensity: false,
            custom_intensity_range: None,
            grid_size: 5.0,
            min_points_per_tile: 1000,
            scale: None,
            swap_yz: false,
            invert_x: false,
            invert_z: false,
            pack_colors: false,
            pack_magic: 64,
            limit: 0,
            skip_every: 0,
            keep_every: 0,
            max_files: 0,
            randomize: false,
            seed: None,
            json_log: false,
            import_metadata: false,
            metadata_only: false,
            average_timestamp: false,
            check_overlap: false,
            max_threads: 0,
        }
    }
}

//! Per-file header metadata captured for the JSON sidecar.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

/// Snapshot of one input file's header plus streaming summaries. Populated
/// by the reader during `open`, refined while points stream, and appended to
/// the run-wide list when the file completes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileMetadata {
    pub source: PathBuf,
    pub point_count: u64,
    pub version: String,
    pub system_identifier: String,
    pub generating_software: String,
    /// File creation date from the LAS header, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_creation: Option<String>,
    pub point_format: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wkt: Option<String>,
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// GPS time span observed while streaming, if the format carries time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_time_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_time_max: Option<f64>,
    /// Points per classification code, accumulated while streaming.
    pub classification_counts: BTreeMap<u8, u64>,
    /// Packed-coordinate range clamps recorded by the writer for this file.
    pub clamp_count: u64,
}

impl FileMetadata {
    pub fn observe_gps_time(&mut self, t: f64) {
        self.gps_time_min = Some(self.gps_time_min.map_or(t, |m| m.min(t)));
        self.gps_time_max = Some(self.gps_time_max.map_or(t, |m| m.max(t)));
    }

    pub fn observe_classification(&mut self, code: u8) {
        *self.classification_counts.entry(code).or_insert(0) += 1;
    }
}

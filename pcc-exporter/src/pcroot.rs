//! Tiled container (V3): per-tile `*.pct` files plus a `*.pcroot` index.
//!
//! Every worker slot owns a `PcTileWriter` that buckets points into grid
//! cells locally; `save` appends the buffered cells to the shared tile files
//! through the run-wide `TileRegistry`. The registry writes the root index
//! once, after all workers are done, dropping tiles under the minimum point
//! threshold.
//!
//! Tile record, little-endian: `{packed u32 | x f32, y f32, z f32}, r u8,
//! g u8, b u8, [intensity u16], [time f64]`. Packed coordinates hold the
//! sub-cell fraction of each axis quantized by `pack_magic`:
//! `u32 = qx | qy << 10 | qz << 20` with `q = floor(frac * pack_magic)`.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::PointSink;

use pcc_core::error::Error;
use pcc_core::pointcloud::point::{BoundingBox, Point};
use pcc_core::settings::ImportSettings;
use pcc_core::Result;

type CellIndex = (i64, i64, i64);

#[derive(Debug)]
struct TileEntry {
    file_name: String,
    count: u64,
    bounds: BoundingBox,
    contributors: BTreeSet<usize>,
}

/// Outcome of the root finalization step.
#[derive(Debug, Clone, Default)]
pub struct RootSummary {
    pub root_written: bool,
    pub tiles_written: usize,
    pub tiles_dropped: usize,
    pub total_points: u64,
}

/// Run-wide tile state shared by all slot writers. Owned by the scheduler;
/// workers only reach it through their `PcTileWriter`.
pub struct TileRegistry {
    dir: PathBuf,
    stem: String,
    root_path: PathBuf,
    grid_size: f64,
    offset: [f64; 3],
    pack_magic: Option<u32>,
    include_intensity: bool,
    include_time: bool,
    min_points_per_tile: u64,
    tiles: Mutex<HashMap<CellIndex, TileEntry>>,
}

impl TileRegistry {
    /// `offset` is the resolved global offset, recorded in the root index so
    /// consumers can reconstruct source coordinates.
    pub fn create(settings: &ImportSettings, offset: [f64; 3]) -> Result<Self> {
        let root_path = if settings.output.extension().is_some_and(|e| e == "pcroot") {
            settings.output.clone()
        } else {
            settings.output.with_extension("pcroot")
        };
        let dir = root_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|e| Error::write(&dir, e.to_string()))?;
        let stem = root_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cloud".to_string());

        Ok(Self {
            dir,
            stem,
            root_path,
            grid_size: settings.grid_size,
            offset,
            pack_magic: settings.pack_colors.then_some(settings.pack_magic),
            include_intensity: settings.import_intensity,
            include_time: settings.average_timestamp,
            min_points_per_tile: settings.min_points_per_tile,
            tiles: Mutex::new(HashMap::new()),
        })
    }

    pub fn grid_size(&self) -> f64 {
        self.grid_size
    }

    pub fn pack_magic(&self) -> Option<u32> {
        self.pack_magic
    }

    pub fn include_intensity(&self) -> bool {
        self.include_intensity
    }

    pub fn include_time(&self) -> bool {
        self.include_time
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn tile_file_name(&self, cell: CellIndex) -> String {
        format!("{}_{}_{}_{}.pct", self.stem, cell.0, cell.1, cell.2)
    }

    /// Appends one worker's buffered cell to the shared tile file and folds
    /// its counts into the index. Append order across workers is completion
    /// order; callers needing a stable order serialize file processing.
    fn flush_cell(
        &self,
        cell: CellIndex,
        bytes: &[u8],
        count: u64,
        bounds: BoundingBox,
        file_index: usize,
    ) -> Result<()> {
        let mut tiles = self.tiles.lock().unwrap();
        let entry = tiles.entry(cell).or_insert_with(|| TileEntry {
            file_name: self.tile_file_name(cell),
            count: 0,
            bounds: BoundingBox::empty(),
            contributors: BTreeSet::new(),
        });

        let path = self.dir.join(&entry.file_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::write(&path, e.to_string()))?;
        let mut file = BufWriter::new(file);
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| Error::write(&path, e.to_string()))?;

        entry.count += count;
        entry.bounds.union(&bounds);
        entry.contributors.insert(file_index);
        Ok(())
    }

    /// Tiles fed by more than one source file, for overlap warnings.
    pub fn overlapping_tiles(&self) -> Vec<(String, usize)> {
        let tiles = self.tiles.lock().unwrap();
        tiles
            .values()
            .filter(|entry| entry.contributors.len() > 1)
            .map(|entry| (entry.file_name.clone(), entry.contributors.len()))
            .collect()
    }

    /// Terminal step, scheduler-only: drops underfilled tiles (deleting
    /// their files) and writes the root index via write-then-rename. The
    /// root is only produced when at least one tile survives.
    pub fn write_root(&self) -> Result<RootSummary> {
        let tiles = self.tiles.lock().unwrap();
        let mut survivors: Vec<(&CellIndex, &TileEntry)> = Vec::new();
        let mut dropped = 0usize;

        for (cell, entry) in tiles.iter() {
            if entry.count < self.min_points_per_tile {
                dropped += 1;
                let path = self.dir.join(&entry.file_name);
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("failed to remove underfilled tile {:?}: {}", path, e);
                    }
                }
            } else {
                survivors.push((cell, entry));
            }
        }

        if survivors.is_empty() {
            log::warn!(
                "no tile reached the minimum of {} points; root index not written",
                self.min_points_per_tile
            );
            return Ok(RootSummary {
                root_written: false,
                tiles_written: 0,
                tiles_dropped: dropped,
                total_points: 0,
            });
        }

        // Deterministic root ordering regardless of worker completion order.
        survivors.sort_by_key(|(cell, _)| **cell);

        let mut bounds = BoundingBox::empty();
        let mut total_points = 0u64;
        for (_, entry) in &survivors {
            bounds.union(&entry.bounds);
            total_points += entry.count;
        }

        let tmp_path = self.root_path.with_extension("pcroot.tmp");
        let file = File::create(&tmp_path).map_err(|e| Error::write(&tmp_path, e.to_string()))?;
        let mut out = BufWriter::new(file);
        (|| -> std::io::Result<()> {
            writeln!(out, "format,pcroot,2")?;
            writeln!(out, "gridsize,{}", self.grid_size)?;
            writeln!(
                out,
                "offset,{},{},{}",
                self.offset[0], self.offset[1], self.offset[2]
            )?;
            writeln!(out, "pack,{}", self.pack_magic.unwrap_or(0))?;
            writeln!(out, "intensity,{}", u8::from(self.include_intensity))?;
            writeln!(out, "time,{}", u8::from(self.include_time))?;
            writeln!(
                out,
                "bounds,{},{},{},{},{},{}",
                bounds.min[0], bounds.min[1], bounds.min[2],
                bounds.max[0], bounds.max[1], bounds.max[2]
            )?;
            writeln!(out, "points,{}", total_points)?;
            writeln!(out, "tiles,{}", survivors.len())?;
            for (_, entry) in &survivors {
                writeln!(
                    out,
                    "tile,{},{},{},{},{}",
                    entry.file_name,
                    entry.count,
                    entry.bounds.min[0],
                    entry.bounds.min[1],
                    entry.bounds.min[2]
                )?;
            }
            out.flush()
        })()
        .map_err(|e| Error::write(&tmp_path, e.to_string()))?;
        drop(out);
        fs::rename(&tmp_path, &self.root_path)
            .map_err(|e| Error::write(&self.root_path, e.to_string()))?;

        Ok(RootSummary {
            root_written: true,
            tiles_written: survivors.len(),
            tiles_dropped: dropped,
            total_points,
        })
    }
}

#[derive(Debug, Default)]
struct CellBuffer {
    bytes: Vec<u8>,
    count: u64,
    bounds: BoundingBox,
}

/// Per-slot tile sink. Buffers records per grid cell between `init` and
/// `save`, then hands them to the shared registry.
pub struct PcTileWriter {
    registry: Arc<TileRegistry>,
    cells: HashMap<CellIndex, CellBuffer>,
    clamped: u64,
    total: u64,
}

impl PcTileWriter {
    pub fn new(registry: Arc<TileRegistry>) -> Self {
        Self {
            registry,
            cells: HashMap::new(),
            clamped: 0,
            total: 0,
        }
    }

    /// Sub-cell fraction with float-error clamping into [0, 1).
    fn fraction(&mut self, coord: f64, cell: i64, grid_size: f64) -> f64 {
        let frac = coord / grid_size - cell as f64;
        if (0.0..1.0).contains(&frac) {
            frac
        } else {
            self.clamped += 1;
            frac.clamp(0.0, 1.0 - f64::EPSILON)
        }
    }
}

fn pack(fx: f64, fy: f64, fz: f64, magic: u32) -> u32 {
    let quantize = |f: f64| ((f * f64::from(magic)) as u32).min(magic - 1);
    quantize(fx) | quantize(fy) << 10 | quantize(fz) << 20
}

impl PointSink for PcTileWriter {
    fn init(&mut self, _estimated_points: u64) -> Result<()> {
        self.cells.clear();
        self.clamped = 0;
        Ok(())
    }

    fn add_point(&mut self, point: &Point) -> Result<()> {
        if !(point.x.is_finite() && point.y.is_finite() && point.z.is_finite()) {
            self.clamped += 1;
            return Ok(());
        }
        let grid_size = self.registry.grid_size();
        let cell = (
            (point.x / grid_size).floor() as i64,
            (point.y / grid_size).floor() as i64,
            (point.z / grid_size).floor() as i64,
        );

        let pack_magic = self.registry.pack_magic();
        let include_intensity = self.registry.include_intensity();
        let include_time = self.registry.include_time();

        let encoded = match pack_magic {
            Some(magic) => {
                let fx = self.fraction(point.x, cell.0, grid_size);
                let fy = self.fraction(point.y, cell.1, grid_size);
                let fz = self.fraction(point.z, cell.2, grid_size);
                Some(pack(fx, fy, fz, magic))
            }
            None => None,
        };

        let buffer = self.cells.entry(cell).or_default();
        match encoded {
            Some(packed) => buffer.bytes.write_u32::<LittleEndian>(packed).unwrap(),
            None => {
                buffer.bytes.write_f32::<LittleEndian>(point.x as f32).unwrap();
                buffer.bytes.write_f32::<LittleEndian>(point.y as f32).unwrap();
                buffer.bytes.write_f32::<LittleEndian>(point.z as f32).unwrap();
            }
        }
        buffer.bytes.push((point.color.r >> 8) as u8);
        buffer.bytes.push((point.color.g >> 8) as u8);
        buffer.bytes.push((point.color.b >> 8) as u8);
        if include_intensity {
            buffer.bytes.write_u16::<LittleEndian>(point.intensity).unwrap();
        }
        if include_time {
            buffer.bytes.write_f64::<LittleEndian>(point.gps_time).unwrap();
        }

        buffer.bounds.grow(point.x, point.y, point.z);
        buffer.count += 1;
        self.total += 1;
        Ok(())
    }

    fn save(&mut self, file_index: usize) -> Result<()> {
        let registry = self.registry.as_ref();
        for (cell, buffer) in self.cells.drain() {
            registry.flush_cell(cell, &buffer.bytes, buffer.count, buffer.bounds, file_index)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn clamp_count(&self) -> u64 {
        self.clamped
    }

    fn points_written(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcc_core::settings::ExportFormat;

    fn settings(output: PathBuf) -> ImportSettings {
        ImportSettings {
            output,
            export_format: ExportFormat::Pcroot,
            grid_size: 5.0,
            min_points_per_tile: 1,
            ..Default::default()
        }
    }

    fn point(x: f64, y: f64, z: f64) -> Point {
        Point {
            x,
            y,
            z,
            ..Default::default()
        }
    }

    fn read_root(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn buckets_points_into_grid_cells() {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            Arc::new(TileRegistry::create(&settings(dir.path().join("cloud.pcroot")), [0.0; 3]).unwrap());
        let mut writer = PcTileWriter::new(registry.clone());

        writer.init(4).unwrap();
        writer.add_point(&point(1.0, 1.0, 1.0)).unwrap();
        writer.add_point(&point(2.0, 2.0, 2.0)).unwrap();
        writer.add_point(&point(7.0, 1.0, 1.0)).unwrap();
        writer.add_point(&point(-1.0, 0.0, 0.0)).unwrap();
        writer.save(0).unwrap();

        let summary = registry.write_root().unwrap();
        assert!(summary.root_written);
        assert_eq!(summary.tiles_written, 3);
        assert_eq!(summary.total_points, 4);

        let lines = read_root(&dir.path().join("cloud.pcroot"));
        let tile_lines: Vec<_> = lines.iter().filter(|l| l.starts_with("tile,")).collect();
        assert_eq!(tile_lines.len(), 3);
        assert!(tile_lines
            .iter()
            .any(|l| l.starts_with("tile,cloud_-1_0_0.pct,1,")));
    }

    #[test]
    fn underfilled_tiles_are_dropped_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = settings(dir.path().join("cloud.pcroot"));
        config.min_points_per_tile = 2;
        let registry = Arc::new(TileRegistry::create(&config, [0.0; 3]).unwrap());
        let mut writer = PcTileWriter::new(registry.clone());

        writer.init(3).unwrap();
        writer.add_point(&point(1.0, 1.0, 1.0)).unwrap();
        writer.add_point(&point(2.0, 1.0, 1.0)).unwrap();
        writer.add_point(&point(12.0, 1.0, 1.0)).unwrap(); // lone point, below threshold
        writer.save(0).unwrap();

        let lone_tile = dir.path().join("cloud_2_0_0.pct");
        assert!(lone_tile.exists());

        let summary = registry.write_root().unwrap();
        assert_eq!(summary.tiles_written, 1);
        assert_eq!(summary.tiles_dropped, 1);
        assert!(!lone_tile.exists());

        let lines = read_root(&dir.path().join("cloud.pcroot"));
        assert!(!lines.iter().any(|l| l.contains("cloud_2_0_0.pct")));
    }

    #[test]
    fn no_surviving_tile_means_no_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = settings(dir.path().join("cloud.pcroot"));
        config.min_points_per_tile = 100;
        let registry = Arc::new(TileRegistry::create(&config, [0.0; 3]).unwrap());
        let mut writer = PcTileWriter::new(registry.clone());

        writer.init(1).unwrap();
        writer.add_point(&point(1.0, 1.0, 1.0)).unwrap();
        writer.save(0).unwrap();

        let summary = registry.write_root().unwrap();
        assert!(!summary.root_written);
        assert!(!dir.path().join("cloud.pcroot").exists());
    }

    #[test]
    fn packed_coordinates_reconstruct_within_quantization_error() {
        let dir = tempfile::tempdir().unwrap();
        let offset = [10.0, 20.0, 30.0];
        let grid_size = 5.0;
        let magic = 64u32;
        let mut config = settings(dir.path().join("cloud.pcroot"));
        config.pack_colors = true;
        config.pack_magic = magic;
        let registry = Arc::new(TileRegistry::create(&config, offset).unwrap());
        let mut writer = PcTileWriter::new(registry.clone());

        // Source coordinates, pre-offset as the transform stage would feed.
        let sources = [
            [11.25, 21.5, 33.0],
            [12.0, 24.9, 30.0],
            [19.99, 20.0, 42.5],
        ];
        writer.init(sources.len() as u64).unwrap();
        for src in &sources {
            writer
                .add_point(&point(
                    src[0] - offset[0],
                    src[1] - offset[1],
                    src[2] - offset[2],
                ))
                .unwrap();
        }
        writer.save(0).unwrap();
        registry.write_root().unwrap();

        // Decode every record from every tile and match against a source.
        let tolerance = grid_size / (2.0 * f64::from(magic)) + 1e-9;
        let mut reconstructed = Vec::new();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|e| e == "pct") {
                let name = path.file_stem().unwrap().to_string_lossy().into_owned();
                let parts: Vec<i64> = name
                    .splitn(2, '_')
                    .nth(1)
                    .unwrap()
                    .split('_')
                    .map(|p| p.parse().unwrap())
                    .collect();
                let bytes = std::fs::read(&path).unwrap();
                for record in bytes.chunks_exact(7) {
                    let packed = u32::from_le_bytes(record[..4].try_into().unwrap());
                    let unpack = |shift: u32| {
                        let q = (packed >> shift) & 0x3FF;
                        (f64::from(q) + 0.5) / f64::from(magic)
                    };
                    reconstructed.push([
                        offset[0] + (parts[0] as f64 + unpack(0)) * grid_size,
                        offset[1] + (parts[1] as f64 + unpack(10)) * grid_size,
                        offset[2] + (parts[2] as f64 + unpack(20)) * grid_size,
                    ]);
                }
            }
        }
        assert_eq!(reconstructed.len(), sources.len());
        for src in &sources {
            let hit = reconstructed.iter().any(|r| {
                (0..3).all(|axis| (r[axis] - src[axis]).abs() <= tolerance)
            });
            assert!(hit, "no reconstruction within {tolerance} of {src:?}");
        }
    }

    #[test]
    fn overlap_report_names_shared_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            Arc::new(TileRegistry::create(&settings(dir.path().join("cloud.pcroot")), [0.0; 3]).unwrap());

        let mut first = PcTileWriter::new(registry.clone());
        first.init(1).unwrap();
        first.add_point(&point(1.0, 1.0, 1.0)).unwrap();
        first.save(0).unwrap();

        let mut second = PcTileWriter::new(registry.clone());
        second.init(1).unwrap();
        second.add_point(&point(2.0, 2.0, 2.0)).unwrap();
        second.save(1).unwrap();

        let overlaps = registry.overlapping_tiles();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].1, 2);
    }

    #[test]
    fn non_finite_coordinates_are_clamp_counted() {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            Arc::new(TileRegistry::create(&settings(dir.path().join("cloud.pcroot")), [0.0; 3]).unwrap());
        let mut writer = PcTileWriter::new(registry);

        writer.init(1).unwrap();
        writer.add_point(&point(f64::INFINITY, 0.0, 0.0)).unwrap();
        assert_eq!(writer.clamp_count(), 1);
        assert_eq!(writer.points_written(), 0);
    }
}

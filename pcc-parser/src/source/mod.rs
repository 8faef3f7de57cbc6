pub mod las;

use std::path::Path;

use pcc_core::metadata::FileMetadata;
use pcc_core::pointcloud::point::{BoundingBox, Point};
use pcc_core::settings::{ImportFormat, ImportSettings};
use pcc_core::Result;

/// Random-access reader over one input file.
///
/// A source is single-threaded by contract; concurrency comes from
/// instantiating one source per worker slot. An instance is reusable: after
/// `close`, `open` may be called again with a different path.
pub trait PointSource: Send {
    /// Opens `path` and returns its header bounds. An empty file is an
    /// error, never an empty box.
    fn open(&mut self, path: &Path, settings: &ImportSettings) -> Result<BoundingBox>;

    /// Number of times `read_point` may yield a point for the open file.
    fn point_count(&self) -> u64;

    /// Next point in file order. `Ok(None)` marks the end of the stream and
    /// is sticky.
    fn read_point(&mut self) -> Result<Option<Point>>;

    /// Header metadata plus summaries accumulated so far.
    fn metadata(&self) -> FileMetadata;

    /// Idempotent; required between `open` calls on a pooled instance.
    fn close(&mut self);
}

pub trait SourceProvider {
    fn create_source(&self) -> Box<dyn PointSource>;
}

/// Selects a source implementation for the configured import format. Both
/// LAS and LAZ decode through the same reader.
pub struct FormatSourceProvider {
    pub format: ImportFormat,
}

impl SourceProvider for FormatSourceProvider {
    fn create_source(&self) -> Box<dyn PointSource> {
        match self.format {
            ImportFormat::Las | ImportFormat::Laz => Box::new(las::LasPointSource::new()),
        }
    }
}

use pcc_core::pointcloud::point::Point;
use pcc_core::Result;

/// Streaming consumer of transformed points.
///
/// One sink instance belongs to one worker slot at a time. For the tiled
/// format every slot gets its own sink sharing a run-wide tile registry; for
/// the single-file format one sink serves the whole (single-threaded) run.
pub trait PointSink: Send {
    /// Prepares the sink for the next input file. `estimated_points` is the
    /// post-decimation count and is advisory.
    fn init(&mut self, estimated_points: u64) -> Result<()>;

    /// Accepts one transformed point. Out-of-range and non-finite
    /// coordinates are counted, never fatal.
    fn add_point(&mut self, point: &Point) -> Result<()>;

    /// Flushes everything buffered for the current file. Failures here are
    /// fatal for the file and reported to the scheduler.
    fn save(&mut self, file_index: usize) -> Result<()>;

    /// Terminal step for sinks that own an output stream (header patching).
    /// Pooled tile sinks treat this as a no-op; their terminal step is the
    /// registry's root write, driven by the scheduler.
    fn finish(&mut self) -> Result<()>;

    /// Range clamps and non-finite drops since the last `init`.
    fn clamp_count(&self) -> u64;

    /// Points accepted over the sink's lifetime.
    fn points_written(&self) -> u64;
}

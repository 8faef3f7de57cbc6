//! End-to-end processing of one input file on one worker slot.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use pcc_core::metadata::FileMetadata;
use pcc_core::pointcloud::decimation::filter::DecimationFilter;
use pcc_core::progress::ProgressTable;
use pcc_core::settings::ImportSettings;
use pcc_exporter::sink::PointSink;
use pcc_parser::source::PointSource;
use pcc_transformer::PointTransform;

use crate::events::{EventWriter, LogEvent};
use crate::pool::ResourcePool;

/// Everything a worker borrows from the scheduler for the run's duration.
pub(crate) struct WorkerContext<'a> {
    pub settings: &'a ImportSettings,
    pub transform: &'a PointTransform,
    pub readers: &'a ResourcePool<Box<dyn PointSource>>,
    pub writers: &'a ResourcePool<Box<dyn PointSink>>,
    pub create_reader: &'a (dyn Fn() -> Box<dyn PointSource> + Sync),
    pub create_writer: &'a (dyn Fn() -> Box<dyn PointSink> + Sync),
    pub progress: &'a ProgressTable,
    pub cancel: &'a AtomicBool,
    pub errors: &'a AtomicU64,
    pub clamped: &'a AtomicU64,
    pub points_written: &'a AtomicU64,
    pub files_completed: &'a AtomicU64,
    pub metadata: &'a Mutex<Vec<FileMetadata>>,
    pub events: EventWriter,
}

impl WorkerContext<'_> {
    fn record_error(&self, path: &Path, message: &str) {
        log::error!("{}: {}", path.display(), message);
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.events.emit(&LogEvent::Error {
            message,
            file: Some(&path.to_string_lossy()),
        });
    }
}

/// Processes `path` on `slot`. Never panics across this boundary: every
/// failure is logged, counted, and swallowed so the scheduler loop survives.
pub(crate) fn process_file(ctx: &WorkerContext<'_>, slot: usize, file_index: usize, path: &Path) {
    if ctx.cancel.load(Ordering::Relaxed) {
        return;
    }

    let mut reader = ctx.readers.acquire(slot, ctx.create_reader);
    if let Err(e) = reader.open(path, ctx.settings) {
        ctx.record_error(path, &format!("reader init failed: {e}"));
        reader.close();
        return;
    }
    ctx.events.emit(&LogEvent::File {
        status: "start",
        file: &path.to_string_lossy(),
        points: reader.point_count(),
    });

    if ctx.settings.metadata_only {
        if ctx.settings.captures_metadata() {
            ctx.metadata.lock().unwrap().push(reader.metadata());
        }
        ctx.events.emit(&LogEvent::File {
            status: "complete",
            file: &path.to_string_lossy(),
            points: 0,
        });
        ctx.files_completed.fetch_add(1, Ordering::Relaxed);
        reader.close();
        return;
    }

    let total = reader.point_count();
    let mut filter = DecimationFilter::new(
        ctx.settings.skip_every,
        ctx.settings.keep_every,
        ctx.settings.limit,
    );
    let effective = filter.effective_count(total);
    ctx.progress.start_file(slot, path.to_path_buf(), effective);

    let mut writer = ctx.writers.acquire(slot, ctx.create_writer);
    if let Err(e) = writer.init(effective) {
        ctx.record_error(path, &format!("writer init failed: {e}"));
        reader.close();
        return;
    }
    let written_before = writer.points_written();

    // Cancellation and progress share one quantum of roughly 1% of the file.
    let quantum = (total / 100).max(1);
    let mut cancelled = false;
    let mut failed = false;

    for index in 0..total {
        if index % quantum == 0 {
            if ctx.cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
            ctx.progress.set_current(slot, filter.kept());
        }

        match reader.read_point() {
            Ok(Some(mut point)) => {
                if !filter.admit(index) {
                    if filter.is_exhausted() {
                        break;
                    }
                    continue;
                }
                ctx.transform.apply(&mut point);
                if let Err(e) = writer.add_point(&point) {
                    ctx.record_error(path, &format!("write failed: {e}"));
                    failed = true;
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                // Truncated stream: keep what was read, warn, move on.
                log::warn!("{}: {}", path.display(), e);
                break;
            }
        }
    }
    ctx.progress.set_current(slot, filter.kept());

    if !cancelled && !failed {
        if let Err(e) = writer.save(file_index) {
            ctx.record_error(path, &format!("save failed: {e}"));
            failed = true;
        }
    }

    let clamped = writer.clamp_count();
    if clamped > 0 {
        log::warn!(
            "{}: {} points clamped or dropped at the output range",
            path.display(),
            clamped
        );
        ctx.clamped.fetch_add(clamped, Ordering::Relaxed);
    }
    let written = writer.points_written() - written_before;
    ctx.points_written.fetch_add(written, Ordering::Relaxed);

    if !cancelled && !failed {
        if ctx.settings.captures_metadata() {
            let mut metadata = reader.metadata();
            metadata.clamp_count = clamped;
            ctx.metadata.lock().unwrap().push(metadata);
        }
        ctx.events.emit(&LogEvent::File {
            status: "complete",
            file: &path.to_string_lossy(),
            points: written,
        });
        ctx.files_completed.fetch_add(1, Ordering::Relaxed);
    }
    reader.close();
}

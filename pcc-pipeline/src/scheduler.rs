//! Bounded-parallel conversion driver.
//!
//! State machine: Idle -> (bounds pass?) -> Running -> Finalizing or
//! Cancelled. A dedicated rayon pool of `max_threads` threads executes one
//! file task per thread at a time; the pool size is the backpressure
//! mechanism, there are no extra queues. Thread indices within the pool are
//! the worker slot ids that key the reader/writer pools and the progress
//! table.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use pcc_core::error::Error;
use pcc_core::metadata::FileMetadata;
use pcc_core::progress::ProgressTable;
use pcc_core::settings::{ExportFormat, ImportSettings};
use pcc_core::Result;
use pcc_exporter::pcroot::{PcTileWriter, TileRegistry};
use pcc_exporter::sink::PointSink;
use pcc_exporter::ucpc::UcpcWriter;
use pcc_parser::source::las::LasPointSource;
use pcc_parser::source::{FormatSourceProvider, PointSource, SourceProvider};

use crate::bounds::run_bounds_pass;
use crate::events::{EventWriter, LogEvent};
use crate::pool::ResourcePool;
use crate::reporter::{JsonSink, LogSink, ProgressReporter, ProgressSink};
use crate::worker::{process_file, WorkerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::Cancelled => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: RunStatus,
    pub files_completed: u64,
    pub points_written: u64,
    pub errors: u64,
    pub clamped: u64,
}

pub struct ConversionScheduler {
    settings: ImportSettings,
    cancel: Arc<AtomicBool>,
}

impl ConversionScheduler {
    pub fn new(settings: ImportSettings) -> Self {
        Self {
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared cancellation token; setting it stops permit grants and makes
    /// every worker exit at its next check quantum.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn input_files(&self) -> Vec<PathBuf> {
        let mut files = self.settings.input_files.clone();
        if self.settings.randomize {
            let mut rng = match self.settings.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            files.shuffle(&mut rng);
        }
        if self.settings.max_files > 0 && files.len() > self.settings.max_files {
            files.truncate(self.settings.max_files);
        }
        files
    }

    fn thread_count(&self, file_count: usize) -> usize {
        // The single-file container is one sequential stream; fan-out would
        // interleave records from different sources mid-stream.
        if self.settings.export_format == ExportFormat::Ucpc {
            return 1;
        }
        let requested = if self.settings.max_threads > 0 {
            self.settings.max_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        requested.clamp(1, file_count.max(1))
    }

    pub fn run(&self) -> Result<Outcome> {
        self.settings.validate()?;
        let settings = &self.settings;
        let events = EventWriter::new(settings.json_log);
        let started = Instant::now();

        let files = self.input_files();
        let max_threads = self.thread_count(files.len());
        log::info!(
            "converting {} files with {} worker threads",
            files.len(),
            max_threads
        );

        let errors = AtomicU64::new(0);
        let clamped = AtomicU64::new(0);
        let points_written = AtomicU64::new(0);
        let files_completed = AtomicU64::new(0);
        let metadata: Mutex<Vec<FileMetadata>> = Mutex::new(Vec::new());

        // Offset resolution: manual wins, then the bounds pass, then zero.
        let offset = if let Some(manual) = settings.manual_offset {
            manual
        } else if settings.needs_bounds_pass() {
            let mut source = LasPointSource::new();
            run_bounds_pass(&mut source, &files, settings, &errors)?
        } else {
            [0.0; 3]
        };
        let transform = pcc_transformer::PointTransform::new(settings, offset);

        let registry = match settings.export_format {
            ExportFormat::Pcroot if !settings.metadata_only => {
                Some(Arc::new(TileRegistry::create(settings, offset)?))
            }
            _ => None,
        };

        let readers: ResourcePool<Box<dyn PointSource>> = ResourcePool::new(max_threads);
        let writers: ResourcePool<Box<dyn PointSink>> = ResourcePool::new(max_threads);
        let source_provider = FormatSourceProvider {
            format: settings.import_format,
        };
        let create_reader = move || source_provider.create_source();
        let registry_for_writers = registry.clone();
        let settings_for_writers = settings.clone();
        let create_writer = move || -> Box<dyn PointSink> {
            match &registry_for_writers {
                Some(registry) => Box::new(PcTileWriter::new(registry.clone())),
                None => Box::new(UcpcWriter::new(&settings_for_writers)),
            }
        };

        let progress = Arc::new(ProgressTable::new(max_threads));
        let sink: Box<dyn ProgressSink> = if settings.json_log {
            Box::new(JsonSink::new(events))
        } else {
            Box::new(LogSink)
        };
        let reporter =
            ProgressReporter::start(progress.clone(), sink, ProgressReporter::DEFAULT_INTERVAL);

        let ctx = WorkerContext {
            settings,
            transform: &transform,
            readers: &readers,
            writers: &writers,
            create_reader: &create_reader,
            create_writer: &create_writer,
            progress: &progress,
            cancel: &self.cancel,
            errors: &errors,
            clamped: &clamped,
            points_written: &points_written,
            files_completed: &files_completed,
            metadata: &metadata,
            events,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_threads)
            .thread_name(|i| format!("pcc-worker-{i}"))
            .build()
            .map_err(|e| Error::InvalidSettings(format!("thread pool: {e}")))?;

        pool.scope(|scope| {
            for (file_index, path) in files.iter().enumerate() {
                if self.cancel.load(Ordering::Relaxed) {
                    break;
                }
                let ctx = &ctx;
                scope.spawn(move |_| {
                    let slot = rayon::current_thread_index().unwrap_or(0);
                    process_file(ctx, slot, file_index, path);
                });
            }
        });

        let cancelled = self.cancel.load(Ordering::Relaxed);

        if !cancelled {
            // Terminal step: root index for the tiled format, header patch
            // for the single-file one.
            if let Some(registry) = &registry {
                if settings.check_overlap {
                    for (tile, sources) in registry.overlapping_tiles() {
                        log::warn!("tile {} is fed by {} source files", tile, sources);
                    }
                }
                let summary = registry.write_root()?;
                if summary.root_written {
                    log::info!(
                        "root index {:?}: {} tiles, {} dropped below {} points, {} points",
                        registry.root_path(),
                        summary.tiles_written,
                        summary.tiles_dropped,
                        settings.min_points_per_tile,
                        summary.total_points
                    );
                }
            } else {
                let mut finish_error = None;
                writers.for_each(|writer| {
                    if let Err(e) = writer.finish() {
                        finish_error = Some(e);
                    }
                });
                if let Some(e) = finish_error {
                    return Err(e);
                }
            }

            if settings.captures_metadata() {
                self.write_metadata_sidecar(&metadata.lock().unwrap())?;
            }
        }

        let files_completed = files_completed.load(Ordering::Relaxed);
        let errors = errors.load(Ordering::Relaxed);
        let status = if cancelled {
            RunStatus::Cancelled
        } else if files_completed == 0 && errors > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        let outcome = Outcome {
            status,
            files_completed,
            points_written: points_written.load(Ordering::Relaxed),
            errors,
            clamped: clamped.load(Ordering::Relaxed),
        };

        events.emit(&LogEvent::End {
            status: match status {
                RunStatus::Success => "success",
                RunStatus::Failed => "error",
                RunStatus::Cancelled => "cancelled",
            },
            files: outcome.files_completed,
            points: outcome.points_written,
            errors: outcome.errors,
            clamped: outcome.clamped,
        });
        reporter.stop();
        log::info!(
            "{} files, {} points, {} errors in {:.2?}",
            outcome.files_completed,
            outcome.points_written,
            outcome.errors,
            started.elapsed()
        );
        Ok(outcome)
    }

    fn write_metadata_sidecar(&self, metadata: &[FileMetadata]) -> Result<()> {
        let path = self.settings.output.with_extension("json");
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| Error::write(&path, e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| Error::write(&path, e.to_string()))?;
        log::info!("wrote metadata for {} files to {:?}", metadata.len(), path);
        Ok(())
    }
}

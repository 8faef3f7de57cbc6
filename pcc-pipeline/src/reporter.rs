//! Periodic progress emission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pcc_core::progress::{ProgressInfo, ProgressTable};

use crate::events::{EventWriter, LogEvent};

/// Where progress snapshots go. The conversion itself never depends on a
/// sink; a headless run may use `NullSink`.
pub trait ProgressSink: Send {
    fn report(&self, snapshot: &[ProgressInfo]);
}

/// Human-readable per-slot lines through the `log` facade.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, snapshot: &[ProgressInfo]) {
        for info in snapshot {
            if info.max_points == 0 {
                continue;
            }
            let percentage = info.current_point as f64 / info.max_points as f64 * 100.0;
            log::info!(
                "worker {}: {}/{} ({:.1}%) {}",
                info.slot,
                info.current_point,
                info.max_points,
                percentage,
                info.file.display()
            );
        }
    }
}

/// One `progress` JSON event per active slot.
pub struct JsonSink {
    events: EventWriter,
}

impl JsonSink {
    pub fn new(events: EventWriter) -> Self {
        Self { events }
    }
}

impl ProgressSink for JsonSink {
    fn report(&self, snapshot: &[ProgressInfo]) {
        for info in snapshot {
            if info.max_points == 0 {
                continue;
            }
            self.events.emit(&LogEvent::Progress {
                thread: info.slot,
                current_point: info.current_point,
                total_points: info.max_points,
                percentage: info.current_point as f64 / info.max_points as f64 * 100.0,
                file: &info.file.to_string_lossy(),
            });
        }
    }
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _snapshot: &[ProgressInfo]) {}
}

/// Dedicated reporter thread ticking at roughly 1 Hz. Reads the table under
/// its shared locks; stops on request, always emitting one final snapshot.
pub struct ProgressReporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

    pub fn start(
        table: Arc<ProgressTable>,
        sink: Box<dyn ProgressSink>,
        interval: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut last_tick = Instant::now();
            while !stop_flag.load(Ordering::Relaxed) {
                if last_tick.elapsed() >= interval {
                    sink.report(&table.snapshot());
                    last_tick = Instant::now();
                }
                // Short naps keep shutdown prompt without busy-waiting.
                thread::sleep(Duration::from_millis(50));
            }
            sink.report(&table.snapshot());
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the thread and waits for its final tick.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct CaptureSink(Arc<Mutex<Vec<Vec<ProgressInfo>>>>);

    impl ProgressSink for CaptureSink {
        fn report(&self, snapshot: &[ProgressInfo]) {
            self.0.lock().unwrap().push(snapshot.to_vec());
        }
    }

    #[test]
    fn final_tick_is_emitted_on_stop() {
        let table = Arc::new(ProgressTable::new(1));
        table.start_file(0, PathBuf::from("a.las"), 10);
        table.set_current(0, 10);

        let captured = Arc::new(Mutex::new(Vec::new()));
        let reporter = ProgressReporter::start(
            table,
            Box::new(CaptureSink(captured.clone())),
            Duration::from_secs(60),
        );
        reporter.stop();

        let captured = captured.lock().unwrap();
        assert!(!captured.is_empty());
        let last = captured.last().unwrap();
        assert_eq!(last[0].current_point, 10);
    }
}

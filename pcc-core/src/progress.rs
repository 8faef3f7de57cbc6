//! Shared per-worker progress state.

use std::path::PathBuf;
use std::sync::RwLock;

/// One worker slot's progress. `current_point` is monotonically
/// non-decreasing within a file and resets to zero when the slot picks up
/// the next file.
#[derive(Debug, Clone, Default)]
pub struct ProgressInfo {
    pub slot: usize,
    pub file: PathBuf,
    pub current_point: u64,
    pub max_points: u64,
}

/// Fixed table of `max_threads` slots. Each slot is written by exactly one
/// worker at a time; the reporter takes read locks at its own cadence, so
/// slightly stale values are fine.
#[derive(Debug)]
pub struct ProgressTable {
    slots: Vec<RwLock<ProgressInfo>>,
}

impl ProgressTable {
    pub fn new(slot_count: usize) -> Self {
        let slots = (0..slot_count)
            .map(|slot| {
                RwLock::new(ProgressInfo {
                    slot,
                    ..Default::default()
                })
            })
            .collect();
        Self { slots }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Called by a worker when it starts a new file.
    pub fn start_file(&self, slot: usize, file: PathBuf, max_points: u64) {
        let mut info = self.slots[slot].write().unwrap();
        info.file = file;
        info.current_point = 0;
        info.max_points = max_points;
    }

    /// Called by a worker at its progress quantum.
    pub fn set_current(&self, slot: usize, current_point: u64) {
        let mut info = self.slots[slot].write().unwrap();
        info.current_point = current_point;
    }

    pub fn snapshot(&self) -> Vec<ProgressInfo> {
        self.slots
            .iter()
            .map(|slot| slot.read().unwrap().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_file_resets_current() {
        let table = ProgressTable::new(2);
        table.start_file(1, PathBuf::from("a.las"), 100);
        table.set_current(1, 60);
        table.start_file(1, PathBuf::from("b.las"), 50);

        let snapshot = table.snapshot();
        assert_eq!(snapshot[1].current_point, 0);
        assert_eq!(snapshot[1].max_points, 50);
        assert_eq!(snapshot[0].max_points, 0);
    }
}

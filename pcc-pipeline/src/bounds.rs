//! Header-only global bounds pass.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use pcc_core::error::Error;
use pcc_core::settings::ImportSettings;
use pcc_core::Result;
use pcc_parser::source::PointSource;

/// Opens every input sequentially, reads header bounds only, and reduces the
/// element-wise minimum. The result becomes the global coordinate offset so
/// that offset-subtracted coordinates are non-negative and packed fractions
/// stay in [0, 1).
///
/// Files that fail to open are counted and skipped; if none succeed the run
/// aborts with `NoUsableInput`. Running the pass twice over the same inputs
/// yields the same offset.
pub fn run_bounds_pass(
    source: &mut dyn PointSource,
    files: &[PathBuf],
    settings: &ImportSettings,
    errors: &AtomicU64,
) -> Result<[f64; 3]> {
    let mut minimum = [f64::MAX; 3];
    let mut usable = 0usize;

    for path in files {
        match source.open(path, settings) {
            Ok(bounds) => {
                for axis in 0..3 {
                    minimum[axis] = minimum[axis].min(bounds.min[axis]);
                }
                usable += 1;
            }
            Err(e) => {
                log::warn!("bounds pass: skipping {:?}: {}", path, e);
                errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        source.close();
    }

    if usable == 0 {
        return Err(Error::NoUsableInput);
    }
    log::info!(
        "bounds pass: offset ({}, {}, {}) from {} of {} files",
        minimum[0],
        minimum[1],
        minimum[2],
        usable,
        files.len()
    );
    Ok(minimum)
}

//! Progress aggregator (spec §4.F): per-file percentage and a session-wide
//! blended total, recomputed no more often than the configured throttle.

use std::time::{Duration, Instant};

use crate::types::{FileProgress, SessionState};

/// Per-file percentage, clamped to `[0, 100]`. Files with no known total
/// size report `0` until `upload_complete` flips it to `100`
//  (spec §4.F, "unsized files have no meaningful percentage until done").
pub fn file_percentage(progress: &FileProgress) -> u8 {
    if progress.upload_complete {
        return 100;
    }
    match progress.bytes_total {
        Some(total) if total > 0 => {
            let ratio = progress.bytes_uploaded as f64 / total as f64;
            (ratio.clamp(0.0, 1.0) * 100.0).floor() as u8
        }
        _ => 0,
    }
}

/// Blends sized and unsized in-progress files into one session-wide
/// percentage (spec §4.F):
///
/// - Sized files contribute their actual byte progress.
/// - Unsized files contribute as "0% until done, then 100%", weighted
///   equally with the aggregate of sized files' bytes so that a handful of
///   unsized files can't mask the real progress of large sized ones.
pub fn aggregate_percentage(state: &SessionState) -> u8 {
    let in_progress: Vec<_> = state.in_progress_files().collect();
    if in_progress.is_empty() {
        return 100;
    }

    let (sized, unsized_): (Vec<_>, Vec<_>) = in_progress
        .into_iter()
        .partition(|f| f.progress.bytes_total.is_some());

    let sized_uploaded: u64 = sized.iter().map(|f| f.progress.bytes_uploaded).sum();
    let sized_total: u64 = sized.iter().filter_map(|f| f.progress.bytes_total).sum();

    let unsized_done = unsized_.iter().filter(|f| f.progress.upload_complete).count();
    let unsized_count = unsized_.len();

    if sized_total == 0 && unsized_count == 0 {
        return 100;
    }

    // Treat each unsized file as if it were one "unit" of size equal to the
    // average sized file, so it can't dominate or vanish from the blend.
    let unit = if !sized.is_empty() && sized_total > 0 {
        sized_total / sized.len() as u64
    } else {
        1
    };
    let unsized_total_units = unit.saturating_mul(unsized_count as u64);
    let unsized_done_units = unit.saturating_mul(unsized_done as u64);

    let total = sized_total.saturating_add(unsized_total_units);
    if total == 0 {
        return 100;
    }
    let done = sized_uploaded.saturating_add(unsized_done_units);

    ((done as f64 / total as f64).clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Throttles recomputation of the aggregate percentage to at most once per
/// `interval` (spec §4.F, "throttled to 500ms by default").
pub struct Throttle {
    interval: Duration,
    last_emitted: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_emitted: None,
        }
    }

    /// Returns `true` if enough time has elapsed since the last accepted
    /// call to justify recomputing and emitting progress now. Always
    /// accepts the first call.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emitted {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emitted = Some(now);
                true
            }
        }
    }
}

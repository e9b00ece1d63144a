//! Time helpers. Grounded on the teacher's `util::temporal`, adapted to
//! `chrono` throughout rather than the legacy `time` crate.

use chrono::{DateTime, Utc};

/// The current instant, as a single indirection so tests can be written
/// against a fixed clock if ever needed.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

//! Engine-wide constants

use crate::types::Coordinates;

/// Opening boundary of the working day, in hours since midnight.
pub const DEFAULT_DAY_START_HOUR: f64 = 8.0;

/// Closing boundary of the working day, in hours since midnight.
pub const DEFAULT_DAY_END_HOUR: f64 = 18.0;

/// Granularity of the rendered day grid.
pub const DEFAULT_SLOT_MINUTES: u32 = 15;

/// Largest point count sent to the travel-time provider in one request.
pub const MATRIX_POINT_CEILING: usize = 25;

/// Stop scanning for 2-opt improvements after this many full passes.
pub const TWO_OPT_MAX_ITERATIONS: usize = 100;

/// Undo stack depth; the oldest snapshot is dropped first.
pub const UNDO_DEPTH: usize = 30;

/// Quiet period before a settled schedule is written.
pub const PERSIST_DEBOUNCE_MS: u64 = 1500;

/// Home shop used when no depot is configured.
pub fn default_depot() -> Coordinates {
    Coordinates { lat: 39.7392, lng: -104.9903 }
}

//! Pure scheduling rules shared by the engine and its tests.

use std::time::Duration;

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Period of the scheduler tick. Each tick runs at most one unit of work.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long terminal jobs and stopped configs stay in memory.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Whether an item that reached a terminal state at `finished_at` has
/// outlived `retention` at `now`.
pub fn is_expired(finished_at: Timestamp, now: Timestamp, retention: Duration) -> bool {
    match chrono::Duration::from_std(retention) {
        Ok(retention) => finished_at + retention <= now,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Output filtering
// ---------------------------------------------------------------------------

/// Drop the leading preview grid from a multi-image batch.
///
/// The backend prepends a grid of all outputs when it renders more than
/// one image. It is only recognised when more images came back than were
/// requested, so a backend with grids disabled keeps every output.
pub fn drop_preview_grid<T>(mut images: Vec<T>, requested: u32) -> Vec<T> {
    if requested > 1 && images.len() > requested as usize {
        images.remove(0);
    }
    images
}

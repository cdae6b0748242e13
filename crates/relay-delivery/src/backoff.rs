//! Fixed retry schedule for failed deliveries.
//!
//! Front-loaded fast retries catch transient blips; the long tail avoids
//! hammering a persistently broken endpoint while `max_attempts` still
//! guarantees an eventual terminal state. The steps are product defaults,
//! not load-bearing values.

use std::time::Duration;

/// Wait before retry attempt n+1, indexed by the attempt that just failed.
pub const RETRY_SCHEDULE: [Duration; 7] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(2 * 60 * 60),
    Duration::from_secs(6 * 60 * 60),
];

/// Returns the delay to wait after the given failed attempt (1-based).
///
/// Attempts past the end of the schedule clamp to the last entry, so the
/// delay sequence is monotonically non-decreasing however many attempts a
/// subscription allows.
pub fn delay_for_attempt(attempt_number: i32) -> Duration {
    let index = usize::try_from(attempt_number.saturating_sub(1))
        .unwrap_or(0)
        .min(RETRY_SCHEDULE.len() - 1);

    RETRY_SCHEDULE[index]
}

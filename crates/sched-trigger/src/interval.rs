//! Interval trigger: `start_at + k*interval`, smallest value strictly
//! greater than the reference instant.

use chrono::{DateTime, Utc};

/// Next interval firing strictly after `after`.
///
/// If `after < start_at`, the first firing (`start_at` itself) hasn't
/// happened yet, so it is returned directly. Otherwise this returns the
/// smallest `start_at + k*interval` (`k >= 1`) strictly greater than
/// `after`, computed in one step rather than by looping — the schedule may
/// have been paused for arbitrarily long, and a naive loop would spin once
/// per missed interval.
pub fn interval_next(start_at: DateTime<Utc>, interval_seconds: u32, after: DateTime<Utc>) -> DateTime<Utc> {
    if after < start_at {
        return start_at;
    }
    let interval = interval_seconds.max(1) as i64;
    let elapsed = (after - start_at).num_seconds();
    let k = elapsed / interval + 1;
    start_at + chrono::Duration::seconds(k * interval)
}

//! Pure trigger math: given a schedule definition and the instant of its
//! last firing (if any), compute the next instant it should fire, or `None`
//! if its window has already closed.
//!
//! Kept free of any I/O or mutable state so it can be exhaustively unit
//! tested against fixed instants — the scheduler crate is the only caller
//! that touches wall-clock time or persistence.

pub mod cron;
pub mod interval;
pub mod validation;

use chrono::{DateTime, Duration, Utc};
use sched_domain::{Schedule, ScheduleType};

/// Compute the next firing instant for `schedule`.
///
/// `last_fired` is the instant of the schedule's most recent firing, or
/// `None` if it has never fired. `tz` is the globally configured timezone
/// cron expressions are evaluated against.
///
/// Returns `None` once the computed candidate would fall outside the
/// schedule's window (duration elapsed or run budget exhausted) — the
/// window is checked against the *candidate* firing instant, not the
/// instant this function is called, so a schedule that was paused for a
/// long time still stops exactly at its configured boundary rather than
/// firing once more on resume.
///
/// Interval and cron schedules treat "never fired" differently:
/// - Interval: the very first firing *is* `start_at` itself — a freshly
///   created interval schedule ticks immediately, then every
///   `interval_seconds` after.
/// - Cron: `start_at` only establishes a floor for the search; the first
///   firing is the next cron-matching instant strictly after it, even if
///   `start_at` itself happens to match the expression.
pub fn next_fire(schedule: &Schedule, last_fired: Option<DateTime<Utc>>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    if schedule.max_runs_reached() {
        return None;
    }

    let candidate = match schedule.schedule_type {
        ScheduleType::Interval => {
            let interval_seconds = schedule.interval_seconds.unwrap_or(1);
            let reference = last_fired.unwrap_or_else(|| schedule.start_at - Duration::nanoseconds(1));
            Some(interval::interval_next(schedule.start_at, interval_seconds, reference))
        }
        ScheduleType::Cron => {
            let cron_expr = schedule.cron_expression.as_deref()?;
            let reference = last_fired.unwrap_or(schedule.start_at).max(schedule.start_at);
            cron::cron_next_tz(cron_expr, &reference, tz)
        }
    };

    candidate.filter(|c| !schedule.duration_expired(*c))
}

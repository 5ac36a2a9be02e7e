//! Recovery — startup reconciliation between durable state and the
//! in-memory timer set, run once before the API layer begins serving
//! traffic.
//!
//! Returns a [`RecoveryReport`] rather than only side-effecting state, so
//! the caller doesn't have to infer what a pass did from logs.

use std::sync::Arc;

use sched_domain::{Clock, ScheduleStatus};
use sched_scheduler::Scheduler;
use sched_store::Store;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Runs that were `pending`/`running` at a prior crash, now `failed`.
    pub orphaned_runs: Vec<Uuid>,
    /// Active schedules successfully rearmed for a future firing.
    pub rearmed_schedules: Vec<Uuid>,
    /// Active schedules whose window had already closed; marked `completed`.
    pub completed_schedules: Vec<Uuid>,
}

/// Run the startup recovery procedure:
///
/// 1. Mark every in-flight Run (`pending`/`running`) `failed` with
///    `final_error = "orphaned by server restart"`.
/// 2. Rearm every `active` Schedule via the Scheduler, which itself
///    transitions a schedule to `completed` if its window has since closed.
///
/// Idempotent: a second pass finds no in-flight Runs left to fail, and
/// re-arming an already-armed schedule is a no-op disarm-then-rearm.
pub async fn recover(store: &Arc<Store>, scheduler: &Scheduler, clock: &Arc<dyn Clock>) -> RecoveryReport {
    let now = clock.now();

    let orphaned = store.bulk_fail_in_flight(now).await;
    let orphaned_runs: Vec<Uuid> = orphaned.iter().map(|r| r.id).collect();
    if !orphaned_runs.is_empty() {
        tracing::warn!(count = orphaned_runs.len(), "marked orphaned runs failed on recovery");
    }

    let active = store.list_active_schedules().await;
    let mut rearmed_schedules = Vec::new();
    let mut completed_schedules = Vec::new();

    for schedule in active {
        scheduler.on_schedule_created(schedule.id).await;
        match store.get_schedule(&schedule.id).await {
            Some(after) if after.status == ScheduleStatus::Completed => completed_schedules.push(schedule.id),
            Some(_) => rearmed_schedules.push(schedule.id),
            None => {}
        }
    }

    tracing::info!(
        orphaned = orphaned_runs.len(),
        rearmed = rearmed_schedules.len(),
        completed = completed_schedules.len(),
        "recovery complete"
    );

    RecoveryReport {
        orphaned_runs,
        rearmed_schedules,
        completed_schedules,
    }
}

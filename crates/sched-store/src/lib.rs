//! In-process durable store for Targets, Schedules, Runs, and Attempts.
//!
//! `RwLock`-guarded maps with JSON-file persistence via `spawn_blocking`,
//! plus a `HashSet<String>` index over `runs.idempotency_key` for O(1)
//! conflict detection on insert (see DESIGN.md for the tradeoffs).

pub mod error;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sched_domain::{Attempt, Run, RunStatus, Schedule, ScheduleStatus, Target};
use tokio::sync::RwLock;
use uuid::Uuid;

pub use error::{Result, StoreError};

/// Summary of a cascading Target deletion, returned so the caller can log
/// or report what was removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    pub schedules_removed: usize,
    pub runs_removed: usize,
    pub attempts_removed: usize,
}

pub struct Store {
    dir: PathBuf,
    targets: RwLock<HashMap<Uuid, Target>>,
    schedules: RwLock<HashMap<Uuid, Schedule>>,
    runs: RwLock<HashMap<Uuid, Run>>,
    attempts: RwLock<HashMap<Uuid, Attempt>>,
    idempotency_keys: RwLock<HashSet<String>>,
}

fn load_map<T>(path: &Path) -> HashMap<Uuid, T>
where
    T: serde::de::DeserializeOwned + Keyed,
{
    let Ok(data) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    match serde_json::from_str::<Vec<T>>(&data) {
        Ok(items) => items.into_iter().map(|item| (item.key(), item)).collect(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse persisted state, starting empty");
            HashMap::new()
        }
    }
}

trait Keyed {
    fn key(&self) -> Uuid;
}
impl Keyed for Target {
    fn key(&self) -> Uuid {
        self.id
    }
}
impl Keyed for Schedule {
    fn key(&self) -> Uuid {
        self.id
    }
}
impl Keyed for Run {
    fn key(&self) -> Uuid {
        self.id
    }
}
impl Keyed for Attempt {
    fn key(&self) -> Uuid {
        self.id
    }
}

async fn persist_map<T>(path: PathBuf, items: Vec<T>)
where
    T: serde::Serialize + Send + 'static,
{
    let Ok(json) = serde_json::to_string_pretty(&items) else {
        return;
    };
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, json) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist state");
        }
    })
    .await;
}

impl Store {
    /// Load (or initialize) a store backed by JSON files under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let targets: HashMap<Uuid, Target> = load_map(&dir.join("targets.json"));
        let schedules: HashMap<Uuid, Schedule> = load_map(&dir.join("schedules.json"));
        let runs: HashMap<Uuid, Run> = load_map(&dir.join("runs.json"));
        let attempts: HashMap<Uuid, Attempt> = load_map(&dir.join("attempts.json"));
        let idempotency_keys = runs.values().map(|r| r.idempotency_key.clone()).collect();

        tracing::info!(
            targets = targets.len(),
            schedules = schedules.len(),
            runs = runs.len(),
            attempts = attempts.len(),
            "loaded persisted state"
        );

        Self {
            dir,
            targets: RwLock::new(targets),
            schedules: RwLock::new(schedules),
            runs: RwLock::new(runs),
            attempts: RwLock::new(attempts),
            idempotency_keys: RwLock::new(idempotency_keys),
        }
    }

    async fn persist_targets(&self) {
        let items: Vec<Target> = self.targets.read().await.values().cloned().collect();
        persist_map(self.dir.join("targets.json"), items).await;
    }

    async fn persist_schedules(&self) {
        let items: Vec<Schedule> = self.schedules.read().await.values().cloned().collect();
        persist_map(self.dir.join("schedules.json"), items).await;
    }

    async fn persist_runs(&self) {
        let items: Vec<Run> = self.runs.read().await.values().cloned().collect();
        persist_map(self.dir.join("runs.json"), items).await;
    }

    async fn persist_attempts(&self) {
        let items: Vec<Attempt> = self.attempts.read().await.values().cloned().collect();
        persist_map(self.dir.join("attempts.json"), items).await;
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Targets
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn create_target(&self, target: Target) -> Result<Target> {
        self.targets.write().await.insert(target.id, target.clone());
        self.persist_targets().await;
        Ok(target)
    }

    pub async fn get_target(&self, id: &Uuid) -> Option<Target> {
        self.targets.read().await.get(id).cloned()
    }

    pub async fn list_targets(&self) -> Vec<Target> {
        self.targets.read().await.values().cloned().collect()
    }

    pub async fn update_target(&self, id: &Uuid, f: impl FnOnce(&mut Target)) -> Option<Target> {
        let updated = {
            let mut map = self.targets.write().await;
            map.get_mut(id).map(|target| {
                f(target);
                target.updated_at = Utc::now();
                target.clone()
            })
        };
        if updated.is_some() {
            self.persist_targets().await;
        }
        updated
    }

    /// Remove a Target along with every Schedule that references it, and
    /// every Run/Attempt under those schedules. The caller must disarm the
    /// Scheduler's timers for those schedule ids *before* calling this —
    /// this method only performs the storage-side cascade.
    pub async fn delete_target_cascade(&self, id: &Uuid) -> Result<CascadeSummary> {
        let removed_target = self.targets.write().await.remove(id).is_some();
        if !removed_target {
            return Err(StoreError::NotFound(format!("target {id}")));
        }

        let schedule_ids: Vec<Uuid> = {
            let map = self.schedules.read().await;
            map.values().filter(|s| s.target_id == *id).map(|s| s.id).collect()
        };

        let mut summary = CascadeSummary {
            schedules_removed: schedule_ids.len(),
            ..Default::default()
        };

        {
            let mut schedules = self.schedules.write().await;
            for sid in &schedule_ids {
                schedules.remove(sid);
            }
        }

        let run_ids: Vec<Uuid> = {
            let map = self.runs.read().await;
            map.values().filter(|r| schedule_ids.contains(&r.schedule_id)).map(|r| r.id).collect()
        };
        summary.runs_removed = run_ids.len();

        {
            let mut runs = self.runs.write().await;
            let mut keys = self.idempotency_keys.write().await;
            for rid in &run_ids {
                if let Some(run) = runs.remove(rid) {
                    keys.remove(&run.idempotency_key);
                }
            }
        }

        {
            let mut attempts = self.attempts.write().await;
            let before = attempts.len();
            attempts.retain(|_, a| !run_ids.contains(&a.run_id));
            summary.attempts_removed = before - attempts.len();
        }

        self.persist_targets().await;
        self.persist_schedules().await;
        self.persist_runs().await;
        self.persist_attempts().await;

        Ok(summary)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Schedules
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        self.schedules.write().await.insert(schedule.id, schedule.clone());
        self.persist_schedules().await;
        Ok(schedule)
    }

    pub async fn get_schedule(&self, id: &Uuid) -> Option<Schedule> {
        self.schedules.read().await.get(id).cloned()
    }

    pub async fn list_schedules(&self) -> Vec<Schedule> {
        self.schedules.read().await.values().cloned().collect()
    }

    /// Active schedules, used by Recovery to decide what to rearm.
    pub async fn list_active_schedules(&self) -> Vec<Schedule> {
        self.schedules
            .read()
            .await
            .values()
            .filter(|s| s.status == ScheduleStatus::Active)
            .cloned()
            .collect()
    }

    pub async fn update_schedule(&self, id: &Uuid, f: impl FnOnce(&mut Schedule)) -> Option<Schedule> {
        let updated = {
            let mut map = self.schedules.write().await;
            map.get_mut(id).map(|schedule| {
                f(schedule);
                schedule.updated_at = Utc::now();
                schedule.clone()
            })
        };
        if updated.is_some() {
            self.persist_schedules().await;
        }
        updated
    }

    /// Remove a Schedule row. Historical Runs/Attempts are left intact as
    /// the durable audit trail for that entity; only Target deletion
    /// cascades through them.
    pub async fn delete_schedule(&self, id: &Uuid) -> bool {
        let removed = self.schedules.write().await.remove(id).is_some();
        if removed {
            self.persist_schedules().await;
        }
        removed
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Runs
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert a Run, atomically enforcing idempotency-key uniqueness.
    /// A collision returns `StoreError::DuplicateKey` so the caller (the
    /// Scheduler) can treat the firing as already handled.
    pub async fn create_run(&self, run: Run) -> Result<Run> {
        let mut keys = self.idempotency_keys.write().await;
        if keys.contains(&run.idempotency_key) {
            return Err(StoreError::DuplicateKey(run.idempotency_key.clone()));
        }
        keys.insert(run.idempotency_key.clone());
        drop(keys);

        self.runs.write().await.insert(run.id, run.clone());
        self.persist_runs().await;
        Ok(run)
    }

    pub async fn get_run(&self, id: &Uuid) -> Option<Run> {
        self.runs.read().await.get(id).cloned()
    }

    pub async fn list_runs_for_schedule(&self, schedule_id: &Uuid) -> Vec<Run> {
        let mut runs: Vec<Run> = self.runs.read().await.values().filter(|r| r.schedule_id == *schedule_id).cloned().collect();
        runs.sort_by_key(|r| r.scheduled_at);
        runs
    }

    /// Number of Runs for `schedule_id` currently `pending`/`running` —
    /// the single-inflight-per-schedule gate.
    pub async fn count_inflight_for_schedule(&self, schedule_id: &Uuid) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|r| r.schedule_id == *schedule_id && !r.status.is_terminal())
            .count()
    }

    /// Transition a Run's status. Only pending->running, or any
    /// non-terminal status to a terminal one, are permitted; anything else
    /// is rejected without mutating state.
    pub async fn update_run_status(
        &self,
        id: &Uuid,
        to: RunStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        final_error: Option<String>,
    ) -> Result<Run> {
        let updated = {
            let mut map = self.runs.write().await;
            let run = map.get_mut(id).ok_or_else(|| StoreError::NotFound(format!("run {id}")))?;

            if !valid_transition(run.status, to) {
                return Err(StoreError::InvalidTransition {
                    from: format!("{:?}", run.status),
                    to: format!("{to:?}"),
                });
            }

            run.status = to;
            if let Some(t) = started_at {
                run.started_at = Some(t);
            }
            if let Some(t) = completed_at {
                run.completed_at = Some(t);
            }
            if final_error.is_some() {
                run.final_error = final_error;
            }
            run.clone()
        };
        self.persist_runs().await;
        Ok(updated)
    }

    /// Mark every `pending`/`running` Run as `failed` with a distinguishable
    /// `final_error`, for Recovery. Idempotent: a second pass finds nothing
    /// left to fail.
    pub async fn bulk_fail_in_flight(&self, now: DateTime<Utc>) -> Vec<Run> {
        let mut failed = vec![];
        {
            let mut map = self.runs.write().await;
            for run in map.values_mut() {
                if !run.status.is_terminal() {
                    run.status = RunStatus::Failed;
                    run.completed_at = Some(now);
                    run.final_error = Some("orphaned by server restart".to_string());
                    failed.push(run.clone());
                }
            }
        }
        if !failed.is_empty() {
            self.persist_runs().await;
        }
        failed
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Attempts
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append an Attempt and bump its Run's `attempt_count`. Attempts are
    /// never mutated or removed after insertion.
    pub async fn append_attempt(&self, attempt: Attempt) -> Result<Attempt> {
        {
            let mut runs = self.runs.write().await;
            let run = runs.get_mut(&attempt.run_id).ok_or_else(|| StoreError::NotFound(format!("run {}", attempt.run_id)))?;
            run.attempt_count = run.attempt_count.max(attempt.attempt_number);
        }
        self.attempts.write().await.insert(attempt.id, attempt.clone());
        self.persist_runs().await;
        self.persist_attempts().await;
        Ok(attempt)
    }

    pub async fn list_attempts_for_run(&self, run_id: &Uuid) -> Vec<Attempt> {
        let mut attempts: Vec<Attempt> = self.attempts.read().await.values().filter(|a| a.run_id == *run_id).cloned().collect();
        attempts.sort_by_key(|a| a.attempt_number);
        attempts
    }
}

fn valid_transition(from: RunStatus, to: RunStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    match to {
        RunStatus::Running => from == RunStatus::Pending,
        RunStatus::Pending => false,
        RunStatus::Succeeded | RunStatus::Failed => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sched_domain::{idempotency_key, HttpMethod};

    fn target(now: DateTime<Utc>) -> Target {
        Target {
            id: Uuid::new_v4(),
            name: "t1".into(),
            url: "https://example.com/hook".into(),
            method: HttpMethod::Post,
            headers: HashMap::new(),
            body_template: None,
            timeout_seconds: 30,
            created_at: now,
            updated_at: now,
        }
    }

    fn schedule(target_id: Uuid, now: DateTime<Utc>) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            name: "s1".into(),
            target_id,
            schedule_type: sched_domain::ScheduleType::Interval,
            interval_seconds: Some(10),
            cron_expression: None,
            start_at: now,
            duration_seconds: None,
            max_runs: None,
            status: ScheduleStatus::Active,
            runs_count: 0,
            next_run_at: None,
            consecutive_failures: 0,
            last_error: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn run(schedule_id: Uuid, target_id: Uuid, scheduled_at: DateTime<Utc>) -> Run {
        Run {
            id: Uuid::new_v4(),
            schedule_id,
            target_id,
            scheduled_at,
            started_at: None,
            completed_at: None,
            status: RunStatus::Pending,
            idempotency_key: idempotency_key(&schedule_id, scheduled_at),
            attempt_count: 0,
            final_error: None,
        }
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sched-store-test-{}", Uuid::new_v4()));
        dir
    }

    #[tokio::test]
    async fn create_and_get_target() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = target(now);
        store.create_target(t.clone()).await.unwrap();
        assert_eq!(store.get_target(&t.id).await.unwrap().name, "t1");
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = target(now);
        let s = schedule(t.id, now);
        let r1 = run(s.id, t.id, now);
        let mut r2 = run(s.id, t.id, now);
        r2.idempotency_key = r1.idempotency_key.clone();

        store.create_run(r1).await.unwrap();
        let err = store.create_run(r2).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)), "duplicate firing must be rejected, not double-inserted");
    }

    #[tokio::test]
    async fn single_inflight_count_reflects_non_terminal_runs() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = target(now);
        let s = schedule(t.id, now);
        let r = store.create_run(run(s.id, t.id, now)).await.unwrap();

        assert_eq!(store.count_inflight_for_schedule(&s.id).await, 1);

        store.update_run_status(&r.id, RunStatus::Succeeded, None, Some(now), None).await.unwrap();
        assert_eq!(store.count_inflight_for_schedule(&s.id).await, 0);
    }

    #[tokio::test]
    async fn terminal_run_status_is_immutable() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = target(now);
        let s = schedule(t.id, now);
        let r = store.create_run(run(s.id, t.id, now)).await.unwrap();

        store.update_run_status(&r.id, RunStatus::Succeeded, None, Some(now), None).await.unwrap();
        let err = store.update_run_status(&r.id, RunStatus::Failed, None, Some(now), None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn append_attempt_bumps_run_attempt_count() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = target(now);
        let s = schedule(t.id, now);
        let r = store.create_run(run(s.id, t.id, now)).await.unwrap();

        let attempt = Attempt {
            id: Uuid::new_v4(),
            run_id: r.id,
            attempt_number: 1,
            request_url: t.url.clone(),
            request_method: "POST".into(),
            request_headers: HashMap::new(),
            request_body: None,
            response_status: Some(200),
            response_headers: HashMap::new(),
            response_body: Some("ok".into()),
            error_class: sched_domain::ErrorClass::None,
            error_message: None,
            duration_ms: 12,
            started_at: now,
            completed_at: now,
        };
        store.append_attempt(attempt).await.unwrap();
        assert_eq!(store.get_run(&r.id).await.unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn bulk_fail_in_flight_marks_pending_and_running_only() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = target(now);
        let s = schedule(t.id, now);
        let pending = store.create_run(run(s.id, t.id, now)).await.unwrap();
        let mut running_run = run(s.id, t.id, now + chrono::Duration::seconds(10));
        running_run.status = RunStatus::Running;
        let running = store.create_run(running_run).await.unwrap();
        let mut succeeded_run = run(s.id, t.id, now + chrono::Duration::seconds(20));
        succeeded_run.status = RunStatus::Succeeded;
        let succeeded = store.create_run(succeeded_run).await.unwrap();

        let failed = store.bulk_fail_in_flight(now + chrono::Duration::seconds(30)).await;
        assert_eq!(failed.len(), 2);

        assert_eq!(store.get_run(&pending.id).await.unwrap().status, RunStatus::Failed);
        assert_eq!(store.get_run(&running.id).await.unwrap().status, RunStatus::Failed);
        assert_eq!(store.get_run(&succeeded.id).await.unwrap().status, RunStatus::Succeeded);

        // idempotent: second pass changes nothing
        let failed_again = store.bulk_fail_in_flight(now + chrono::Duration::seconds(40)).await;
        assert!(failed_again.is_empty());
    }

    #[tokio::test]
    async fn delete_target_cascades_to_schedules_runs_attempts() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(schedule(t.id, now)).await.unwrap();
        let r = store.create_run(run(s.id, t.id, now)).await.unwrap();
        let attempt = Attempt {
            id: Uuid::new_v4(),
            run_id: r.id,
            attempt_number: 1,
            request_url: t.url.clone(),
            request_method: "POST".into(),
            request_headers: HashMap::new(),
            request_body: None,
            response_status: Some(200),
            response_headers: HashMap::new(),
            response_body: None,
            error_class: sched_domain::ErrorClass::None,
            error_message: None,
            duration_ms: 1,
            started_at: now,
            completed_at: now,
        };
        store.append_attempt(attempt).await.unwrap();

        let summary = store.delete_target_cascade(&t.id).await.unwrap();
        assert_eq!(summary.schedules_removed, 1);
        assert_eq!(summary.runs_removed, 1);
        assert_eq!(summary.attempts_removed, 1);

        assert!(store.get_target(&t.id).await.is_none());
        assert!(store.get_schedule(&s.id).await.is_none());
        assert!(store.get_run(&r.id).await.is_none());
        assert!(store.list_attempts_for_run(&r.id).await.is_empty());
    }

    #[tokio::test]
    async fn list_active_schedules_filters_by_status() {
        let store = Store::new(tempdir());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t = store.create_target(target(now)).await.unwrap();
        let active = store.create_schedule(schedule(t.id, now)).await.unwrap();
        let mut paused_sched = schedule(t.id, now);
        paused_sched.status = ScheduleStatus::Paused;
        store.create_schedule(paused_sched).await.unwrap();

        let actives = store.list_active_schedules().await;
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].id, active.id);
    }
}

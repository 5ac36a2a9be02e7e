//! Scheduler — owns the in-memory set of armed timers keyed by schedule id,
//! drives firings, enforces single-inflight-per-schedule, creates Run
//! records, and hands them to the Executor.
//!
//! Each armed schedule owns a `tokio::time::sleep_until` task that wakes
//! exactly at its computed `fire_at`, so firings happen at the right
//! wall-clock moment rather than on a polling cadence. Lifecycle events
//! (create/update/pause/resume/delete, target deletion) arrive as commands
//! over an mpsc channel into a single worker task, so the timer map is
//! mutated from exactly one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sched_domain::{idempotency_key, Clock, Run, RunStatus, ScheduleStatus};
use sched_executor::Executor;
use sched_store::{Store, StoreError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use uuid::Uuid;

#[derive(Debug)]
enum Command {
    Created(Uuid),
    Updated(Uuid),
    Paused(Uuid),
    Resumed(Uuid),
    Deleted(Uuid),
    TargetDeleted(Uuid),
}

struct Envelope {
    cmd: Command,
    ack: oneshot::Sender<()>,
}

enum Event {
    Cmd(Envelope),
    /// A per-schedule timer woke up. `fire_at` is the instant it was armed
    /// for, carried along so the worker can use it (rather than wall-clock
    /// `now`) as the idempotency key and the rearm reference — this keeps
    /// interval schedules locked to their original cadence instead of
    /// drifting by however long the wakeup took, as long as `fire_at` is
    /// still in the future. `arm_from` itself skips past any boundaries
    /// that have already elapsed, so a pile-up of missed firings coalesces
    /// onto a single still-future timer instead of cascading.
    Fire { schedule_id: Uuid, fire_at: DateTime<Utc> },
}

/// Handle to the running scheduler. Cheap to clone; every clone shares the
/// same worker task and timer map.
#[derive(Clone)]
pub struct Scheduler {
    event_tx: mpsc::Sender<Event>,
}

impl Scheduler {
    /// Spawn the scheduler's worker task and return a handle to it.
    pub fn spawn(
        store: Arc<Store>,
        executor: Arc<Executor>,
        clock: Arc<dyn Clock>,
        tz: chrono_tz::Tz,
        misfire_grace: chrono::Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        let worker = Worker {
            store,
            executor,
            clock,
            tz,
            misfire_grace,
            timers: HashMap::new(),
            event_tx: tx.clone(),
        };
        tokio::spawn(worker.run(rx));
        Self { event_tx: tx }
    }

    async fn send(&self, cmd: Command) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.event_tx.send(Event::Cmd(Envelope { cmd, ack: ack_tx })).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Arm `schedule_id` if its persisted status is `active` and its
    /// window is still open. Called once after the Store row exists.
    pub async fn on_schedule_created(&self, schedule_id: Uuid) {
        self.send(Command::Created(schedule_id)).await;
    }

    /// Disarm then rearm from the schedule's (already-updated) persisted
    /// fields. An in-flight Run dispatched under the old settings
    /// continues to completion; only the next arming sees the new fields.
    pub async fn on_schedule_updated(&self, schedule_id: Uuid) {
        self.send(Command::Updated(schedule_id)).await;
    }

    /// Transition to `paused` and disarm. Does not cancel an in-flight Run.
    pub async fn on_schedule_paused(&self, schedule_id: Uuid) {
        self.send(Command::Paused(schedule_id)).await;
    }

    /// Transition back to `active` and rearm from `now`.
    pub async fn on_schedule_resumed(&self, schedule_id: Uuid) {
        self.send(Command::Resumed(schedule_id)).await;
    }

    /// Disarm and drop the timer-map entry. The caller deletes the Store
    /// row only after this returns.
    pub async fn on_schedule_deleted(&self, schedule_id: Uuid) {
        self.send(Command::Deleted(schedule_id)).await;
    }

    /// Disarm every schedule referencing `target_id`. The caller performs
    /// the cascading Store delete only after this returns: timers must be
    /// disarmed *before* the row disappears.
    pub async fn on_target_deleted(&self, target_id: Uuid) {
        self.send(Command::TargetDeleted(target_id)).await;
    }
}

struct Worker {
    store: Arc<Store>,
    executor: Arc<Executor>,
    clock: Arc<dyn Clock>,
    tz: chrono_tz::Tz,
    misfire_grace: chrono::Duration,
    timers: HashMap<Uuid, AbortHandle>,
    event_tx: mpsc::Sender<Event>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Cmd(envelope) => {
                    self.handle_command(envelope.cmd).await;
                    let _ = envelope.ack.send(());
                }
                Event::Fire { schedule_id, fire_at } => {
                    self.handle_fire(schedule_id, fire_at).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Created(id) => self.arm_from(id, self.clock.now()).await,
            Command::Updated(id) => {
                self.disarm(id);
                self.arm_from(id, self.clock.now()).await;
            }
            Command::Paused(id) => {
                self.disarm(id);
                self.store.update_schedule(&id, |s| s.status = ScheduleStatus::Paused).await;
            }
            Command::Resumed(id) => {
                self.store.update_schedule(&id, |s| s.status = ScheduleStatus::Active).await;
                self.arm_from(id, self.clock.now()).await;
            }
            Command::Deleted(id) => self.disarm(id),
            Command::TargetDeleted(target_id) => {
                let schedules = self.store.list_schedules().await;
                for schedule in schedules.into_iter().filter(|s| s.target_id == target_id) {
                    self.disarm(schedule.id);
                }
            }
        }
    }

    /// Compute the next firing instant relative to `reference` and install
    /// a timer for it, or mark the schedule `completed` if the window has
    /// closed. `reference` is `now()` for a fresh arm/resume/update, or the
    /// instant just fired for a rearm after a firing — using the latter
    /// keeps interval schedules locked to their original cadence.
    ///
    /// Any boundaries the computed `fire_at` would land on that are already
    /// `<= now()` are skipped rather than armed: a timer for an elapsed
    /// instant would only fire immediately and mint a duplicate Run for a
    /// firing nobody missed the coalescing of. This is what collapses a
    /// pile-up of missed firings (several boundaries between the original
    /// `reference` and `now()`) onto a single still-future timer instead of
    /// cascading one Run per boundary.
    async fn arm_from(&mut self, schedule_id: Uuid, reference: DateTime<Utc>) {
        let Some(schedule) = self.store.get_schedule(&schedule_id).await else {
            return;
        };
        if schedule.status != ScheduleStatus::Active {
            return;
        }

        let now = self.clock.now();
        let mut reference = reference;
        loop {
            match sched_trigger::next_fire(&schedule, Some(reference), self.tz) {
                Some(fire_at) if fire_at <= now => {
                    reference = fire_at;
                }
                Some(fire_at) => {
                    self.store.update_schedule(&schedule_id, |s| s.next_run_at = Some(fire_at)).await;
                    self.install_timer(schedule_id, fire_at);
                    return;
                }
                None => {
                    self.store
                        .update_schedule(&schedule_id, |s| {
                            s.status = ScheduleStatus::Completed;
                            s.next_run_at = None;
                        })
                        .await;
                    return;
                }
            }
        }
    }

    fn install_timer(&mut self, schedule_id: Uuid, fire_at: DateTime<Utc>) {
        let delay: StdDuration = (fire_at - self.clock.now()).to_std().unwrap_or(StdDuration::ZERO);
        let deadline = tokio::time::Instant::now() + delay;
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(Event::Fire { schedule_id, fire_at }).await;
        });
        self.timers.insert(schedule_id, handle.abort_handle());
    }

    fn disarm(&mut self, schedule_id: Uuid) {
        if let Some(handle) = self.timers.remove(&schedule_id) {
            handle.abort();
        }
    }

    /// Handle a single firing: window gate, idempotent run creation,
    async fn handle_fire(&mut self, schedule_id: Uuid, fire_at: DateTime<Utc>) {
        self.timers.remove(&schedule_id);

        let now = self.clock.now();
        if now - fire_at > self.misfire_grace {
            tracing::warn!(
                schedule_id = %schedule_id,
                drift_secs = (now - fire_at).num_seconds(),
                grace_secs = self.misfire_grace.num_seconds(),
                "firing missed past misfire grace, dropping and rearming"
            );
            self.arm_from(schedule_id, now).await;
            return;
        }

        let Some(schedule) = self.store.get_schedule(&schedule_id).await else {
            return;
        };
        if schedule.status != ScheduleStatus::Active {
            // Paused or deleted between arming and firing — nothing to do.
            return;
        }

        // Step 1: window gate.
        if schedule.window_closed(fire_at) {
            self.store.update_schedule(&schedule_id, |s| s.status = ScheduleStatus::Completed).await;
            return;
        }

        // Step 2: idempotent Run creation.
        let run = Run {
            id: Uuid::new_v4(),
            schedule_id,
            target_id: schedule.target_id,
            scheduled_at: fire_at,
            started_at: None,
            completed_at: None,
            status: RunStatus::Pending,
            idempotency_key: idempotency_key(&schedule_id, fire_at),
            attempt_count: 0,
            final_error: None,
        };

        let created = match self.store.create_run(run).await {
            Ok(run) => {
                self.store.update_schedule(&schedule_id, |s| s.runs_count += 1).await;
                Some(run)
            }
            Err(StoreError::DuplicateKey(_)) => {
                tracing::debug!(schedule_id = %schedule_id, %fire_at, "duplicate firing, already handled");
                None
            }
            Err(e) => {
                tracing::error!(schedule_id = %schedule_id, error = %e, "failed to create run");
                None
            }
        };

        // Step 3: concurrency gate — at most one pending/running Run per
        // schedule. The Run row from step 2 always exists as evidence of
        // the firing even when we don't dispatch it.
        if let Some(run) = created {
            let inflight = self.store.count_inflight_for_schedule(&schedule_id).await;
            if inflight <= 1 {
                if let Some(target) = self.store.get_target(&schedule.target_id).await {
                    let executor = self.executor.clone();
                    tokio::spawn(async move { executor.execute_run(run, target).await });
                } else {
                    tracing::error!(schedule_id = %schedule_id, target_id = %schedule.target_id, "target missing for armed schedule");
                }
            } else {
                tracing::warn!(schedule_id = %schedule_id, run_id = %run.id, "schedule already has an in-flight run, skipping dispatch");
            }
        }

        // Step 4/5: rearm from the instant we just fired, or complete.
        self.arm_from(schedule_id, fire_at).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_domain::{Config, FixedClock, HttpMethod, Schedule, ScheduleType, Target};
    use sched_executor::ExecutorConfig;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn tempdir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sched-scheduler-test-{}", Uuid::new_v4()))
    }

    fn target(now: DateTime<Utc>) -> Target {
        Target {
            id: Uuid::new_v4(),
            name: "t".into(),
            url: "http://127.0.0.1:1".into(), // refused instantly, doesn't matter for these tests
            method: HttpMethod::Post,
            headers: Map::new(),
            body_template: None,
            timeout_seconds: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn interval_schedule(target_id: Uuid, start_at: DateTime<Utc>, interval_seconds: u32) -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            name: "s".into(),
            target_id,
            schedule_type: ScheduleType::Interval,
            interval_seconds: Some(interval_seconds),
            cron_expression: None,
            start_at,
            duration_seconds: None,
            max_runs: None,
            status: sched_domain::ScheduleStatus::Active,
            runs_count: 0,
            next_run_at: None,
            consecutive_failures: 0,
            last_error: None,
            last_error_at: None,
            created_at: start_at,
            updated_at: start_at,
        }
    }

    async fn test_worker(store: Arc<Store>, clock: Arc<FixedClock>) -> (Worker, mpsc::Sender<Event>) {
        let config = ExecutorConfig {
            max_retries: 0,
            retry_base_delay: Duration::from_millis(1),
            max_concurrent_jobs: 10,
        };
        let executor = Arc::new(Executor::new(store.clone(), clock.clone(), config));
        let (tx, _rx) = mpsc::channel(64);
        (
            Worker {
                store,
                executor,
                clock: clock.clone(),
                tz: chrono_tz::UTC,
                misfire_grace: chrono::Duration::seconds(60),
                timers: HashMap::new(),
                event_tx: tx.clone(),
            },
            tx,
        )
    }

    #[tokio::test]
    async fn handle_fire_creates_run_and_rearms() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now, 10)).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.handle_fire(s.id, now).await;

        let runs = store.list_runs_for_schedule(&s.id).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].scheduled_at, now);

        // Rearm happened: a timer task now owns the entry.
        assert!(worker.timers.contains_key(&s.id));

        let updated = store.get_schedule(&s.id).await.unwrap();
        assert_eq!(updated.runs_count, 1);
        assert_eq!(updated.next_run_at, Some(now + chrono::Duration::seconds(10)));
    }

    #[tokio::test]
    async fn handle_fire_twice_same_instant_is_idempotent() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now, 10)).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.handle_fire(s.id, now).await;
        worker.handle_fire(s.id, now).await;

        let runs = store.list_runs_for_schedule(&s.id).await;
        assert_eq!(runs.len(), 1, "duplicate firing at the same instant must not create a second run");
    }

    #[tokio::test]
    async fn handle_fire_respects_max_runs_window() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let mut schedule = interval_schedule(t.id, now, 10);
        schedule.max_runs = Some(1);
        let s = store.create_schedule(schedule).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.handle_fire(s.id, now).await;

        let updated = store.get_schedule(&s.id).await.unwrap();
        assert_eq!(updated.status, ScheduleStatus::Completed, "schedule completes once max_runs is reached");
        assert!(!worker.timers.contains_key(&s.id), "a completed schedule must not be rearmed");
    }

    #[tokio::test]
    async fn handle_fire_past_misfire_grace_is_dropped() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now - chrono::Duration::seconds(120), 10)).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.misfire_grace = chrono::Duration::seconds(60);
        // fire_at is 100 seconds in the past relative to `now` — past the 60s grace.
        let fire_at = now - chrono::Duration::seconds(100);
        worker.handle_fire(s.id, fire_at).await;

        let runs = store.list_runs_for_schedule(&s.id).await;
        assert!(runs.is_empty(), "firing past the misfire grace window must be dropped, not run");
        // Still rearmed for the future.
        assert!(worker.timers.contains_key(&s.id));
    }

    #[tokio::test]
    async fn handle_fire_within_misfire_grace_still_fires() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now - chrono::Duration::seconds(30), 10)).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.misfire_grace = chrono::Duration::seconds(60);
        let fire_at = now - chrono::Duration::seconds(30);
        worker.handle_fire(s.id, fire_at).await;

        let runs = store.list_runs_for_schedule(&s.id).await;
        assert_eq!(runs.len(), 1, "a firing within grace should still fire, coalesced to one run");
    }

    #[tokio::test]
    async fn piled_up_misfires_within_grace_coalesce_to_one_run() {
        // Schedule armed for `t`, 10s interval, but the worker only gets to
        // handle the firing at `t+25` — two further boundaries (`t+10`,
        // `t+20`) have already elapsed by then. All three must coalesce
        // into the one Run for `t`, with the rearm skipping straight to the
        // first boundary still in the future.
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let start_at = now - chrono::Duration::seconds(25);
        let s = store.create_schedule(interval_schedule(t.id, start_at, 10)).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.misfire_grace = chrono::Duration::seconds(60);
        worker.handle_fire(s.id, start_at).await;

        let runs = store.list_runs_for_schedule(&s.id).await;
        assert_eq!(runs.len(), 1, "a pile-up of missed firings must coalesce to a single run");
        assert_eq!(runs[0].scheduled_at, start_at);

        let updated = store.get_schedule(&s.id).await.unwrap();
        assert_eq!(
            updated.next_run_at,
            Some(start_at + chrono::Duration::seconds(30)),
            "rearm must skip past every elapsed boundary (t+10, t+20) to the next one still in the future"
        );
        assert!(worker.timers.contains_key(&s.id));
    }

    #[tokio::test]
    async fn paused_schedule_is_not_fired() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let mut schedule = interval_schedule(t.id, now, 10);
        schedule.status = sched_domain::ScheduleStatus::Paused;
        let s = store.create_schedule(schedule).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.handle_fire(s.id, now).await;

        assert!(store.list_runs_for_schedule(&s.id).await.is_empty());
        assert!(!worker.timers.contains_key(&s.id));
    }

    #[tokio::test]
    async fn concurrency_gate_skips_dispatch_when_already_inflight() {
        let now = Utc::now();
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now, 10)).await.unwrap();

        // Seed an in-flight run for this schedule directly.
        let inflight_run = Run {
            id: Uuid::new_v4(),
            schedule_id: s.id,
            target_id: t.id,
            scheduled_at: now - chrono::Duration::seconds(5),
            started_at: Some(now),
            completed_at: None,
            status: RunStatus::Running,
            idempotency_key: idempotency_key(&s.id, now - chrono::Duration::seconds(5)),
            attempt_count: 1,
            final_error: None,
        };
        store.create_run(inflight_run).await.unwrap();

        let (mut worker, _tx) = test_worker(store.clone(), clock.clone()).await;
        worker.handle_fire(s.id, now).await;

        // The new firing still recorded a Run row (evidence), count is 2.
        let runs = store.list_runs_for_schedule(&s.id).await;
        assert_eq!(runs.len(), 2, "the firing's Run row is created even when dispatch is skipped");
        // The newly created run stays pending — it was never handed to the executor.
        let new_run = runs.iter().find(|r| r.scheduled_at == now).unwrap();
        assert_eq!(new_run.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn scheduler_end_to_end_fires_via_real_timer() {
        let now = Utc::now();
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now, 1)).await.unwrap();

        let config = Config::default();
        let executor = Arc::new(Executor::new(
            store.clone(),
            Arc::new(sched_domain::SystemClock),
            ExecutorConfig::from(&config),
        ));
        let scheduler = Scheduler::spawn(
            store.clone(),
            executor,
            Arc::new(sched_domain::SystemClock),
            chrono_tz::UTC,
            chrono::Duration::seconds(60),
        );

        scheduler.on_schedule_created(s.id).await;
        // First fire is at start_at itself (immediate); give the timer task
        // a moment to run.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let runs = store.list_runs_for_schedule(&s.id).await;
        assert_eq!(runs.len(), 1, "interval schedule fires immediately at start_at");
    }

    #[tokio::test]
    async fn scheduler_pause_disarms_and_resume_rearms() {
        let now = Utc::now();
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now + chrono::Duration::seconds(3600), 10)).await.unwrap();

        let config = Config::default();
        let executor = Arc::new(Executor::new(
            store.clone(),
            Arc::new(sched_domain::SystemClock),
            ExecutorConfig::from(&config),
        ));
        let scheduler = Scheduler::spawn(
            store.clone(),
            executor,
            Arc::new(sched_domain::SystemClock),
            chrono_tz::UTC,
            chrono::Duration::seconds(60),
        );

        scheduler.on_schedule_created(s.id).await;
        scheduler.on_schedule_paused(s.id).await;
        assert_eq!(store.get_schedule(&s.id).await.unwrap().status, ScheduleStatus::Paused);

        scheduler.on_schedule_resumed(s.id).await;
        assert_eq!(store.get_schedule(&s.id).await.unwrap().status, ScheduleStatus::Active);
    }

    #[tokio::test]
    async fn scheduler_target_deleted_disarms_referencing_schedules() {
        let now = Utc::now();
        let store = Arc::new(Store::new(tempdir()));
        let t = store.create_target(target(now)).await.unwrap();
        let s = store.create_schedule(interval_schedule(t.id, now + chrono::Duration::seconds(3600), 10)).await.unwrap();

        let config = Config::default();
        let executor = Arc::new(Executor::new(
            store.clone(),
            Arc::new(sched_domain::SystemClock),
            ExecutorConfig::from(&config),
        ));
        let scheduler = Scheduler::spawn(
            store.clone(),
            executor,
            Arc::new(sched_domain::SystemClock),
            chrono_tz::UTC,
            chrono::Duration::seconds(60),
        );

        scheduler.on_schedule_created(s.id).await;
        // Disarming is synchronous w.r.t. this call returning.
        scheduler.on_target_deleted(t.id).await;
        // No assertion on internal timers map from outside; this at least
        // verifies the call completes without the schedule's target still
        // existing causing a panic during any pending fire.
        store.delete_target_cascade(&t.id).await.unwrap();
        assert!(store.get_schedule(&s.id).await.is_none());
    }
}

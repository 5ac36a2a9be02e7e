//! Executor — takes a fired Run and its Target, performs the outbound HTTP
//! call with bounded retries and exponential backoff, classifies every
//! outcome, truncates oversized response bodies, and persists the full
//! Attempt trail. Never propagates a target-side failure to its caller;
//! every terminal condition is expressed as persisted Run/Attempt state.
//!
//! Global concurrency is bounded by a `tokio::sync::Semaphore` sized to
//! `MAX_CONCURRENT_JOBS`, a single process-wide cap shared by every
//! in-flight Run.

pub mod classify;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sched_domain::{truncate_body, Attempt, Clock, ErrorClass, HttpMethod, Run, RunStatus, Target};
use sched_store::Store;
use uuid::Uuid;

/// Tunables the Executor needs from `sched_domain::Config`, narrowed to
/// just what this crate consumes so tests don't need a whole `Config`.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Additional attempts after the first try (`MAX_RETRIES`; total
    /// tries = `max_retries + 1`).
    pub max_retries: u32,
    /// Base delay for `base_delay * 2^(attempt_number-1)` backoff sleeps.
    pub retry_base_delay: Duration,
    pub max_concurrent_jobs: usize,
}

impl From<&sched_domain::Config> for ExecutorConfig {
    fn from(c: &sched_domain::Config) -> Self {
        Self {
            max_retries: c.max_retries,
            retry_base_delay: Duration::from_secs(c.retry_delay_seconds),
            max_concurrent_jobs: c.max_concurrent_jobs,
        }
    }
}

pub struct Executor {
    client: reqwest::Client,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
    permits: Arc<tokio::sync::Semaphore>,
}

impl Executor {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, config: ExecutorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            permits: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_jobs.max(1))),
            store,
            clock,
            config,
        }
    }

    /// Run one Run to completion: mark it `running`, attempt the HTTP call
    /// up to `max_retries + 1` times with exponential backoff between
    /// retriable failures, and persist the terminal Run status.
    ///
    /// Acquires a global concurrency permit for its whole lifetime — a
    /// worker occupies a slot for the duration of its retries and backoff
    /// sleeps, since the sleeps are not cancellable and contribute to
    /// worker occupancy.
    pub async fn execute_run(&self, run: Run, target: Target) {
        let _permit = self.permits.clone().acquire_owned().await.expect("semaphore never closes");

        let started_at = self.clock.now();
        if let Err(e) = self
            .store
            .update_run_status(&run.id, RunStatus::Running, Some(started_at), None, None)
            .await
        {
            tracing::error!(run_id = %run.id, error = %e, "failed to mark run running");
            return;
        }

        let total_tries = self.config.max_retries + 1;
        let mut last_error: Option<String> = None;
        let mut terminal_status = RunStatus::Failed;

        for attempt_number in 1..=total_tries {
            let (error_class, error_message, response_status, response_headers, response_body) =
                self.try_once(&run, &target, attempt_number).await;

            if let Some(msg) = &error_message {
                last_error = Some(msg.clone());
            } else {
                last_error = None;
            }

            if error_class.is_terminal_success() {
                terminal_status = RunStatus::Succeeded;
                let _ = response_status;
                let _ = response_headers;
                let _ = response_body;
                break;
            }

            let retriable = error_class.is_retriable();
            let retries_remain = attempt_number < total_tries;
            if !retriable || !retries_remain {
                terminal_status = RunStatus::Failed;
                break;
            }

            let delay = self.config.retry_base_delay * 2u32.pow(attempt_number - 1);
            tracing::debug!(run_id = %run.id, attempt_number, delay_ms = delay.as_millis() as u64, "retrying after backoff");
            tokio::time::sleep(delay).await;
        }

        let completed_at = self.clock.now();
        if let Err(e) = self
            .store
            .update_run_status(&run.id, terminal_status, None, Some(completed_at), last_error.clone())
            .await
        {
            tracing::error!(run_id = %run.id, error = %e, "failed to finalize run status");
        }

        self.record_schedule_outcome(run.schedule_id, terminal_status, last_error, completed_at).await;
    }

    /// Update the owning Schedule's consecutive-failure streak after a Run
    /// reaches a terminal status — read-only observability fields, not part
    /// of the pause/resume/window state machine.
    async fn record_schedule_outcome(
        &self,
        schedule_id: Uuid,
        status: RunStatus,
        error: Option<String>,
        at: chrono::DateTime<Utc>,
    ) {
        self.store
            .update_schedule(&schedule_id, |s| match status {
                RunStatus::Succeeded => {
                    s.consecutive_failures = 0;
                }
                RunStatus::Failed => {
                    s.consecutive_failures += 1;
                    s.last_error = error;
                    s.last_error_at = Some(at);
                }
                RunStatus::Pending | RunStatus::Running => {}
            })
            .await;
    }

    /// Perform exactly one HTTP attempt, persist its Attempt record, and
    /// return the classification the retry loop needs.
    async fn try_once(
        &self,
        run: &Run,
        target: &Target,
        attempt_number: u32,
    ) -> (ErrorClass, Option<String>, Option<u16>, HashMap<String, String>, Option<String>) {
        let started_at = self.clock.now();
        let method = to_reqwest_method(target.method);
        let mut builder = self
            .client
            .request(method, &target.url)
            .timeout(Duration::from_secs(target.timeout_seconds as u64));
        for (name, value) in &target.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &target.body_template {
            builder = builder.body(body.clone());
        }

        let outcome = builder.send().await;
        let completed_at = self.clock.now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        let (error_class, error_message, response_status, response_headers, response_body) = match outcome {
            Ok(response) => {
                let status = response.status();
                let class = classify::classify_status(status);
                let headers: HashMap<String, String> = response
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                    .collect();
                let body_text = response.text().await.unwrap_or_default();
                let truncated = truncate_body(&body_text);
                let message = if class.is_terminal_success() {
                    None
                } else {
                    Some(format!("HTTP {}", status.as_u16()))
                };
                (class, message, Some(status.as_u16()), headers, Some(truncated))
            }
            Err(e) => {
                let (class, message) = classify::classify_transport_error(&e);
                (class, Some(message), None, HashMap::new(), None)
            }
        };

        let attempt = Attempt {
            id: Uuid::new_v4(),
            run_id: run.id,
            attempt_number,
            request_url: target.url.clone(),
            request_method: target.method.as_str().to_string(),
            request_headers: target.headers.clone(),
            request_body: target.body_template.clone(),
            response_status,
            response_headers: response_headers.clone(),
            response_body: response_body.clone(),
            error_class,
            error_message: error_message.clone(),
            duration_ms,
            started_at,
            completed_at,
        };

        if let Err(e) = self.store.append_attempt(attempt).await {
            tracing::error!(run_id = %run.id, attempt_number, error = %e, "failed to persist attempt");
        }

        (error_class, error_message, response_status, response_headers, response_body)
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

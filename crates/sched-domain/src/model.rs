//! Core data model — Target, Schedule, Run, Attempt.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Target
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// A declared outbound HTTP endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body_template: Option<String>,
    pub timeout_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedule
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Completed,
}

/// Timing rule, tagged by `schedule_type`. Exactly one of `interval_seconds`
/// / `cron_expression` is set, matching the tag — enforced at construction
/// time by `sched_trigger::validate_schedule_fields`, not by the type
/// itself, so the persisted shape stays a flat struct (serde-friendly,
/// matches how the rest of the record is stored).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Interval,
    Cron,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub target_id: Uuid,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub interval_seconds: Option<u32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub max_runs: Option<u64>,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub runs_count: u64,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    /// Consecutive failed Runs since the last success; reset to 0 on any
    /// success. Read-only observability surface, not part of the
    /// pause/resume/window state machine.
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Has the bounded-duration window elapsed as of `now`?
    pub fn duration_expired(&self, now: DateTime<Utc>) -> bool {
        match self.duration_seconds {
            Some(secs) => now >= self.start_at + chrono::Duration::seconds(secs as i64),
            None => false,
        }
    }

    /// Has the bounded-count window been exhausted?
    pub fn max_runs_reached(&self) -> bool {
        match self.max_runs {
            Some(n) => self.runs_count >= n,
            None => false,
        }
    }

    pub fn window_closed(&self, now: DateTime<Utc>) -> bool {
        self.duration_expired(now) || self.max_runs_reached()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub target_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub idempotency_key: String,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub final_error: Option<String>,
}

/// Build the idempotency key for a (schedule, firing instant) pair. Floors
/// to the second before formatting, so the key stays stable no matter how
/// many times the same nominal firing is recomputed.
pub fn idempotency_key(schedule_id: &Uuid, scheduled_at: DateTime<Utc>) -> String {
    format!("{}:{}", schedule_id, scheduled_at.timestamp())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attempt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    None,
    Timeout,
    Dns,
    Connection,
    Ssl,
    Http4xx,
    Http5xx,
    Unknown,
}

impl ErrorClass {
    /// Whether an attempt classified this way should be retried (subject
    /// to the retry budget still being available).
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ErrorClass::Http4xx | ErrorClass::None)
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, ErrorClass::None)
    }
}

pub const TRUNCATED_SUFFIX: &str = "…[truncated]";
pub const MAX_RESPONSE_BODY_BYTES: usize = 100 * 1024;

/// Truncate a response body to at most `MAX_RESPONSE_BODY_BYTES`, appending
/// the truncation sentinel when truncation occurred. Truncates on a char
/// boundary so the sentinel never gets appended mid-UTF-8-sequence.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_RESPONSE_BODY_BYTES {
        return body.to_string();
    }
    let budget = MAX_RESPONSE_BODY_BYTES - TRUNCATED_SUFFIX.len();
    let mut end = budget;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &body[..end], TRUNCATED_SUFFIX)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub run_id: Uuid,
    pub attempt_number: u32,
    pub request_url: String,
    pub request_method: String,
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_status: Option<u16>,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default)]
    pub response_body: Option<String>,
    pub error_class: ErrorClass,
    #[serde(default)]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

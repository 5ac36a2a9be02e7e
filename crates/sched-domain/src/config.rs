//! Typed configuration, loaded from TOML with env-var overrides.
//! Defaults live on the struct; `validate()` reports problems without
//! panicking so the caller can log warnings and fail fast only on errors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "d_database_url")]
    pub database_url: String,
    #[serde(default = "d_default_timeout_seconds")]
    pub default_timeout_seconds: u32,
    #[serde(default = "d_max_timeout_seconds")]
    pub max_timeout_seconds: u32,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "d_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "d_misfire_grace_seconds")]
    pub job_misfire_grace_seconds: i64,
    #[serde(default = "d_timezone")]
    pub timezone: String,
    #[serde(default = "d_listen_addr")]
    pub listen_addr: String,
}

fn d_database_url() -> String {
    "memory://sched".to_string()
}
fn d_default_timeout_seconds() -> u32 {
    30
}
fn d_max_timeout_seconds() -> u32 {
    300
}
fn d_max_retries() -> u32 {
    3
}
fn d_retry_delay_seconds() -> u64 {
    1
}
fn d_max_concurrent_jobs() -> usize {
    100
}
fn d_misfire_grace_seconds() -> i64 {
    60
}
fn d_timezone() -> String {
    "Asia/Kolkata".to_string()
}
fn d_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: d_database_url(),
            default_timeout_seconds: d_default_timeout_seconds(),
            max_timeout_seconds: d_max_timeout_seconds(),
            max_retries: d_max_retries(),
            retry_delay_seconds: d_retry_delay_seconds(),
            max_concurrent_jobs: d_max_concurrent_jobs(),
            job_misfire_grace_seconds: d_misfire_grace_seconds(),
            timezone: d_timezone(),
            listen_addr: d_listen_addr(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Load from a TOML file, then apply env-var overrides. Missing file
    /// is not an error — defaults apply when no `config.toml` is present.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let mut config: Config = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| crate::error::Error::Config(format!("parsing {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(crate::error::Error::Io(e)),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = env_parsed("DEFAULT_TIMEOUT_SECONDS") {
            self.default_timeout_seconds = v;
        }
        if let Some(v) = env_parsed("MAX_TIMEOUT_SECONDS") {
            self.max_timeout_seconds = v;
        }
        if let Some(v) = env_parsed("MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parsed("RETRY_DELAY_SECONDS") {
            self.retry_delay_seconds = v;
        }
        if let Some(v) = env_parsed("MAX_CONCURRENT_JOBS") {
            self.max_concurrent_jobs = v;
        }
        if let Some(v) = env_parsed("JOB_MISFIRE_GRACE_SECONDS") {
            self.job_misfire_grace_seconds = v;
        }
        if let Ok(v) = std::env::var("TIMEZONE") {
            self.timezone = v;
        }
    }

    /// Validate cross-field invariants. Never panics; the caller decides
    /// whether to continue past warnings.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.default_timeout_seconds == 0 || self.default_timeout_seconds > self.max_timeout_seconds {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!(
                    "default_timeout_seconds ({}) must be in 1..={}",
                    self.default_timeout_seconds, self.max_timeout_seconds
                ),
            });
        }
        if self.max_concurrent_jobs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "max_concurrent_jobs must be at least 1".into(),
            });
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!("timezone '{}' is not a recognized IANA zone", self.timezone),
            });
        }
        if self.job_misfire_grace_seconds < 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "job_misfire_grace_seconds is negative; treating as 0".into(),
            });
        }
        issues
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

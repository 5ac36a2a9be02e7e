mod api;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sched_domain::config::ConfigSeverity;
use sched_domain::{Config, SystemClock};
use sched_executor::{Executor, ExecutorConfig};
use sched_scheduler::Scheduler;
use sched_store::Store;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var("SCHED_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(Path::new(&config_path)).context("loading configuration")?;
    run_server(Arc::new(config)).await
}

/// Initialize structured JSON tracing.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sched_service=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("scheduling engine starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let tz: chrono_tz::Tz = config
        .timezone
        .parse()
        .unwrap_or(chrono_tz::Asia::Kolkata);

    // ── Store ────────────────────────────────────────────────────────
    let store = Arc::new(Store::new(store_dir(&config.database_url)));
    tracing::info!(database_url = %config.database_url, "store ready");

    // ── Clock ────────────────────────────────────────────────────────
    let clock: Arc<dyn sched_domain::Clock> = Arc::new(SystemClock);

    // ── Executor ─────────────────────────────────────────────────────
    let executor = Arc::new(Executor::new(store.clone(), clock.clone(), ExecutorConfig::from(&*config)));
    tracing::info!(
        max_retries = config.max_retries,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "executor ready"
    );

    // ── Scheduler ────────────────────────────────────────────────────
    let misfire_grace = chrono::Duration::seconds(config.job_misfire_grace_seconds.max(0));
    let scheduler = Scheduler::spawn(store.clone(), executor.clone(), clock.clone(), tz, misfire_grace);
    tracing::info!(timezone = %config.timezone, "scheduler ready");

    // ── Recovery — runs before the API layer begins serving ──────────
    let report = sched_recovery::recover(&store, &scheduler, &clock).await;
    tracing::info!(
        orphaned_runs = report.orphaned_runs.len(),
        rearmed_schedules = report.rearmed_schedules.len(),
        completed_schedules = report.completed_schedules.len(),
        "recovery complete, serving traffic"
    );

    let state = AppState {
        config: config.clone(),
        store,
        scheduler,
        tz,
    };

    let app = api::router().with_state(state).layer(TraceLayer::new_for_http());

    // ── Bind ─────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding to {}", config.listen_addr))?;

    tracing::info!(addr = %config.listen_addr, "scheduling engine listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Resolve the on-disk directory backing the store from `database_url`.
/// A `memory://<name>` URL (the default) maps to a working-directory-local
/// `data/<name>` folder; any other value is treated as a filesystem path.
fn store_dir(database_url: &str) -> PathBuf {
    match database_url.strip_prefix("memory://") {
        Some(name) => PathBuf::from("data").join(name),
        None => PathBuf::from(database_url),
    }
}

use std::sync::Arc;

use sched_domain::Config;
use sched_scheduler::Scheduler;
use sched_store::Store;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub scheduler: Scheduler,
    pub tz: chrono_tz::Tz,
}

use std::sync::Arc;

use anyhow::{Context, Result};
use renew_core::cfg::Config;
use renew_core::store::DefaultKv;
use renew_core::task::TaskReport;

/// Execute one renewal run off the async runtime.
///
/// The run sleeps between licensing calls, so it gets a blocking thread.
pub async fn execute(cfg: Arc<Config>, kv: DefaultKv) -> Result<TaskReport> {
    tokio::task::spawn_blocking(move || run_blocking(&cfg, kv))
        .await
        .context("renewal task panicked")?
}

#[cfg(feature = "runner-http")]
fn run_blocking(cfg: &Config, kv: DefaultKv) -> Result<TaskReport> {
    use renew_core::{job, store::KvKeyStore, task};

    let mut orch = task::http_orchestrator(cfg)?;
    let store = KvKeyStore::new(kv);
    let params = job::split_task_data(&cfg.task_data);
    Ok(task::run_task(&mut orch, &store, params.as_deref(), cfg.max_retries))
}

#[cfg(not(feature = "runner-http"))]
fn run_blocking(_cfg: &Config, _kv: DefaultKv) -> Result<TaskReport> {
    anyhow::bail!("licensing client not built in; enable the runner-http feature")
}

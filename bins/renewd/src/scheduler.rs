use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveDateTime};
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{info, warn};

use renew_core::job::TaskState;
use renew_core::store::{Kv, KvSerde, ns};
use renew_core::task::TaskReport;
use crate::module::{Module, ModuleCtx};
use crate::runner::execute;

/// KV key holding the renewal task's [`TaskState`].
pub fn state_key() -> Vec<u8> {
    ns("task", "renewal")
}

/// Runs the renewal task whenever its next-run time has passed.
///
/// Only one run is ever in flight; a tick that finds a run still going is skipped.
pub struct Scheduler {
    tick_ms: u64,
    min_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl Scheduler {
    pub fn new(tick_ms: u64) -> Self {
        Self { tick_ms, min_backoff_ms: 60_000, max_backoff_ms: 6 * 3_600_000 }
    }
}

impl Module for Scheduler {
    fn name(&self) -> &'static str { "scheduler" }

    fn spawn(self: Box<Self>, mut ctx: ModuleCtx) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let gate = Arc::new(Semaphore::new(1));
            let mut tick = interval(Duration::from_millis(self.tick_ms));
            let (min_backoff, max_backoff) = (self.min_backoff_ms, self.max_backoff_ms);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let state = load_state(&ctx.kv);
                        if now_ms() < state.next_run_ms { continue; }

                        let permit = match gate.clone().try_acquire_owned() {
                            Ok(p) => p,
                            Err(_) => continue, // previous run still going
                        };

                        let kv = ctx.kv.clone();
                        let cfg = ctx.cfg.clone();
                        tokio::spawn(async move {
                            let res = execute(cfg, kv.clone()).await;
                            let mut st = load_state(&kv);
                            match res {
                                Ok(report) => apply_report(&mut st, &report, now_ms(), min_backoff, max_backoff),
                                Err(e) => {
                                    warn!("renewal run err={e:#}");
                                    record_failure(&mut st, format!("{e:#}"), now_ms(), min_backoff, max_backoff);
                                }
                            }
                            if let Err(e) = kv.put_t(&state_key(), &st) {
                                warn!("persist task state err={e:#}");
                            }
                            info!("next renewal run at ms={} status={}", st.next_run_ms, st.last_status);
                            drop(permit);
                        });
                    }
                    changed = ctx.shutdown.changed() => {
                        if changed.is_ok() && *ctx.shutdown.borrow() {
                            info!("scheduler stopping");
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

/// Stored task state; an unreadable record counts as a task that never ran.
pub fn load_state<K: Kv>(kv: &K) -> TaskState {
    match kv.get_t::<TaskState>(&state_key()) {
        Ok(st) => st.unwrap_or_default(),
        Err(e) => {
            warn!("task state unreadable, starting over err={e:#}");
            TaskState::default()
        }
    }
}

/// Fold a finished run into the task state.
///
/// A reported next run that already passed is pushed out by `min_backoff`.
pub fn apply_report(st: &mut TaskState, report: &TaskReport, now: u64, min_backoff: u64, max_backoff: u64) {
    match report.next_run.and_then(local_ms) {
        Some(next) if report.success => {
            st.last_run_ms = now;
            st.runs = st.runs.saturating_add(1);
            st.failures = 0;
            st.backoff_ms = 0;
            st.next_run_ms = next.max(now.saturating_add(min_backoff));
            st.last_status = report.status.clone();
        }
        _ => record_failure(st, report.status.clone(), now, min_backoff, max_backoff),
    }
}

fn record_failure(st: &mut TaskState, status: String, now: u64, min_backoff: u64, max_backoff: u64) {
    st.last_run_ms = now;
    st.failures = st.failures.saturating_add(1);
    st.backoff_ms = (st.backoff_ms.max(min_backoff / 2).saturating_mul(2)).min(max_backoff);
    st.next_run_ms = now.saturating_add(st.backoff_ms);
    st.last_status = status;
}

fn local_ms(at: NaiveDateTime) -> Option<u64> {
    at.and_local_timezone(Local)
        .earliest()
        .and_then(|t| u64::try_from(t.timestamp_millis()).ok())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

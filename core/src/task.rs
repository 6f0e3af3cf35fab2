//! One host invocation of the renewal task: read the batch, resolve the
//! parameters, run the loop, and hand the host a status string and the time
//! of the next run.

use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info};

use crate::cfg::Config;
use crate::client::LicenseService;
use crate::encoder::RequestEncoder;
use crate::error::RenewError;
use crate::job;
use crate::orchestrator::{Pacer, RenewalOrchestrator};
use crate::schedule;
use crate::store::KeyStore;

/// What the host gets back from one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    /// Every requested slot was renewed.
    pub success: bool,
    /// Status line for the host's task history.
    pub status: String,
    /// When the task must run next; `None` when the run failed and the host
    /// should retry on its own schedule.
    pub next_run: Option<NaiveDateTime>,
    /// Number of keys generated and stored.
    pub generated: usize,
    /// Wall time of the run.
    pub runtime: Duration,
}

impl TaskReport {
    fn failed(status: String, generated: usize, started: Instant) -> Self {
        Self { success: false, status, next_run: None, generated, runtime: started.elapsed() }
    }
}

/// Run one renewal task against `store`.
///
/// `params` are the positional invocation parameters, if the host supplied any.
pub fn run_task<L, P, S>(
    orch: &mut RenewalOrchestrator<L, P>,
    store: &S,
    params: Option<&[String]>,
    max_retries: u32,
) -> TaskReport
where
    L: LicenseService,
    P: Pacer,
    S: KeyStore + ?Sized,
{
    let started = Instant::now();
    info!("renewal run started");

    let slots = match store.slots() {
        Ok(s) => s,
        Err(e) => return fail(e, started),
    };
    let job = match job::resolve(params, slots.len(), max_retries) {
        Ok(j) => j,
        Err(e) => return fail(e, started),
    };

    let result = orch.run(&job, &slots, store);
    let generated = result.generated.len();
    let runtime = started.elapsed();

    if !result.is_complete() {
        error!(?runtime, generated, "renewal run failed: {}", result.summary_message);
        return TaskReport::failed(
            format!("Licence key service run failed. Runtime: {runtime:?} {}", result.summary_message),
            generated,
            started,
        );
    }

    let next_run = schedule::next_run_at(result.next_run_date);
    if generated == 0 {
        info!(?runtime, %next_run, "renewal run finished, no generated keys");
        return TaskReport {
            success: true,
            status: "Task finished running with no generated keys".to_string(),
            next_run: Some(next_run),
            generated,
            runtime,
        };
    }

    info!(?runtime, generated, %next_run, "renewal run finished");
    TaskReport {
        success: true,
        status: format!("Licence key service run finished. Runtime: {runtime:?} {}", result.summary_message),
        next_run: Some(next_run),
        generated,
        runtime,
    }
}

fn fail(e: RenewError, started: Instant) -> TaskReport {
    error!("renewal run not started: {e}");
    TaskReport::failed(format!("Licence key service run failed: {e}"), 0, started)
}

/// Orchestrator wired from configuration, talking HTTP to the licensing service.
#[cfg(feature = "http")]
pub fn http_orchestrator(
    cfg: &Config,
) -> Result<RenewalOrchestrator<Box<dyn LicenseService + Send>>, RenewError> {
    let encoder = RequestEncoder::from_config(&cfg.public_key)?;
    let service: Box<dyn LicenseService + Send> = Box::new(crate::client::HttpLicenseService::new(
        cfg.service_url.clone(),
        Duration::from_secs(30),
    )?);
    Ok(orchestrator(cfg, encoder, service))
}

/// Orchestrator with the configured call delay around any service.
pub fn orchestrator<L: LicenseService>(cfg: &Config, encoder: RequestEncoder, service: L) -> RenewalOrchestrator<L> {
    RenewalOrchestrator::new(encoder, service).call_delay(Duration::from_millis(cfg.call_delay_ms()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::tests::test_encoder;
    use crate::orchestrator::tests::{block, fail as fail_reply, CountingPacer, ScriptedService};
    use crate::store::{open_default, KvKeyStore};
    use chrono::NaiveDate;

    fn setup(domains: &[&str]) -> (tempfile::TempDir, KvKeyStore<crate::store::FsKv>) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvKeyStore::new(open_default(dir.path()).unwrap());
        for d in domains {
            store.add_domain(d).unwrap();
        }
        (dir, store)
    }

    fn orch(replies: Vec<Result<String, RenewError>>) -> RenewalOrchestrator<ScriptedService, CountingPacer> {
        RenewalOrchestrator::with_pacer(test_encoder(), ScriptedService::new(replies), CountingPacer::default())
            .today(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap())
    }

    fn params(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn renews_store_and_schedules_on_earliest_expiry() {
        let (_dir, store) = setup(&["a.com", "b.com"]);
        let mut o = orch(vec![block("a.com", "20250601"), block("b.com", "20240315")]);
        let p = params(&["ops", "SN-1", "", "2", "true"]);

        let report = run_task(&mut o, &store, Some(p.as_slice()), 3);

        assert!(report.success);
        assert_eq!(report.generated, 2);
        assert_eq!(report.next_run.unwrap().to_string(), "2024-03-15 00:00:00");
        assert!(report.status.starts_with("Licence key service run finished. Runtime: "));
        assert!(report.status.ends_with("2 license keys were generated with setting DeleteOldKeys set to true"));

        // Old records replaced by the new ones.
        let domains: Vec<_> = store.slots().unwrap().into_iter().map(|s| s.domain).collect();
        assert_eq!(domains, ["a.com", "b.com"]);
        assert!(store.records().unwrap().iter().all(|r| r.expires_on.is_some()));
    }

    #[test]
    fn keeps_old_records_unless_asked() {
        let (_dir, store) = setup(&["a.com"]);
        let mut o = orch(vec![block("a.com", "20270101")]);
        let report = run_task(&mut o, &store, None, 3);
        assert!(report.success);
        assert_eq!(store.slots().unwrap().len(), 2);
    }

    #[test]
    fn empty_store_reports_no_generated_keys() {
        let (_dir, store) = setup(&[]);
        let mut o = orch(vec![]);
        let report = run_task(&mut o, &store, None, 3);
        assert!(report.success);
        assert_eq!(report.status, "Task finished running with no generated keys");
        assert_eq!(report.next_run.unwrap().to_string(), "2027-10-19 00:00:00");
    }

    #[test]
    fn exhaustion_fails_without_next_run() {
        let (_dir, store) = setup(&["a.com"]);
        let mut o = orch(vec![fail_reply("rate limit"), fail_reply("rate limit"), fail_reply("rate limit")]);
        let report = run_task(&mut o, &store, None, 3);
        assert!(!report.success);
        assert!(report.next_run.is_none());
        assert!(report.status.contains("Retries exhausted, attempts left: 0"));
    }

    #[test]
    fn failed_write_keeps_the_old_record() {
        let (dir, store) = setup(&["a.com"]);
        let kv = open_default(dir.path()).unwrap();
        std::fs::create_dir(kv.path_for(&crate::store::ns("keys", "2"))).unwrap();
        let mut o = orch(vec![block("a.com", "20270101")]);
        let p = params(&["ops", "SN", "", "1", "true"]);

        let report = run_task(&mut o, &store, Some(p.as_slice()), 3);

        assert!(!report.success);
        assert_eq!(report.generated, 0);
        assert!(report.status.contains("key store error"));
        let domains: Vec<_> = store.records().unwrap().into_iter().map(|r| r.domain).collect();
        assert_eq!(domains, ["a.com"]);
    }

    #[test]
    fn partial_parameters_do_not_call_the_service() {
        let (_dir, store) = setup(&["a.com"]);
        let mut o = orch(vec![block("a.com", "20270101")]);
        let p = params(&["ops", "SN-1"]);
        let report = run_task(&mut o, &store, Some(p.as_slice()), 3);
        assert!(!report.success);
        assert!(report.status.contains("invalid invocation parameters"));
        assert!(o.into_parts().0.calls.is_empty());
    }
}

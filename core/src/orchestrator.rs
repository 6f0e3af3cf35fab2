//! The renewal loop: one pass over the batch, retrying failed service calls
//! against a retry budget shared by the whole run.

use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use crate::cfg::MIN_CALL_DELAY_MS;
use crate::client::{KeyType, LicenseService};
use crate::encoder::RequestEncoder;
use crate::error::RenewError;
use crate::job::RenewalJob;
use crate::keyblock::{self, GeneratedLicenseKey};
use crate::schedule;
use crate::store::{KeySlot, KeyStore};

/// Blocking pause between licensing service calls.
pub trait Pacer {
    /// Block the current run for `d`.
    fn pause(&mut self, d: Duration);
}

/// [`Pacer`] that sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Pacer for ThreadSleep {
    fn pause(&mut self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Outcome of one renewal run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalResult {
    /// Keys generated and stored, in slot order.
    pub generated: Vec<GeneratedLicenseKey>,
    /// Human readable summary for the host.
    pub summary_message: String,
    /// The retry budget ran out before the batch was done.
    pub exhausted: bool,
    /// Non-retryable failure that stopped the run early.
    pub aborted: Option<RenewError>,
    /// Retry budget left when the run ended.
    pub retries_left: u32,
    /// Earliest expiration among `generated`, or the one-year fallback.
    pub next_run_date: NaiveDate,
}

impl RenewalResult {
    /// Every requested slot was renewed.
    pub fn is_complete(&self) -> bool {
        !self.exhausted && self.aborted.is_none()
    }
}

/// Drives a renewal run.
pub struct RenewalOrchestrator<L, P = ThreadSleep> {
    encoder: RequestEncoder,
    service: L,
    pacer: P,
    call_delay: Duration,
    today: NaiveDate,
}

impl<L: LicenseService> RenewalOrchestrator<L, ThreadSleep> {
    /// Orchestrator that sleeps the thread between calls.
    pub fn new(encoder: RequestEncoder, service: L) -> Self {
        Self::with_pacer(encoder, service, ThreadSleep)
    }
}

impl<L: LicenseService, P: Pacer> RenewalOrchestrator<L, P> {
    /// Orchestrator with a custom pause implementation.
    pub fn with_pacer(encoder: RequestEncoder, service: L, pacer: P) -> Self {
        Self {
            encoder,
            service,
            pacer,
            call_delay: Duration::from_millis(MIN_CALL_DELAY_MS),
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Pause after each call; values below the service's rate floor are raised to it.
    pub fn call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay.max(Duration::from_millis(MIN_CALL_DELAY_MS));
        self
    }

    /// Day the one-year fallback horizon is counted from.
    pub fn today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Give back the service and pacer (tests inspect them).
    pub fn into_parts(self) -> (L, P) {
        (self.service, self.pacer)
    }

    /// Renew the first `job.key_count` slots.
    ///
    /// Each generated key is stored before the slot it supersedes is deleted,
    /// so a run that stops early leaves the store consistent.
    pub fn run<S: KeyStore + ?Sized>(&mut self, job: &RenewalJob, slots: &[KeySlot], store: &S) -> RenewalResult {
        let count = job.key_count.min(slots.len());
        let mut retries_left = job.max_retries;
        let mut generated = Vec::with_capacity(count);
        info!(count, retries = retries_left, delete_old = job.delete_superseded_keys, "renewing license keys");

        for slot in &slots[..count] {
            // Attempts for this slot; the batch only moves on after a success.
            loop {
                let payload = match self.encoder.encode(&job.serial, &slot.domain, &job.user_name) {
                    Ok(p) => p,
                    Err(e) => return self.aborted(generated, slot, e, retries_left),
                };
                let reply = self.service.request_key(&payload, job.desired_version, KeyType::Main);
                self.pacer.pause(self.call_delay);

                match reply {
                    Ok(raw) => {
                        let key = match store_key(&raw, store) {
                            Ok(k) => k,
                            Err(e) => return self.aborted(generated, slot, e, retries_left),
                        };
                        debug!(domain = %key.domain, expires_on = %key.expires_on, "license key generated");
                        generated.push(key);
                        if job.delete_superseded_keys {
                            if let Err(e) = store.delete(slot.id) {
                                return self.aborted(generated, slot, e, retries_left);
                            }
                        }
                        break;
                    }
                    Err(e) if e.is_retryable() => {
                        retries_left = retries_left.saturating_sub(1);
                        if retries_left == 0 {
                            return self.exhausted(generated, e);
                        }
                        warn!(domain = %slot.domain, "Licence service error: {e}. Retry attempts left: {retries_left}");
                    }
                    Err(e) => return self.aborted(generated, slot, e, retries_left),
                }
            }
        }

        let summary_message = format!(
            "{} license keys were generated with setting DeleteOldKeys set to {}",
            generated.len(),
            job.delete_superseded_keys
        );
        self.finish(generated, summary_message, false, None, retries_left)
    }

    fn exhausted(&self, generated: Vec<GeneratedLicenseKey>, last: RenewError) -> RenewalResult {
        let summary = format!("Licence service error: {last}. Retries exhausted, attempts left: 0");
        error!(generated = generated.len(), "{summary}");
        self.finish(generated, summary, true, None, 0)
    }

    fn aborted(&self, generated: Vec<GeneratedLicenseKey>, slot: &KeySlot, err: RenewError, retries_left: u32) -> RenewalResult {
        let summary = format!("Renewal stopped at {}: {err}", slot.domain);
        error!(generated = generated.len(), "{summary}");
        self.finish(generated, summary, false, Some(err), retries_left)
    }

    fn finish(
        &self,
        generated: Vec<GeneratedLicenseKey>,
        summary_message: String,
        exhausted: bool,
        aborted: Option<RenewError>,
        retries_left: u32,
    ) -> RenewalResult {
        let next_run_date = schedule::next_run(&generated, schedule::default_horizon(self.today));
        RenewalResult { generated, summary_message, exhausted, aborted, retries_left, next_run_date }
    }
}

fn store_key<S: KeyStore + ?Sized>(raw: &str, store: &S) -> Result<GeneratedLicenseKey, RenewError> {
    let key = keyblock::parse(raw)?;
    store.insert(&key)?;
    Ok(key)
}

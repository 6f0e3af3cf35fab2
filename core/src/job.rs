use serde::{Deserialize, Serialize};

use crate::error::RenewError;

/// Number of positional task parameters.
pub const PARAM_COUNT: usize = 5;

/// Validated input to one renewal run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalJob {
    /// Licensing account user; may be empty.
    pub user_name: String,
    /// License serial; may be empty.
    pub serial: String,
    /// Requested product version; `None` lets the service use the serial's own.
    pub desired_version: Option<u32>,
    /// Number of slots (from the front of the batch) to renew.
    pub key_count: usize,
    /// Remove a slot's old record once its replacement is stored.
    pub delete_superseded_keys: bool,
    /// Retry budget shared by the whole batch; `0` allows the first call but no retry.
    pub max_retries: u32,
}

impl RenewalJob {
    /// Job used when the host supplies no parameters.
    pub fn defaults(available_slots: usize, max_retries: u32) -> Self {
        Self {
            user_name: String::new(),
            serial: String::new(),
            desired_version: None,
            key_count: available_slots,
            delete_superseded_keys: false,
            max_retries,
        }
    }
}

/// Turn positional parameters `[user, serial, version, count, delete]` into a job.
///
/// Unparseable numbers fall back to defaults; fewer than five fields is an error.
pub fn resolve(
    raw: Option<&[String]>,
    available_slots: usize,
    max_retries: u32,
) -> Result<RenewalJob, RenewError> {
    let params = match raw {
        None => return Ok(RenewalJob::defaults(available_slots, max_retries)),
        Some(p) if p.is_empty() => return Ok(RenewalJob::defaults(available_slots, max_retries)),
        Some(p) => p,
    };
    if params.len() < PARAM_COUNT {
        return Err(RenewError::InvalidInvocationParameters(format!(
            "expected {PARAM_COUNT} fields (user, serial, version, count, delete), got {}",
            params.len()
        )));
    }

    let desired_version = params[2].trim().parse::<u32>().ok().filter(|v| *v != 0);
    let key_count = params[3]
        .trim()
        .parse::<usize>()
        .map(|n| n.min(available_slots))
        .unwrap_or(available_slots);
    let delete_superseded_keys = params[4].trim().eq_ignore_ascii_case("true");

    Ok(RenewalJob {
        user_name: params[0].clone(),
        serial: params[1].clone(),
        desired_version,
        key_count,
        delete_superseded_keys,
        max_retries,
    })
}

/// Split host task data into positional parameters, one per line.
///
/// Blank task data means "no parameters".
pub fn split_task_data(data: &str) -> Option<Vec<String>> {
    if data.trim().is_empty() {
        return None;
    }
    Some(
        data.split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect(),
    )
}

/// Same as [`resolve`] for host task data.
pub fn resolve_task_data(
    data: &str,
    available_slots: usize,
    max_retries: u32,
) -> Result<RenewalJob, RenewError> {
    let params = split_task_data(data);
    resolve(params.as_deref(), available_slots, max_retries)
}

/// Host-side state of the renewal task, persisted between runs.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskState {
    /// When the next run is due (ms since epoch); 0 means "as soon as possible".
    pub next_run_ms: u64,
    /// Timestamp (ms since epoch) of last run.
    pub last_run_ms: u64,
    /// Completed runs.
    pub runs: u64,
    /// Consecutive failed runs.
    pub failures: u64,
    /// Current retry delay after a failed run (ms), 0 when the last run succeeded.
    pub backoff_ms: u64,
    /// Status string reported by the last run.
    pub last_status: String,
}

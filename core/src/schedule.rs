use chrono::{Months, NaiveDate, NaiveDateTime, NaiveTime};

use crate::keyblock::GeneratedLicenseKey;

/// Keys are issued for a year, so a run with nothing to go on comes back in a year.
pub fn default_horizon(today: NaiveDate) -> NaiveDate {
    today.checked_add_months(Months::new(12)).unwrap_or(NaiveDate::MAX)
}

/// Earliest expiration among `generated`, or `default_horizon` when there is none.
pub fn next_run(generated: &[GeneratedLicenseKey], default_horizon: NaiveDate) -> NaiveDate {
    generated
        .iter()
        .map(|k| k.expires_on)
        .min()
        .unwrap_or(default_horizon)
}

/// Next run as the host scheduler wants it: the chosen day at midnight.
pub fn next_run_at(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

//! Parsing of the key blocks returned by the licensing service.
//!
//! A block is newline-delimited text. Line 0 names the domain the key was
//! issued for and line 3 carries `EXPIRATION:YYYYMMDD`. Everything else is
//! opaque here; the block is kept verbatim because the store re-derives its
//! own fields from the same text.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::RenewError;

const EXPIRATION_MARKER: &str = "EXPIRATION:";
const EXPIRATION_LINE: usize = 3;

/// One successfully renewed license key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedLicenseKey {
    /// Domain from the first line of the block.
    pub domain: String,
    /// Expiration day; the key lapses at midnight.
    pub expires_on: NaiveDate,
    /// The block exactly as received.
    pub raw_block: String,
}

impl GeneratedLicenseKey {
    /// Expiration as a timestamp at midnight.
    pub fn expires_at(&self) -> NaiveDateTime {
        self.expires_on.and_time(chrono::NaiveTime::MIN)
    }
}

/// Parse a raw key block.
pub fn parse(raw_block: &str) -> Result<GeneratedLicenseKey, RenewError> {
    let lines: Vec<&str> = raw_block
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    if lines.len() <= EXPIRATION_LINE {
        return Err(malformed(format!("expected at least 4 lines, got {}", lines.len())));
    }

    let domain = lines[0].trim();
    if domain.is_empty() {
        return Err(malformed("empty domain line".into()));
    }

    let expires_on = parse_expiration(lines[EXPIRATION_LINE])?;
    Ok(GeneratedLicenseKey {
        domain: domain.to_string(),
        expires_on,
        raw_block: raw_block.to_string(),
    })
}

fn parse_expiration(line: &str) -> Result<NaiveDate, RenewError> {
    let start = line
        .find(EXPIRATION_MARKER)
        .ok_or_else(|| malformed(format!("line {EXPIRATION_LINE} has no {EXPIRATION_MARKER} field")))?
        + EXPIRATION_MARKER.len();
    let digits = line
        .get(start..start + 8)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| malformed(format!("expiration is not 8 digits: {:?}", &line[start..])))?;

    let num = |b: &[u8]| b.iter().fold(0u32, |n, d| n * 10 + u32::from(d - b'0'));
    let b = digits.as_bytes();
    NaiveDate::from_ymd_opt(num(&b[0..4]) as i32, num(&b[4..6]), num(&b[6..8]))
        .ok_or_else(|| malformed(format!("invalid calendar date {digits}")))
}

fn malformed(msg: String) -> RenewError {
    RenewError::MalformedKeyBlock(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(line3: &str) -> String {
        format!("example.com\nPRODUCT:CX13\nSERIAL:SN-1\n{line3}\nSIGNATURE:abc")
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_domain_and_expiration() {
        let raw = block("VALIDITY:365 EXPIRATION:20250601 FLAGS:0");
        let key = parse(&raw).unwrap();
        assert_eq!(key.domain, "example.com");
        assert_eq!(key.expires_on, ymd(2025, 6, 1));
        assert_eq!(key.raw_block, raw);
        assert_eq!(key.expires_at().to_string(), "2025-06-01 00:00:00");
    }

    #[test]
    fn tolerates_crlf_and_keeps_it() {
        let raw = "a.com\r\nP\r\nS\r\nEXPIRATION:20240229\r\nSIG";
        let key = parse(raw).unwrap();
        assert_eq!(key.domain, "a.com");
        assert_eq!(key.expires_on, ymd(2024, 2, 29));
        assert_eq!(key.raw_block.as_bytes(), raw.as_bytes());
    }

    #[test]
    fn exactly_four_lines_is_enough() {
        let key = parse("a.com\nx\ny\nEXPIRATION:20301231").unwrap();
        assert_eq!(key.expires_on, ymd(2030, 12, 31));
    }

    #[test]
    fn reads_each_date_field_from_its_own_digits() {
        assert_eq!(parse(&block("EXPIRATION:09991231")).unwrap().expires_on, ymd(999, 12, 31));
        assert_eq!(parse(&block("EXPIRATION:20011009X")).unwrap().expires_on, ymd(2001, 10, 9));
    }

    #[test]
    fn rejects_short_blocks() {
        for raw in ["", "a.com", "a.com\nx\nEXPIRATION:20250101"] {
            assert!(matches!(parse(raw), Err(RenewError::MalformedKeyBlock(_))), "{raw:?}");
        }
    }

    #[test]
    fn rejects_missing_marker() {
        let err = parse(&block("EXPIRES:20250601")).unwrap_err();
        assert!(matches!(err, RenewError::MalformedKeyBlock(_)));
    }

    #[test]
    fn marker_on_another_line_does_not_count() {
        let raw = "a.com\nEXPIRATION:20250601\nx\ny";
        assert!(matches!(parse(raw), Err(RenewError::MalformedKeyBlock(_))));
    }

    #[test]
    fn rejects_non_digits_and_truncation() {
        for line3 in ["EXPIRATION:2025O601", "EXPIRATION:2025-6-1", "EXPIRATION:202506", "EXPIRATION:"] {
            assert!(matches!(parse(&block(line3)), Err(RenewError::MalformedKeyBlock(_))), "{line3}");
        }
    }

    #[test]
    fn rejects_impossible_dates() {
        for line3 in ["EXPIRATION:20251301", "EXPIRATION:20250230", "EXPIRATION:20230229", "EXPIRATION:20250100"] {
            assert!(matches!(parse(&block(line3)), Err(RenewError::MalformedKeyBlock(_))), "{line3}");
        }
    }

    #[test]
    fn rejects_blank_domain() {
        let raw = "  \nx\ny\nEXPIRATION:20250601";
        assert!(matches!(parse(raw), Err(RenewError::MalformedKeyBlock(_))));
    }
}

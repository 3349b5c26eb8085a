//! Shared timestamp helpers.
//!
//! All instants are stored as fixed-width UTC text (`2024-05-01T12:00:00.000Z`)
//! so that plain string comparison in SQL orders them. The same shape is what
//! SQLite's `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')` produces.

use crate::core::error::CerebrumError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};

/// SQL expression producing "now" in the stored format.
pub const SQL_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drop precision the database does not keep, so staged and stored values compare equal.
pub fn stored_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

pub fn from_db(raw: &str) -> Result<DateTime<Utc>, CerebrumError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .map_err(|e| CerebrumError::ValidationError(format!("bad timestamp '{}': {}", raw, e)))
}

pub fn opt_from_db(raw: Option<String>) -> Result<Option<DateTime<Utc>>, CerebrumError> {
    raw.map(|s| from_db(&s)).transpose()
}

/// Parse a compact `YYYYMMDD` date (as delivered by HR feeds) to midnight UTC.
pub fn parse_yyyymmdd(raw: &str) -> Result<DateTime<Utc>, CerebrumError> {
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d")
        .map_err(|e| CerebrumError::ValidationError(format!("bad date '{}': {}", raw, e)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CerebrumError::ValidationError(format!("bad date '{}'", raw)))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

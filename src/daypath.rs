//! Local-date helpers and the on-disk date path layout.
//!
//! Producers partition their output as `<baseDir>/<year>/<month>/<day>`
//! with no zero padding and `/` as the separator on every platform.
//! [`date_path`] must match that layout byte for byte.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate};

/// Date format used in CLI argument exchange.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The current local calendar date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Render the producer's directory layout for `date`: `"{year}/{month}/{day}"`.
pub fn date_path(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.year(), date.month(), date.day())
}

/// True iff `date` is not the current local calendar day.
///
/// This is the sole rollover trigger for tailers and the supervisor.
pub fn differs_from_today(date: NaiveDate) -> bool {
    date != today()
}

/// Parse a `YYYY-MM-DD` date. Failure is a fatal configuration error.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .with_context(|| format!("failed to parse date {text:?}; expected {DATE_FORMAT}"))
}

/// Format a date as `YYYY-MM-DD`, the inverse of [`parse_date`].
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

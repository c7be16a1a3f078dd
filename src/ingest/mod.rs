//! Input adapters: CSV tables for batch mode and JSON bodies for manual
//! mode. Both produce unvalidated [`RawRow`](crate::model::RawRow)s.

pub mod csv;
pub mod manual;

use chrono::NaiveDate;

use crate::error::IngestError;
use crate::validate::parse_month;

pub use csv::{CsvOptions, parse_table, read_table};
pub use manual::{ManualRecord, ManualRequest};

/// Parses a `YYYY-MM` (or `YYYY-MM-DD`) month given on the command line.
pub fn parse_month_arg(value: &str) -> Result<NaiveDate, IngestError> {
    parse_month(value).map_err(|_| IngestError::BadMonth(value.to_string()))
}

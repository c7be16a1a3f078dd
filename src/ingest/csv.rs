//! Header-driven CSV tables of monthly observations.
//!
//! Cells are split on commas outside double quotes and trimmed. A quoted
//! cell may contain commas, and `""` inside quotes is a literal quote.
//! Values stay unvalidated [`RawValue`]s so the pipeline can report bad
//! cells, and lines with the wrong number of cells, per row instead of
//! rejecting the whole table.

use std::fs;
use std::path::Path;

use chrono::{Months, NaiveDate};

use crate::error::IngestError;
use crate::features::{self, FEATURE_REGISTRY};
use crate::model::{CellMismatch, RawRow, RawValue};

const DATE_COLUMN: &str = "date";
const LOCATION_COLUMN: &str = "location";

/// How to fill in what a table leaves out.
#[derive(Debug, Clone, Default)]
pub struct CsvOptions {
    /// Location for rows without a `location` cell.
    pub location: Option<String>,
    /// Month of the first data row when the table has no `date` column;
    /// later rows follow in consecutive months.
    pub start_month: Option<NaiveDate>,
}

/// Splits one line into trimmed cells, honouring double quotes.
fn split_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', _) => in_quotes = !in_quotes,
            (',', false) => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells.iter().map(|c| c.trim().to_string()).collect()
}

fn non_empty(cells: &[String], col: Option<usize>) -> Option<String> {
    col.and_then(|c| cells.get(c))
        .filter(|v| !v.is_empty())
        .cloned()
}

/// Parses a CSV table into raw rows. `line` on each row is the 1-based line
/// number in `text`.
pub fn parse_table(text: &str, options: &CsvOptions) -> Result<Vec<RawRow>, IngestError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header_line) = lines.next().ok_or(IngestError::Empty)?;
    let header: Vec<String> = split_line(header_line)
        .into_iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();

    let missing: Vec<String> = FEATURE_REGISTRY
        .iter()
        .filter(|f| !header.iter().any(|h| h == f.name))
        .map(|f| f.name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }

    let date_col = header.iter().position(|h| h == DATE_COLUMN);
    let location_col = header.iter().position(|h| h == LOCATION_COLUMN);
    if date_col.is_none() && options.start_month.is_none() {
        return Err(IngestError::MissingDates);
    }

    let mut rows = Vec::new();
    for (index, (line, text)) in lines.enumerate() {
        let cells = split_line(text);
        let mut row = RawRow::new(line);

        if cells.len() == header.len() {
            for (name, value) in header.iter().zip(&cells) {
                if features::find_feature(name).is_some() {
                    let value = if value.is_empty() {
                        RawValue::Null
                    } else {
                        RawValue::from(value.as_str())
                    };
                    row = row.with_field(name, value);
                }
            }
        } else {
            // Kept so the failure shows up per row; location and date are
            // best effort for the report.
            row.cell_mismatch = Some(CellMismatch {
                expected: header.len(),
                found: cells.len(),
            });
        }

        row.date = match (date_col, options.start_month) {
            (Some(_), _) => non_empty(&cells, date_col),
            (None, Some(start)) => start
                .checked_add_months(Months::new(index as u32))
                .map(|d| d.format("%Y-%m").to_string()),
            (None, None) => None,
        };
        row.location = non_empty(&cells, location_col).or_else(|| options.location.clone());

        rows.push(row);
    }
    Ok(rows)
}

/// Reads and parses a CSV file.
pub fn read_table(path: &Path, options: &CsvOptions) -> Result<Vec<RawRow>, IngestError> {
    let text = fs::read_to_string(path)?;
    parse_table(&text, options)
}

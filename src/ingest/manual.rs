//! JSON body for a single explicit window.
//!
//! ```json
//! { "location": "Latur", "end_month": "2024-06",
//!   "data": [ { "rainfall_mm": 12.0, "tmax_c": 34.1, ... }, ... ] }
//! ```
//!
//! Records listed without a `date` are taken as consecutive months ending
//! at `end_month` (the current month when omitted), oldest first.

use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};
use serde::Deserialize;

use crate::error::IngestError;
use crate::model::{RawRow, RawValue, month_start};
use crate::validate::parse_month;

#[derive(Debug, Clone, Deserialize)]
pub struct ManualRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, RawValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualRequest {
    pub data: Vec<ManualRecord>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub end_month: Option<String>,
}

impl ManualRequest {
    pub fn from_json(text: &str) -> Result<Self, IngestError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Converts the records to raw rows. `line` is the 1-based position in
    /// `data`; `today` anchors undated records when no `end_month` is given.
    pub fn into_rows(self, today: NaiveDate) -> Result<Vec<RawRow>, IngestError> {
        let end = match self.end_month.as_deref() {
            Some(m) => parse_month(m).map_err(|_| IngestError::BadMonth(m.to_string()))?,
            None => month_start(today),
        };
        let count = self.data.len();

        let mut rows = Vec::with_capacity(count);
        for (i, record) in self.data.into_iter().enumerate() {
            let date = record.date.or_else(|| {
                end.checked_sub_months(Months::new((count - 1 - i) as u32))
                    .map(|d| d.format("%Y-%m").to_string())
            });
            rows.push(RawRow {
                line: i + 1,
                location: record.location,
                date,
                fields: record.fields,
                ..RawRow::default()
            });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(records: usize, end_month: Option<&str>) -> String {
        let record = r#"{"rainfall_mm": 20.5, "tmax_c": 34, "tmin_c": 21, "spei": -0.7, "spi": -0.5, "ndvi": 0.32, "soil_moisture": 18}"#;
        let data = vec![record; records].join(",");
        match end_month {
            Some(m) => format!(r#"{{"location": "Latur", "end_month": "{m}", "data": [{data}]}}"#),
            None => format!(r#"{{"data": [{data}]}}"#),
        }
    }

    #[test]
    fn test_undated_records_end_at_end_month() {
        let req = ManualRequest::from_json(&body(12, Some("2024-03"))).unwrap();
        assert_eq!(req.location.as_deref(), Some("Latur"));
        let rows = req.into_rows(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].date.as_deref(), Some("2023-04"));
        assert_eq!(rows[11].date.as_deref(), Some("2024-03"));
        assert_eq!(rows[0].line, 1);
        assert_eq!(rows[0].fields["tmax_c"], RawValue::Number(34.0));
    }

    #[test]
    fn test_default_end_month_is_today() {
        let req = ManualRequest::from_json(&body(3, None)).unwrap();
        let rows = req.into_rows(NaiveDate::from_ymd_opt(2025, 2, 17).unwrap()).unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r.date.clone().unwrap()).collect();
        assert_eq!(dates, vec!["2024-12", "2025-01", "2025-02"]);
    }

    #[test]
    fn test_explicit_dates_and_nulls_are_kept() {
        let text = r#"{"data": [{"date": "2021-07", "location": "Beed", "rainfall_mm": null, "tmax_c": "33.5"}]}"#;
        let rows = ManualRequest::from_json(text)
            .unwrap()
            .into_rows(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
            .unwrap();
        assert_eq!(rows[0].date.as_deref(), Some("2021-07"));
        assert_eq!(rows[0].location.as_deref(), Some("Beed"));
        assert_eq!(rows[0].fields["rainfall_mm"], RawValue::Null);
        assert_eq!(rows[0].fields["tmax_c"], RawValue::Text("33.5".into()));
        assert!(!rows[0].fields.contains_key("date"));
    }

    #[test]
    fn test_bad_end_month_and_bad_json() {
        let req = ManualRequest::from_json(&body(1, Some("June"))).unwrap();
        assert!(matches!(
            req.into_rows(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            Err(IngestError::BadMonth(_))
        ));
        assert!(matches!(ManualRequest::from_json("{\"data\": 4}"), Err(IngestError::Json(_))));
    }
}

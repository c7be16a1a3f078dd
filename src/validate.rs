//! FeatureRecord validation.
//!
//! Turns one raw row of named values into a [`FeatureRecord`], or reports
//! the first offending field. Pure: no logging, no I/O. Callers in batch
//! mode collect the errors instead of aborting.

use chrono::NaiveDate;

use crate::error::{ValidationError, ValidationErrorKind};
use crate::features::{FEATURE_REGISTRY, Feature};
use crate::model::{CellMismatch, FEATURE_COUNT, FeatureRecord, MonthlyFeatures, RawRow, RawValue, month_start};

/// Parses a month string. Accepts `YYYY-MM` and `YYYY-MM-DD`; the result is
/// always the first day of the month.
pub fn parse_month(value: &str) -> Result<NaiveDate, ValidationError> {
    let s = value.trim();
    let bad = || ValidationError::new("date", ValidationErrorKind::BadDate { value: s.to_string() });
    if s.is_empty() {
        return Err(ValidationError::new("date", ValidationErrorKind::Missing));
    }
    let parsed = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
        .map_err(|_| bad())?;
    Ok(month_start(parsed))
}

fn numeric(feature: &Feature, raw: Option<&RawValue>) -> Result<f64, ValidationError> {
    let err = |kind| ValidationError::new(feature.name, kind);
    let value = match raw {
        None | Some(RawValue::Null) => return Err(err(ValidationErrorKind::Missing)),
        Some(RawValue::Number(v)) => *v,
        Some(RawValue::Text(t)) => {
            let t = t.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("na") {
                return Err(err(ValidationErrorKind::Missing));
            }
            t.parse::<f64>().map_err(|_| {
                err(ValidationErrorKind::NotNumeric {
                    value: t.to_string(),
                })
            })?
        }
    };
    if !value.is_finite() {
        return Err(err(ValidationErrorKind::NonFinite));
    }
    if !feature.in_range(value) {
        return Err(err(ValidationErrorKind::OutOfRange {
            value,
            min: feature.min.unwrap_or(f64::NEG_INFINITY),
            max: feature.max.unwrap_or(f64::INFINITY),
        }));
    }
    Ok(value)
}

/// Validates the seven feature values of a row, in model order, and the
/// cross-field temperature constraint.
pub fn validate_features(row: &RawRow) -> Result<MonthlyFeatures, ValidationError> {
    let mut values = [0.0; FEATURE_COUNT];
    for (slot, feature) in values.iter_mut().zip(FEATURE_REGISTRY.iter()) {
        *slot = numeric(feature, row.fields.get(feature.name))?;
    }
    let [rainfall_mm, tmax_c, tmin_c, spei, spi, ndvi, soil_moisture] = values;
    if tmin_c > tmax_c {
        return Err(ValidationError::new(
            "tmin_c",
            ValidationErrorKind::TemperatureInverted { tmin_c, tmax_c },
        ));
    }
    Ok(MonthlyFeatures {
        rainfall_mm,
        tmax_c,
        tmin_c,
        spei,
        spi,
        ndvi,
        soil_moisture,
    })
}

/// Validates a complete row, including its date.
pub fn validate_row(row: &RawRow) -> Result<FeatureRecord, ValidationError> {
    if let Some(CellMismatch { expected, found }) = row.cell_mismatch {
        return Err(ValidationError::new(
            "row",
            ValidationErrorKind::Malformed { expected, found },
        ));
    }
    let month = match row.date.as_deref() {
        Some(d) => parse_month(d)?,
        None => return Err(ValidationError::new("date", ValidationErrorKind::Missing)),
    };
    let features = validate_features(row)?;
    Ok(FeatureRecord {
        location: row.location_or_default().to_string(),
        month,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_row() -> RawRow {
        RawRow::new(2)
            .with_location("Maharashtra")
            .with_date("2024-03")
            .with_field("rainfall_mm", 85.5)
            .with_field("tmax_c", 32.4)
            .with_field("tmin_c", 18.2)
            .with_field("spei", -0.5)
            .with_field("spi", -0.3)
            .with_field("ndvi", 0.65)
            .with_field("soil_moisture", 45.0)
    }

    #[test]
    fn test_valid_row_produces_record() {
        let rec = validate_row(&valid_row()).expect("row should validate");
        assert_eq!(rec.location, "Maharashtra");
        assert_eq!(rec.month, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(rec.features.ndvi, 0.65);
    }

    #[test]
    fn test_text_values_are_parsed() {
        let row = valid_row().with_field("spei", " -1.25 ");
        let rec = validate_row(&row).expect("numeric text should parse");
        assert_eq!(rec.features.spei, -1.25);
    }

    #[test]
    fn test_ndvi_above_one_is_rejected_with_field_name() {
        let row = valid_row().with_field("ndvi", 1.4);
        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.field, "ndvi");
        assert!(matches!(err.kind, ValidationErrorKind::OutOfRange { value, .. } if value == 1.4));
    }

    #[test]
    fn test_boundary_values_are_accepted() {
        let row = valid_row()
            .with_field("rainfall_mm", 0.0)
            .with_field("spei", -3.0)
            .with_field("spi", 3.0)
            .with_field("ndvi", 1.0)
            .with_field("soil_moisture", 100.0)
            .with_field("tmin_c", 32.4);
        assert!(validate_row(&row).is_ok(), "inclusive bounds must be accepted");
    }

    #[test]
    fn test_negative_rainfall_rejected() {
        let err = validate_row(&valid_row().with_field("rainfall_mm", -0.1)).unwrap_err();
        assert_eq!(err.field, "rainfall_mm");
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut row = valid_row();
        row.fields.remove("soil_moisture");
        let err = validate_row(&row).unwrap_err();
        assert_eq!(err, ValidationError::new("soil_moisture", ValidationErrorKind::Missing));
    }

    #[test]
    fn test_blank_and_null_cells_count_as_missing() {
        for blank in ["", "  ", "null", "NA"] {
            let err = validate_row(&valid_row().with_field("spi", blank)).unwrap_err();
            assert_eq!(err.kind, ValidationErrorKind::Missing, "cell {blank:?}");
        }
        let err = validate_row(&valid_row().with_field("spi", RawValue::Null)).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Missing);
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = validate_row(&valid_row().with_field("tmax_c", "hot")).unwrap_err();
        assert_eq!(err.field, "tmax_c");
        assert!(matches!(err.kind, ValidationErrorKind::NotNumeric { .. }));
    }

    #[test]
    fn test_nan_rejected_as_non_finite() {
        let err = validate_row(&valid_row().with_field("tmax_c", "NaN")).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::NonFinite);
    }

    #[test]
    fn test_ragged_row_fails_before_field_checks() {
        let mut row = valid_row();
        row.cell_mismatch = Some(CellMismatch {
            expected: 9,
            found: 10,
        });
        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.field, "row");
        assert_eq!(err.kind, ValidationErrorKind::Malformed { expected: 9, found: 10 });
        assert_eq!(err.to_string(), "invalid field 'row': expected 9 cells, found 10");
    }

    #[test]
    fn test_inverted_temperatures_rejected() {
        let row = valid_row().with_field("tmin_c", 33.0);
        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.field, "tmin_c");
        assert!(matches!(err.kind, ValidationErrorKind::TemperatureInverted { .. }));
    }

    #[test]
    fn test_missing_and_bad_dates() {
        let mut row = valid_row();
        row.date = None;
        assert_eq!(validate_row(&row).unwrap_err().field, "date");

        let row = valid_row().with_date("March 2024");
        assert!(matches!(
            validate_row(&row).unwrap_err().kind,
            ValidationErrorKind::BadDate { .. }
        ));
    }

    #[test]
    fn test_full_dates_normalize_to_month_start() {
        assert_eq!(
            parse_month("2023-11-17").unwrap(),
            NaiveDate::from_ymd_opt(2023, 11, 1).unwrap()
        );
        assert_eq!(
            parse_month("2023-11").unwrap(),
            NaiveDate::from_ymd_opt(2023, 11, 1).unwrap()
        );
    }
}

//! PostgreSQL-backed [`PredictionStore`].
//!
//! Schema lives in `sql/001_predictions.sql` and is applied idempotently by
//! [`PostgresStore::ensure_schema`].

use chrono::{DateTime, NaiveDate, Utc};
use postgres::{Client, NoTls, Row};
use tracing::info;

use crate::error::StoreError;
use crate::logging::Stage;
use crate::model::{PredictionKind, PredictionResult};
use crate::severity::DroughtCategory;
use crate::store::{PredictionStore, StoredPrediction, SummaryStats};

const SCHEMA: &str = include_str!("../sql/001_predictions.sql");

const INSERT: &str = "
    INSERT INTO drought_predictions
        (kind, source_name, location, window_start_date, window_end_date,
         regcdi_score, severity_level, confidence_score, model_version, generated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    RETURNING id
";

const SELECT_COLUMNS: &str = "
    SELECT id, kind, source_name, location, window_start_date, window_end_date,
           regcdi_score, severity_level, confidence_score, model_version, generated_at
    FROM drought_predictions
";

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::connect(url, NoTls)?;
        Ok(Self { client })
    }

    pub fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.client.batch_execute(SCHEMA)?;
        Ok(())
    }

    /// Deletes every stored prediction for `location`. Used by tests to
    /// clean up after themselves.
    pub fn delete_location(&mut self, location: &str) -> Result<u64, StoreError> {
        Ok(self
            .client
            .execute("DELETE FROM drought_predictions WHERE location = $1", &[&location])?)
    }
}

fn insert(
    client: &mut impl postgres::GenericClient,
    kind: PredictionKind,
    source_name: Option<&str>,
    p: &PredictionResult,
) -> Result<i64, postgres::Error> {
    let row = client.query_one(
        INSERT,
        &[
            &kind.as_str(),
            &source_name,
            &p.location,
            &p.window_start_date,
            &p.window_end_date,
            &p.regcdi_score,
            &p.severity_level,
            &p.confidence_score,
            &p.model_version,
            &p.generated_at,
        ],
    )?;
    Ok(row.get(0))
}

fn stored_from_row(row: &Row) -> Result<StoredPrediction, StoreError> {
    let id: i64 = row.get(0);
    let kind = match row.get::<_, &str>(1) {
        "manual" => PredictionKind::Manual,
        "batch" => PredictionKind::Batch,
        other => return Err(StoreError::Corrupt(format!("row {id}: unknown kind '{other}'"))),
    };
    let severity_level: String = row.get(7);
    let category = DroughtCategory::from_level(&severity_level)
        .ok_or_else(|| StoreError::Corrupt(format!("row {id}: unknown severity '{severity_level}'")))?;

    Ok(StoredPrediction {
        id,
        kind,
        source_name: row.get(2),
        prediction: PredictionResult {
            location: row.get(3),
            window_start_date: row.get::<_, NaiveDate>(4),
            window_end_date: row.get::<_, NaiveDate>(5),
            regcdi_score: row.get(6),
            category,
            severity_level,
            confidence_score: row.get(8),
            model_version: row.get(9),
            generated_at: row.get::<_, DateTime<Utc>>(10),
        },
    })
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl PredictionStore for PostgresStore {
    fn save_prediction(
        &mut self,
        kind: PredictionKind,
        prediction: &PredictionResult,
    ) -> Result<i64, StoreError> {
        let id = insert(&mut self.client, kind, None, prediction)?;
        info!(stage = %Stage::Persist, id, location = %prediction.location, "prediction.saved");
        Ok(id)
    }

    fn save_batch(
        &mut self,
        source_name: &str,
        predictions: &[PredictionResult],
    ) -> Result<usize, StoreError> {
        let mut tx = self.client.transaction()?;
        for p in predictions {
            insert(&mut tx, PredictionKind::Batch, Some(source_name), p)?;
        }
        tx.commit()?;
        info!(
            stage = %Stage::Persist,
            source = source_name,
            rows = predictions.len(),
            "batch.saved"
        );
        Ok(predictions.len())
    }

    fn prediction(&mut self, id: i64) -> Result<Option<StoredPrediction>, StoreError> {
        let row = self
            .client
            .query_opt(format!("{SELECT_COLUMNS} WHERE id = $1").as_str(), &[&id])?;
        row.as_ref().map(stored_from_row).transpose()
    }

    fn recent_predictions(
        &mut self,
        location: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredPrediction>, StoreError> {
        let rows = match location {
            Some(loc) => self.client.query(
                format!("{SELECT_COLUMNS} WHERE location = $1 ORDER BY generated_at DESC, id DESC LIMIT $2")
                    .as_str(),
                &[&loc, &to_i64(limit)],
            )?,
            None => self.client.query(
                format!("{SELECT_COLUMNS} ORDER BY generated_at DESC, id DESC LIMIT $1").as_str(),
                &[&to_i64(limit)],
            )?,
        };
        rows.iter().map(stored_from_row).collect()
    }

    fn history(&mut self, skip: usize, limit: usize) -> Result<Vec<StoredPrediction>, StoreError> {
        let rows = self.client.query(
            format!("{SELECT_COLUMNS} ORDER BY generated_at DESC, id DESC OFFSET $1 LIMIT $2").as_str(),
            &[&to_i64(skip), &to_i64(limit)],
        )?;
        rows.iter().map(stored_from_row).collect()
    }

    fn summary(&mut self) -> Result<SummaryStats, StoreError> {
        let totals = self.client.query_one(
            "SELECT COUNT(*), AVG(regcdi_score), MAX(generated_at) FROM drought_predictions",
            &[],
        )?;
        let total: i64 = totals.get(0);
        let mean_regcdi: Option<f64> = totals.get(1);
        let last_prediction_at: Option<DateTime<Utc>> = totals.get(2);

        let mut distribution = SummaryStats::empty_distribution();
        for row in self.client.query(
            "SELECT severity_level, COUNT(*) FROM drought_predictions GROUP BY severity_level",
            &[],
        )? {
            let count: i64 = row.get(1);
            distribution.insert(row.get(0), usize::try_from(count).unwrap_or(0));
        }

        Ok(SummaryStats {
            total: usize::try_from(total).unwrap_or(0),
            distribution,
            mean_regcdi,
            last_prediction_at,
        })
    }
}

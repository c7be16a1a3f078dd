//! Persistence collaborator for predictions.
//!
//! The pipeline never stores anything itself; callers hand finished
//! [`PredictionResult`]s to a [`PredictionStore`]. [`MemoryStore`] backs
//! tests and offline runs, `db::PostgresStore` backs deployments.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{PredictionKind, PredictionResult};
use crate::severity::DroughtCategory;

/// A prediction as it comes back out of storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPrediction {
    pub id: i64,
    pub kind: PredictionKind,
    pub source_name: Option<String>,
    #[serde(flatten)]
    pub prediction: PredictionResult,
}

/// Aggregate view over everything stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total: usize,
    /// Count per severity level; every category is present, possibly zero.
    pub distribution: BTreeMap<String, usize>,
    pub mean_regcdi: Option<f64>,
    pub last_prediction_at: Option<DateTime<Utc>>,
}

impl SummaryStats {
    pub(crate) fn empty_distribution() -> BTreeMap<String, usize> {
        DroughtCategory::ALL
            .iter()
            .map(|c| (c.level().to_string(), 0))
            .collect()
    }
}

pub trait PredictionStore {
    /// Stores one prediction and returns its id.
    fn save_prediction(
        &mut self,
        kind: PredictionKind,
        prediction: &PredictionResult,
    ) -> Result<i64, StoreError>;

    /// Stores a batch atomically, tagged with its source (e.g. a file name).
    /// Returns the number of rows written.
    fn save_batch(
        &mut self,
        source_name: &str,
        predictions: &[PredictionResult],
    ) -> Result<usize, StoreError>;

    /// Looks up one stored prediction by the id `save_prediction` returned.
    fn prediction(&mut self, id: i64) -> Result<Option<StoredPrediction>, StoreError>;

    /// Most recent predictions first, optionally for one location.
    fn recent_predictions(
        &mut self,
        location: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredPrediction>, StoreError>;

    /// Paged history, most recent first.
    fn history(&mut self, skip: usize, limit: usize) -> Result<Vec<StoredPrediction>, StoreError>;

    fn summary(&mut self) -> Result<SummaryStats, StoreError>;
}

/// In-process store. Insertion order doubles as recency.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Vec<StoredPrediction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn push(&mut self, kind: PredictionKind, source_name: Option<&str>, prediction: &PredictionResult) -> i64 {
        let id = self.rows.len() as i64 + 1;
        self.rows.push(StoredPrediction {
            id,
            kind,
            source_name: source_name.map(str::to_string),
            prediction: prediction.clone(),
        });
        id
    }

    fn newest_first(&self) -> impl Iterator<Item = &StoredPrediction> {
        self.rows.iter().rev()
    }
}

impl PredictionStore for MemoryStore {
    fn save_prediction(
        &mut self,
        kind: PredictionKind,
        prediction: &PredictionResult,
    ) -> Result<i64, StoreError> {
        Ok(self.push(kind, None, prediction))
    }

    fn save_batch(
        &mut self,
        source_name: &str,
        predictions: &[PredictionResult],
    ) -> Result<usize, StoreError> {
        for p in predictions {
            self.push(PredictionKind::Batch, Some(source_name), p);
        }
        Ok(predictions.len())
    }

    fn prediction(&mut self, id: i64) -> Result<Option<StoredPrediction>, StoreError> {
        Ok(self.rows.iter().find(|r| r.id == id).cloned())
    }

    fn recent_predictions(
        &mut self,
        location: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredPrediction>, StoreError> {
        Ok(self
            .newest_first()
            .filter(|r| location.is_none_or(|l| r.prediction.location == l))
            .take(limit)
            .cloned()
            .collect())
    }

    fn history(&mut self, skip: usize, limit: usize) -> Result<Vec<StoredPrediction>, StoreError> {
        Ok(self.newest_first().skip(skip).take(limit).cloned().collect())
    }

    fn summary(&mut self) -> Result<SummaryStats, StoreError> {
        let mut distribution = SummaryStats::empty_distribution();
        for r in &self.rows {
            *distribution.entry(r.prediction.severity_level.clone()).or_default() += 1;
        }
        let total = self.rows.len();
        let mean_regcdi = (total > 0).then(|| {
            self.rows.iter().map(|r| r.prediction.regcdi_score).sum::<f64>() / total as f64
        });
        let last_prediction_at = self.rows.iter().map(|r| r.prediction.generated_at).max();
        Ok(SummaryStats {
            total,
            distribution,
            mean_regcdi,
            last_prediction_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::categorize;
    use chrono::{NaiveDate, TimeZone};

    fn prediction(location: &str, end_month: u32, regcdi: f64) -> PredictionResult {
        let category = categorize(regcdi);
        PredictionResult {
            location: location.to_string(),
            window_start_date: NaiveDate::from_ymd_opt(2022, end_month, 1).unwrap(),
            window_end_date: NaiveDate::from_ymd_opt(2023, end_month, 1).unwrap(),
            regcdi_score: regcdi,
            category,
            severity_level: category.level().to_string(),
            confidence_score: 0.6,
            model_version: "stat-LSTM-v1.0".to_string(),
            generated_at: Utc.with_ymd_and_hms(2024, 1, end_month, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_recent_is_newest_first_and_filters_location() {
        let mut store = MemoryStore::new();
        store.save_prediction(PredictionKind::Manual, &prediction("Latur", 1, 0.2)).unwrap();
        store
            .save_batch("history.csv", &[prediction("Beed", 2, -0.7), prediction("Latur", 3, -1.2)])
            .unwrap();

        let recent = store.recent_predictions(None, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, 3);
        assert_eq!(recent[0].source_name.as_deref(), Some("history.csv"));

        let latur = store.recent_predictions(Some("Latur"), 10).unwrap();
        assert_eq!(latur.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 1]);
        assert_eq!(latur[1].kind, PredictionKind::Manual);
    }

    #[test]
    fn test_lookup_by_saved_id() {
        let mut store = MemoryStore::new();
        let manual = prediction("Jalna", 4, -0.45);
        let id = store.save_prediction(PredictionKind::Manual, &manual).unwrap();
        store.save_batch("b.csv", &[prediction("Jalna", 5, 0.1)]).unwrap();

        let found = store.prediction(id).unwrap().expect("saved id should resolve");
        assert_eq!(found.kind, PredictionKind::Manual);
        assert_eq!(found.prediction, manual);
        assert_eq!(store.prediction(2).unwrap().unwrap().source_name.as_deref(), Some("b.csv"));
        assert_eq!(store.prediction(99).unwrap(), None);
    }

    #[test]
    fn test_history_pages() {
        let mut store = MemoryStore::new();
        for m in 1..=5 {
            store.save_prediction(PredictionKind::Manual, &prediction("Latur", m, 0.0)).unwrap();
        }
        let page = store.history(1, 2).unwrap();
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![4, 3]);
        assert!(store.history(10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_summary_counts_every_category() {
        let mut store = MemoryStore::new();
        let empty = store.summary().unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.mean_regcdi, None);
        assert_eq!(empty.distribution.len(), 5);

        store
            .save_batch("a.csv", &[prediction("Latur", 1, 0.6), prediction("Latur", 2, -0.6), prediction("Latur", 3, -0.9)])
            .unwrap();
        let stats = store.summary().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.distribution["severe"], 2);
        assert_eq!(stats.distribution["no_drought"], 1);
        assert_eq!(stats.distribution["mild"], 0);
        assert!((stats.mean_regcdi.unwrap() + 0.3).abs() < 1e-9);
        assert_eq!(stats.last_prediction_at, Some(Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap()));
    }
}

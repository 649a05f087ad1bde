//! Score distribution statistics per cohort.
//!
//! Thresholds are read off the descending score list at
//! `max(1, floor(n × p)) − 1`, so the top-10% threshold of ten candidates is
//! the best score, and of nine candidates is also the best score.

use serde::{Deserialize, Serialize};

use crate::changeset::Record;
use crate::model::{CohortScope, FilterState, KeyContext, ScoreField};
use crate::scorer::round1;

/// Default percentiles: the top-10% and top-20% thresholds.
pub const DEFAULT_PERCENTILES: [f64; 2] = [0.10, 0.20];

/// Index into a descending score list of length `participants` for percentile `p`.
pub fn percentile_index(participants: usize, p: f64) -> usize {
    ((participants as f64 * p).floor() as usize).max(1) - 1
}

/// The score at one percentile of the distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Fraction from the top, e.g. `0.1` for the top 10%.
    pub percentile: f64,
    pub score: Option<f64>,
}

impl Threshold {
    /// Column label, e.g. `top 10%`.
    pub fn label(&self) -> String {
        format!("top {}%", round1(self.percentile * 100.0))
    }
}

/// Distribution of one score field over one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub exam_id: String,
    pub context: KeyContext,
    pub scope: CohortScope,
    pub filter: FilterState,
    pub field: ScoreField,
    pub participants: u32,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub thresholds: Vec<Threshold>,
}

impl StatisticsRecord {
    pub fn threshold(&self, percentile: f64) -> Option<f64> {
        self.thresholds
            .iter()
            .find(|t| (t.percentile - percentile).abs() < 1e-9)
            .and_then(|t| t.score)
    }
}

impl Record for StatisticsRecord {
    type Key = (KeyContext, CohortScope, FilterState, ScoreField);

    fn key(&self) -> Self::Key {
        (self.context, self.scope.clone(), self.filter, self.field.clone())
    }
}

/// Where a distribution was taken from.
#[derive(Debug, Clone)]
pub struct Slice {
    pub context: KeyContext,
    pub scope: CohortScope,
    pub filter: FilterState,
    pub field: ScoreField,
}

/// Compute the statistics of `scores`; every value is null for an empty cohort.
pub fn statistics(
    exam_id: &str,
    slice: Slice,
    scores: &[f64],
    percentiles: &[f64],
) -> StatisticsRecord {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let n = sorted.len();
    let (max, mean) = if n == 0 {
        (None, None)
    } else {
        (
            Some(sorted[0]),
            Some(round1(sorted.iter().sum::<f64>() / n as f64)),
        )
    };
    let thresholds = percentiles
        .iter()
        .map(|&p| Threshold {
            percentile: p,
            score: sorted.get(percentile_index(n, p)).copied(),
        })
        .collect();

    StatisticsRecord {
        exam_id: exam_id.to_string(),
        context: slice.context,
        scope: slice.scope,
        filter: slice.filter,
        field: slice.field,
        participants: n as u32,
        max,
        mean,
        thresholds,
    }
}

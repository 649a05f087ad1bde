//! Reconciliation reports with JSON persistence, plus read models for
//! rendering derived state.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{Step, StepOutcome};
use crate::key::{AnswerKey, Prediction};
use crate::model::{CandidateId, CohortScope, Exam, FilterState, KeyContext, OptionSet, QuestionId};
use crate::rank::FieldRank;
use crate::tally::{Band, TallyRecord};
use crate::traits::DerivedState;

/// Outcome of one step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A complete reconciliation run of one exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Unique run identifier.
    pub id: Uuid,
    pub exam_id: String,
    /// Human-readable exam reference, e.g. `2025 psat #1`.
    #[serde(default)]
    pub exam_reference: String,
    /// Clock value the run evaluated the schedule at.
    pub as_of: DateTime<Utc>,
    /// When the run started.
    pub created_at: DateTime<Utc>,
    /// Ledger version the final derived state corresponds to.
    pub ledger_version: u64,
    /// Key contexts that were scored.
    #[serde(default)]
    pub contexts: Vec<KeyContext>,
    /// Steps in execution order; a failed step is always the last.
    pub steps: Vec<StepReport>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ReconcileReport {
    pub fn new(exam_id: &str, as_of: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id: exam_id.to_string(),
            exam_reference: String::new(),
            as_of,
            created_at: Utc::now(),
            ledger_version: 0,
            contexts: Vec::new(),
            steps: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Every step ran and none failed.
    pub fn is_success(&self) -> bool {
        self.steps.len() == Step::ALL.len() && self.failed_step().is_none()
    }

    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.outcome.is_failed())
    }

    /// Records created, updated or deleted across all steps.
    pub fn records_written(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match s.outcome {
                StepOutcome::Written {
                    created,
                    updated,
                    deleted,
                } => created + updated + deleted,
                _ => 0,
            })
            .sum()
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: ReconcileReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Format the run as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!(
            "**{}** ({}) at ledger v{}: {} record(s) written in {} ms\n\n",
            self.exam_id,
            self.exam_reference,
            self.ledger_version,
            self.records_written(),
            self.duration_ms
        ));
        md.push_str("| Step | Outcome |\n");
        md.push_str("|------|---------|\n");
        for s in &self.steps {
            match &s.note {
                Some(note) => md.push_str(&format!("| {} | {} ({note}) |\n", s.step, s.outcome)),
                None => md.push_str(&format!("| {} | {} |\n", s.step, s.outcome)),
            }
        }
        md
    }
}

/// Item-difficulty view of one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRow {
    pub question: QuestionId,
    pub predicted: Prediction,
    pub official: Option<OptionSet>,
    /// Key the correct rates are taken against; `None` while undetermined.
    pub credited_by: Option<KeyContext>,
    /// Selection rate (percent) per option `1..=N`.
    pub selection: Vec<Option<f64>>,
    /// Correct-answer rate (percent) overall and per band.
    pub correct_all: Option<f64>,
    pub correct_top: Option<f64>,
    pub correct_mid: Option<f64>,
    pub correct_low: Option<f64>,
    pub responses: u64,
}

/// Item analysis for every question, from stored tallies.
///
/// Correct rates are taken against the official key when one is given and
/// lists the question, else against the predicted answer; `credited_by`
/// records which.
pub fn item_analysis(
    exam: &Exam,
    derived: &DerivedState,
    official: Option<&AnswerKey>,
    filter: FilterState,
) -> Vec<ItemRow> {
    exam.questions()
        .map(|question| {
            let predicted = derived
                .predicted
                .iter()
                .find(|p| p.question == question)
                .map(|p| p.prediction)
                .unwrap_or(Prediction::Undetermined);
            let official_set = official.and_then(|k| k.get(&question));
            let (credited, credited_by) = match (official_set, predicted) {
                (Some(set), _) => (Some(set), Some(KeyContext::Official)),
                (None, Prediction::Option(o)) => {
                    (Some(OptionSet::single(o)), Some(KeyContext::Predicted))
                }
                (None, Prediction::Undetermined) => (None, None),
            };
            let correct = |band: Band| {
                let key = credited?;
                find_tally(derived, &question, band, filter)?.credited_rate(key)
            };
            let overall = find_tally(derived, &question, Band::All, filter);
            let selection = (1..=exam.option_count)
                .map(|o| overall.and_then(|t| t.selection_rate(o)))
                .collect();

            ItemRow {
                predicted,
                official: official_set,
                credited_by,
                selection,
                correct_all: correct(Band::All),
                correct_top: correct(Band::Top),
                correct_mid: correct(Band::Mid),
                correct_low: correct(Band::Low),
                responses: overall.map(|t| t.total()).unwrap_or(0),
                question,
            }
        })
        .collect()
}

fn find_tally<'a>(
    derived: &'a DerivedState,
    question: &QuestionId,
    band: Band,
    filter: FilterState,
) -> Option<&'a TallyRecord> {
    derived
        .tallies
        .iter()
        .find(|t| &t.question == question && t.band == band && t.filter == filter)
}

/// One line of a rank listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankRow {
    pub candidate_id: CandidateId,
    pub aggregate_score: f64,
    /// Absent until every subject is confirmed.
    pub aggregate_rank: Option<FieldRank>,
}

/// Rank listing of one cohort, best first.
pub fn rank_listing(
    derived: &DerivedState,
    context: KeyContext,
    scope: &CohortScope,
    filter: FilterState,
) -> Vec<RankRow> {
    let mut rows: Vec<RankRow> = derived
        .ranks
        .iter()
        .filter(|r| r.context == context && &r.scope == scope && r.filter == filter)
        .map(|r| RankRow {
            candidate_id: r.candidate_id,
            aggregate_score: derived
                .scores
                .iter()
                .find(|s| s.candidate_id() == r.candidate_id && s.context() == context)
                .map(|s| s.aggregate())
                .unwrap_or(0.0),
            aggregate_rank: r.aggregate,
        })
        .collect();
    rows.sort_by_key(|r| {
        (
            r.aggregate_rank.is_none(),
            r.aggregate_rank.map(|a| a.rank),
            r.candidate_id,
        )
    });
    rows
}

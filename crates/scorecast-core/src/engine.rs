//! The reconciliation driver.
//!
//! Brings every derived record of an exam into agreement with its answer
//! ledger. All derived state is computed by one pure [`derive`] pass over a
//! snapshot; each step then writes only the records of its kind that differ
//! from what is stored.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::changeset::{ChangeSet, Record};
use crate::cohort::{Cohorts, FilterFlag};
use crate::error::{ScoringError, StoreError};
use crate::key::{derive_predicted_key, PredictedAnswer};
use crate::ledger::AnswerBook;
use crate::model::{CohortScope, FilterState, KeyContext, ScoreField};
use crate::rank::{rank_cohort, RankRecord};
use crate::report::{ReconcileReport, StepReport};
use crate::scorer::{ScoreRecord, Scorer};
use crate::statistics::{statistics, Slice, StatisticsRecord, DEFAULT_PERCENTILES};
use crate::tally::{tally_bands, tally_overall, BandMembership, BandSplit, TallyRecord};
use crate::traits::{DerivedState, ExamSnapshot, ExamStore, WriteBatch};

/// Configuration for the reconciliation driver.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum exams reconciled concurrently.
    pub parallelism: usize,
    /// Percentile thresholds reported by the statistics step.
    pub percentiles: Vec<f64>,
    /// Band split points for percentile-band tallies.
    pub bands: BandSplit,
    /// How often a step is recomputed after a stale write.
    pub stale_write_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            bands: BandSplit::default(),
            stale_write_retries: 1,
        }
    }
}

/// One reconciliation step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Tally,
    PredictedKey,
    PredictedScores,
    OfficialScores,
    Ranks,
    CohortFilter,
    Statistics,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Tally,
        Step::PredictedKey,
        Step::PredictedScores,
        Step::OfficialScores,
        Step::Ranks,
        Step::CohortFilter,
        Step::Statistics,
    ];
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Step::Tally => "tally",
            Step::PredictedKey => "predicted key",
            Step::PredictedScores => "predicted scores",
            Step::OfficialScores => "official scores",
            Step::Ranks => "ranks",
            Step::CohortFilter => "cohort filter",
            Step::Statistics => "statistics",
        };
        f.write_str(label)
    }
}

/// Everything derived from one snapshot.
#[derive(Debug, Clone, Default)]
pub struct Derived {
    pub tallies: Vec<TallyRecord>,
    pub predicted: Vec<PredictedAnswer>,
    pub scores: Vec<ScoreRecord>,
    pub ranks: Vec<RankRecord>,
    pub flags: Vec<FilterFlag>,
    pub statistics: Vec<StatisticsRecord>,
    /// Key contexts that were scored.
    pub contexts: Vec<KeyContext>,
}

/// Compute all derived state of a snapshot.
///
/// Subject ranks and statistics count only candidates who confirmed the
/// subject; the aggregate counts only those who confirmed every subject.
/// Band tallies use the aggregate ranks of the official context when the
/// official key is released, else those of the predicted context.
pub fn derive(
    snapshot: &ExamSnapshot,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Derived, ScoringError> {
    let exam = &snapshot.exam;
    let cohorts = Cohorts::new(exam, &snapshot.candidates);

    let overall = tally_overall(exam, &snapshot.answers, cohorts.filtered())?;
    let predicted = derive_predicted_key(&overall);

    let book = AnswerBook::from_records(&snapshot.answers);
    let scorer = Scorer::new(exam, &book, &predicted, snapshot.official_key.as_ref(), now);
    let contexts = scorer.contexts();
    let participants = cohorts.members(&CohortScope::Global, FilterState::All);

    let mut scores = Vec::with_capacity(participants.len() * contexts.len());
    for &context in &contexts {
        for &id in &participants {
            scores.push(scorer.score_record(id, context)?);
        }
    }

    let fields = exam.score_fields();
    let mut ranks = Vec::new();
    let mut statistics_records = Vec::new();
    for &context in &contexts {
        for scope in cohorts.scopes() {
            for filter in FilterState::BOTH {
                let members = cohorts.members(&scope, filter);
                let cohort_scores: Vec<&ScoreRecord> = scores
                    .iter()
                    .filter(|s| s.context() == context && members.contains(&s.candidate_id()))
                    .collect();
                let field_scores: Vec<(ScoreField, Vec<&ScoreRecord>)> = fields
                    .iter()
                    .map(|field| {
                        let sat = cohorts.field_members(&scope, filter, field);
                        let sat_scores = cohort_scores
                            .iter()
                            .copied()
                            .filter(|s| sat.contains(&s.candidate_id()))
                            .collect();
                        (field.clone(), sat_scores)
                    })
                    .collect();

                ranks.extend(rank_cohort(&cohort_scores, &field_scores, context, &scope, filter));

                for (field, sat_scores) in field_scores {
                    let values: Vec<f64> = sat_scores.iter().map(|s| s.field(&field)).collect();
                    let slice = Slice {
                        context,
                        scope: scope.clone(),
                        filter,
                        field,
                    };
                    statistics_records.push(statistics(
                        &exam.id,
                        slice,
                        &values,
                        &config.percentiles,
                    ));
                }
            }
        }
    }

    let reference = scorer.reference_context();
    let membership = BandMembership::from_ranks(
        ranks
            .iter()
            .filter(|r| r.context == reference && r.scope == CohortScope::Global)
            .filter_map(|r| {
                r.aggregate
                    .map(|a| (r.candidate_id, r.filter, a.rank, a.participants))
            }),
        config.bands,
    );
    let mut tallies = overall;
    tallies.extend(tally_bands(exam, &snapshot.answers, &membership)?);

    Ok(Derived {
        tallies,
        predicted,
        scores,
        ranks,
        flags: Cohorts::flags(exam, &snapshot.candidates),
        statistics: statistics_records,
        contexts,
    })
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Written {
        created: usize,
        updated: usize,
        #[serde(default)]
        deleted: usize,
    },
    Unchanged,
    Failed { message: String },
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }

    fn from_changes<R: Record>(changes: &ChangeSet<R>) -> Self {
        if changes.is_empty() {
            StepOutcome::Unchanged
        } else {
            StepOutcome::Written {
                created: changes.created.len(),
                updated: changes.updated.len(),
                deleted: changes.deleted.len(),
            }
        }
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Written {
                created,
                updated,
                deleted,
            } => {
                write!(f, "created {created}, updated {updated}")?;
                if *deleted > 0 {
                    write!(f, ", deleted {deleted}")?;
                }
                Ok(())
            }
            StepOutcome::Unchanged => write!(f, "unchanged"),
            StepOutcome::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

/// Progress reporting for reconciliation runs.
pub trait ReconcileObserver: Send + Sync {
    fn on_step_complete(&self, exam_id: &str, report: &StepReport);
    fn on_exam_complete(&self, report: &ReconcileReport);
    fn on_exam_error(&self, exam_id: &str, error: &str);
}

/// No-op observer.
pub struct NoopObserver;

impl ReconcileObserver for NoopObserver {
    fn on_step_complete(&self, _: &str, _: &StepReport) {}
    fn on_exam_complete(&self, _: &ReconcileReport) {}
    fn on_exam_error(&self, _: &str, _: &str) {}
}

/// Computed state of one attempt, cached across steps until a write goes stale.
struct Working {
    snapshot: ExamSnapshot,
    stored: DerivedState,
    derived: Derived,
}

/// Runs reconciliation against an [`ExamStore`].
#[derive(Clone)]
pub struct ReconcileDriver {
    store: Arc<dyn ExamStore>,
    config: EngineConfig,
}

impl ReconcileDriver {
    pub fn new(store: Arc<dyn ExamStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconcile one exam, step by step, stopping at the first failed step.
    ///
    /// Errors are returned only when the exam cannot be loaded at all; step
    /// failures, including a ledger that can no longer be tallied, are
    /// recorded in the report.
    pub async fn reconcile(
        &self,
        exam_id: &str,
        now: DateTime<Utc>,
        observer: &dyn ReconcileObserver,
    ) -> Result<ReconcileReport> {
        let start = Instant::now();
        let mut report = ReconcileReport::new(exam_id, now);
        let (snapshot, stored) = self.load(exam_id).await?;
        report.exam_reference = snapshot.exam.reference();
        report.ledger_version = snapshot.ledger_version;

        match derive(&snapshot, &self.config, now) {
            Ok(derived) => {
                let mut working = Working {
                    snapshot,
                    stored,
                    derived,
                };
                for step in Step::ALL {
                    let (outcome, note) = self.run_step(step, exam_id, now, &mut working).await;
                    let step_report = StepReport {
                        step,
                        outcome,
                        note,
                    };
                    if !record_step(exam_id, &mut report, step_report, observer) {
                        break;
                    }
                }
                report.ledger_version = working.snapshot.ledger_version;
                report.contexts = working.derived.contexts.clone();
            }
            Err(e) => {
                let step_report = StepReport {
                    step: Step::Tally,
                    outcome: failed(&e),
                    note: None,
                };
                record_step(exam_id, &mut report, step_report, observer);
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "reconciled {exam_id}: {} written, {} step(s){}",
            report.records_written(),
            report.steps.len(),
            if report.is_success() { "" } else { ", aborted" }
        );
        observer.on_exam_complete(&report);
        Ok(report)
    }

    /// Reconcile several exams concurrently, each one sequentially.
    pub async fn reconcile_all(
        &self,
        exam_ids: &[String],
        now: DateTime<Utc>,
        observer: &dyn ReconcileObserver,
    ) -> Result<Vec<ReconcileReport>> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut futures = FuturesUnordered::new();

        for exam_id in exam_ids {
            let driver = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let exam_id = exam_id.clone();
            futures.push(async move {
                let result = async {
                    let _permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| anyhow::anyhow!("semaphore closed"))?;
                    driver.reconcile(&exam_id, now, observer).await
                }
                .await;
                (exam_id, result)
            });
        }

        let mut reports = Vec::new();
        let mut failed = 0usize;
        while let Some((exam_id, result)) = futures.next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!("reconcile failed for {exam_id}: {e:#}");
                    observer.on_exam_error(&exam_id, &format!("{e:#}"));
                    failed += 1;
                }
            }
        }
        reports.sort_by(|a, b| a.exam_id.cmp(&b.exam_id));

        tracing::info!(
            "reconciled {} exam(s), {failed} failed to load, in {:?}",
            reports.len(),
            start.elapsed()
        );
        Ok(reports)
    }

    async fn load(&self, exam_id: &str) -> Result<(ExamSnapshot, DerivedState), StoreError> {
        let snapshot = self.store.snapshot(exam_id).await?;
        let stored = self.store.derived(exam_id).await?;
        Ok((snapshot, stored))
    }

    async fn refresh(&self, exam_id: &str, now: DateTime<Utc>) -> Result<Working, StoreError> {
        let (snapshot, stored) = self.load(exam_id).await?;
        let derived = derive(&snapshot, &self.config, now)?;
        Ok(Working {
            snapshot,
            stored,
            derived,
        })
    }

    async fn run_step(
        &self,
        step: Step,
        exam_id: &str,
        now: DateTime<Utc>,
        working: &mut Working,
    ) -> (StepOutcome, Option<String>) {
        let mut attempt = 0;
        loop {
            // stored official rows are still removed while the key is unreleased
            let note = (step == Step::OfficialScores
                && !working.derived.contexts.contains(&KeyContext::Official))
            .then(|| "official key not yet released".to_string());

            let (outcome, batch) = plan(step, working);
            let Some(batch) = batch else {
                return (outcome, note);
            };

            match self
                .store
                .apply(exam_id, working.snapshot.ledger_version, batch)
                .await
            {
                Ok(()) => return (outcome, note),
                Err(e) if e.is_stale() && attempt < self.config.stale_write_retries => {
                    attempt += 1;
                    tracing::warn!("{exam_id}: {step} hit a stale write, recomputing ({e})");
                    match self.refresh(exam_id, now).await {
                        Ok(fresh) => *working = fresh,
                        Err(e) => return (failed(&e), None),
                    }
                }
                Err(e) => return (failed(&e), None),
            }
        }
    }
}

/// Log and report one finished step; false when it failed.
fn record_step(
    exam_id: &str,
    report: &mut ReconcileReport,
    step_report: StepReport,
    observer: &dyn ReconcileObserver,
) -> bool {
    let step = step_report.step;
    match &step_report.outcome {
        StepOutcome::Failed { message } => {
            tracing::error!("reconcile {exam_id}: {step} failed: {message}");
        }
        outcome => tracing::debug!("reconcile {exam_id}: {step} {outcome}"),
    }
    let ok = !step_report.outcome.is_failed();
    observer.on_step_complete(exam_id, &step_report);
    report.steps.push(step_report);
    ok
}

fn failed(err: &dyn std::fmt::Display) -> StepOutcome {
    StepOutcome::Failed {
        message: err.to_string(),
    }
}

/// Diff one step's computed records against the stored ones.
fn plan(step: Step, working: &Working) -> (StepOutcome, Option<WriteBatch>) {
    let Working {
        snapshot,
        stored,
        derived,
    } = working;
    match step {
        Step::Tally => batch(&stored.tallies, &derived.tallies, WriteBatch::Tallies),
        Step::PredictedKey => batch(&stored.predicted, &derived.predicted, WriteBatch::PredictedKey),
        Step::PredictedScores => scores_batch(stored, derived, KeyContext::Predicted),
        Step::OfficialScores => scores_batch(stored, derived, KeyContext::Official),
        Step::Ranks => batch(&stored.ranks, &derived.ranks, WriteBatch::Ranks),
        Step::CohortFilter => flags_batch(&snapshot.stored_flags(), &derived.flags),
        Step::Statistics => batch(&stored.statistics, &derived.statistics, WriteBatch::Statistics),
    }
}

fn batch<R: Record>(
    stored: &[R],
    computed: &[R],
    wrap: fn(ChangeSet<R>) -> WriteBatch,
) -> (StepOutcome, Option<WriteBatch>) {
    let changes = ChangeSet::diff(stored, computed.iter().cloned());
    let outcome = StepOutcome::from_changes(&changes);
    if changes.is_empty() {
        (outcome, None)
    } else {
        (outcome, Some(wrap(changes)))
    }
}

/// Stored and computed flags both cover every registered candidate.
fn flags_batch(stored: &[FilterFlag], computed: &[FilterFlag]) -> (StepOutcome, Option<WriteBatch>) {
    let changes = ChangeSet::diff(stored, computed.iter().cloned());
    let outcome = StepOutcome::from_changes(&changes);
    if changes.is_empty() {
        (outcome, None)
    } else {
        (outcome, Some(WriteBatch::FilterFlags(changes.into_records().collect())))
    }
}

fn scores_batch(
    stored: &DerivedState,
    derived: &Derived,
    context: KeyContext,
) -> (StepOutcome, Option<WriteBatch>) {
    let of_context = |scores: &[ScoreRecord]| -> Vec<ScoreRecord> {
        scores
            .iter()
            .filter(|s| s.context() == context)
            .cloned()
            .collect()
    };
    batch(
        &of_context(&stored.scores),
        &of_context(&derived.scores),
        WriteBatch::Scores,
    )
}

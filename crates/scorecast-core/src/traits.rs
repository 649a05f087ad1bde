//! The persistence seam.
//!
//! Implemented by the `scorecast-store` crate. The engine only ever reads a
//! consistent [`ExamSnapshot`] and writes derived records back in versioned
//! [`WriteBatch`]es.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changeset::ChangeSet;
use crate::cohort::FilterFlag;
use crate::error::StoreError;
use crate::key::{AnswerKey, PredictedAnswer};
use crate::model::{AnswerRecord, Candidate, CandidateId, Exam};
use crate::rank::RankRecord;
use crate::scorer::ScoreRecord;
use crate::statistics::StatisticsRecord;
use crate::tally::TallyRecord;

/// Storage backend for exams, the answer ledger and derived records.
///
/// Every method that changes the answer ledger, the candidate list or the
/// official key bumps the exam's ledger version. Derived-record writes do not.
#[async_trait]
pub trait ExamStore: Send + Sync {
    /// Human-readable backend name (e.g. "memory").
    fn name(&self) -> &str;

    /// Add or replace an exam definition.
    async fn put_exam(&self, exam: Exam) -> Result<(), StoreError>;

    async fn exam(&self, exam_id: &str) -> Result<Exam, StoreError>;

    async fn exam_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Register a candidate; a duplicate id is an integrity conflict.
    async fn register_candidate(&self, candidate: Candidate) -> Result<(), StoreError>;

    /// Record one validated subject batch.
    ///
    /// The "already confirmed?" check, the answer writes and the overall tally
    /// increments happen atomically.
    async fn confirm_subject(&self, confirmed: ConfirmedSubject)
        -> Result<ConfirmReceipt, StoreError>;

    /// Replace one stored answer and move its tally count.
    async fn correct_answer(&self, exam_id: &str, answer: AnswerRecord) -> Result<(), StoreError>;

    /// Store the official key for an exam, replacing any earlier one.
    async fn publish_official_key(&self, exam_id: &str, key: AnswerKey) -> Result<(), StoreError>;

    /// Everything derived state is computed from, as of one ledger version.
    async fn snapshot(&self, exam_id: &str) -> Result<ExamSnapshot, StoreError>;

    /// The derived records currently stored.
    async fn derived(&self, exam_id: &str) -> Result<DerivedState, StoreError>;

    /// Write derived records computed from the snapshot at `expected_version`,
    /// deleting those no longer computed.
    ///
    /// Fails with [`StoreError::StaleWrite`] and writes nothing if the ledger
    /// has moved since.
    async fn apply(
        &self,
        exam_id: &str,
        expected_version: u64,
        batch: WriteBatch,
    ) -> Result<(), StoreError>;
}

/// A validated subject batch, ready to be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedSubject {
    pub exam_id: String,
    pub candidate_id: CandidateId,
    pub subject: String,
    pub answers: Vec<AnswerRecord>,
    pub confirmed_at: DateTime<Utc>,
}

/// Acknowledgement of a confirmed subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmReceipt {
    /// Ledger version after the write.
    pub ledger_version: u64,
    pub answers_written: usize,
    /// Set once the candidate has confirmed every subject.
    pub all_confirmed_at: Option<DateTime<Utc>>,
}

/// Consistent view of one exam's source data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSnapshot {
    pub exam: Exam,
    pub candidates: Vec<Candidate>,
    pub answers: Vec<AnswerRecord>,
    #[serde(default)]
    pub official_key: Option<AnswerKey>,
    pub ledger_version: u64,
}

impl ExamSnapshot {
    /// The cached filter flags as currently stored on the candidates.
    pub fn stored_flags(&self) -> Vec<FilterFlag> {
        self.candidates
            .iter()
            .map(|c| FilterFlag {
                candidate_id: c.id,
                is_filtered: c.is_filtered,
            })
            .collect()
    }
}

/// Derived records of one exam.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedState {
    #[serde(default)]
    pub tallies: Vec<TallyRecord>,
    #[serde(default)]
    pub predicted: Vec<PredictedAnswer>,
    #[serde(default)]
    pub scores: Vec<ScoreRecord>,
    #[serde(default)]
    pub ranks: Vec<RankRecord>,
    #[serde(default)]
    pub statistics: Vec<StatisticsRecord>,
}

/// Changes to one kind of derived record.
#[derive(Debug, Clone)]
pub enum WriteBatch {
    Tallies(ChangeSet<TallyRecord>),
    PredictedKey(ChangeSet<PredictedAnswer>),
    Scores(ChangeSet<ScoreRecord>),
    Ranks(ChangeSet<RankRecord>),
    /// Refreshed flags of registered candidates.
    FilterFlags(Vec<FilterFlag>),
    Statistics(ChangeSet<StatisticsRecord>),
}

impl WriteBatch {
    /// Records written or deleted.
    pub fn len(&self) -> usize {
        match self {
            WriteBatch::Tallies(c) => c.written(),
            WriteBatch::PredictedKey(c) => c.written(),
            WriteBatch::Scores(c) => c.written(),
            WriteBatch::Ranks(c) => c.written(),
            WriteBatch::FilterFlags(r) => r.len(),
            WriteBatch::Statistics(c) => c.written(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

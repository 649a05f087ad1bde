//! Error types for scoring and persistence.
//!
//! Defined in `scorecast-core` so the reconciliation driver can classify
//! store failures (a stale write is retried, anything else aborts the run)
//! without string matching.

use thiserror::Error;

use crate::model::{CandidateId, QuestionId};

/// Errors raised while validating input or computing scores.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    /// An option code outside `0`, `1..=N` or a canonical multi-option code.
    #[error("option code {code} is not valid for {option_count}-option questions")]
    InvalidOption { code: u32, option_count: u8 },

    /// A submission batch or definition is malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A key lists the same question twice.
    #[error("duplicate question {0} in key")]
    DuplicateQuestion(QuestionId),

    /// Scoring against an official key that has not been released.
    #[error("official key for exam {exam_id} is not available: {reason}")]
    IncompleteKey { exam_id: String, reason: String },
}

/// Errors raised by an [`ExamStore`](crate::traits::ExamStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested exam, candidate or subject does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The answer ledger changed between snapshot and write.
    #[error("stale write for exam {exam_id}: ledger at version {actual}, batch computed at {expected}")]
    StaleWrite {
        exam_id: String,
        expected: u64,
        actual: u64,
    },

    /// A uniqueness invariant would be violated.
    #[error("integrity conflict: {0}")]
    IntegrityConflict(String),

    /// The subject was already confirmed by this candidate.
    #[error("candidate {candidate_id} already confirmed subject {subject}")]
    AlreadyConfirmed {
        candidate_id: CandidateId,
        subject: String,
    },

    /// A record handed to the store failed validation.
    #[error(transparent)]
    Invalid(ScoringError),

    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// The backing document could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns `true` if recomputing from a fresh snapshot may succeed.
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::StaleWrite { .. })
    }
}

impl From<ScoringError> for StoreError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::DuplicateQuestion(_) => StoreError::IntegrityConflict(err.to_string()),
            err => StoreError::Invalid(err),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors returned to the submission endpoint.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The batch was rejected before any write.
    #[error(transparent)]
    Rejected(#[from] ScoringError),

    /// The submission window for the exam is not open.
    #[error("submissions for exam {exam_id} are closed ({phase})")]
    Closed { exam_id: String, phase: String },

    /// The store refused the write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

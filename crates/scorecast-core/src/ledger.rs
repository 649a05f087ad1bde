//! The answer ledger: submission validation and per-candidate answer lookup.
//!
//! Answers arrive one batch per (candidate, subject). A batch is validated
//! completely before anything is written; the store then performs the
//! "already confirmed?" check, the answer writes and the tally increments
//! under one lock.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ScoringError, SubmissionError};
use crate::model::{AnswerRecord, CandidateId, Exam, Mark, QuestionId};
use crate::traits::{ConfirmReceipt, ConfirmedSubject, ExamStore};

/// One subject's answers as sent by the submission endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub exam_id: String,
    pub candidate_id: CandidateId,
    pub subject: String,
    /// Option codes for questions `1..=n`, in order.
    pub options: Vec<u32>,
}

/// Validate a batch against the exam definition and submission window.
pub fn validate_submission(
    exam: &Exam,
    submission: &Submission,
    now: DateTime<Utc>,
) -> Result<ConfirmedSubject, SubmissionError> {
    if !exam.schedule.accepts_submissions(now) {
        return Err(SubmissionError::Closed {
            exam_id: exam.id.clone(),
            phase: exam.schedule.phase(now).to_string(),
        });
    }

    let subject = exam.subject(&submission.subject).ok_or_else(|| {
        ScoringError::Validation(format!(
            "exam {} has no subject {}",
            exam.id, submission.subject
        ))
    })?;

    if submission.options.len() != subject.question_count as usize {
        return Err(ScoringError::Validation(format!(
            "subject {} expects {} answers, got {}",
            subject.code,
            subject.question_count,
            submission.options.len()
        ))
        .into());
    }

    let answers = submission
        .options
        .iter()
        .zip(subject.questions())
        .map(|(&code, question)| {
            let mark = Mark::parse(code, exam.option_count).map_err(|e| {
                ScoringError::Validation(format!("question {question}: {e}"))
            })?;
            Ok(AnswerRecord {
                candidate_id: submission.candidate_id,
                question,
                mark,
                recorded_at: now,
            })
        })
        .collect::<Result<Vec<_>, ScoringError>>()?;

    Ok(ConfirmedSubject {
        exam_id: exam.id.clone(),
        candidate_id: submission.candidate_id,
        subject: subject.code.clone(),
        answers,
        confirmed_at: now,
    })
}

/// Validate and record one subject batch.
pub async fn submit(
    store: &dyn ExamStore,
    submission: Submission,
    now: DateTime<Utc>,
) -> Result<ConfirmReceipt, SubmissionError> {
    let exam = store.exam(&submission.exam_id).await?;
    let confirmed = validate_submission(&exam, &submission, now)?;
    let receipt = store.confirm_subject(confirmed).await?;
    tracing::debug!(
        "candidate {} confirmed {} for {} (ledger v{})",
        submission.candidate_id,
        submission.subject,
        exam.id,
        receipt.ledger_version
    );
    Ok(receipt)
}

/// Administrative correction of one stored answer.
pub async fn correct_answer(
    store: &dyn ExamStore,
    exam_id: &str,
    candidate_id: CandidateId,
    question: QuestionId,
    code: u32,
    now: DateTime<Utc>,
) -> Result<(), SubmissionError> {
    let exam = store.exam(exam_id).await?;
    if !exam.has_question(&question) {
        return Err(ScoringError::Validation(format!(
            "exam {exam_id} has no question {question}"
        ))
        .into());
    }
    let mark = Mark::parse(code, exam.option_count)?;
    store
        .correct_answer(
            exam_id,
            AnswerRecord {
                candidate_id,
                question,
                mark,
                recorded_at: now,
            },
        )
        .await?;
    tracing::info!("corrected answer of candidate {candidate_id} in {exam_id}");
    Ok(())
}

/// Answers grouped by candidate for scoring.
#[derive(Debug, Default, Clone)]
pub struct AnswerBook {
    sheets: HashMap<CandidateId, BTreeMap<QuestionId, Mark>>,
}

impl AnswerBook {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AnswerRecord>) -> Self {
        let mut sheets: HashMap<CandidateId, BTreeMap<QuestionId, Mark>> = HashMap::new();
        for record in records {
            sheets
                .entry(record.candidate_id)
                .or_default()
                .insert(record.question.clone(), record.mark);
        }
        Self { sheets }
    }

    pub fn mark(&self, candidate_id: CandidateId, question: &QuestionId) -> Option<Mark> {
        self.sheets.get(&candidate_id)?.get(question).copied()
    }

    pub fn sheet(&self, candidate_id: CandidateId) -> Option<&BTreeMap<QuestionId, Mark>> {
        self.sheets.get(&candidate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn submission(options: Vec<u32>) -> Submission {
        Submission {
            exam_id: "2025-test-1".into(),
            candidate_id: 7,
            subject: "logic".into(),
            options,
        }
    }

    #[test]
    fn valid_batch_becomes_answer_records() {
        let exam = exam(vec![subject("logic", 3)]);
        let confirmed = validate_submission(&exam, &submission(vec![1, 0, 24]), at(5)).unwrap();
        assert_eq!(confirmed.answers.len(), 3);
        assert_eq!(confirmed.answers[0].question, QuestionId::new("logic", 1));
        assert_eq!(confirmed.answers[1].mark, Mark::Blank);
        assert_eq!(confirmed.answers[2].mark.code(), 24);
        assert_eq!(confirmed.confirmed_at, at(5));
    }

    #[test]
    fn wrong_question_count_is_rejected() {
        let exam = exam(vec![subject("logic", 3)]);
        let err = validate_submission(&exam, &submission(vec![1, 2]), at(5)).unwrap_err();
        assert!(err.to_string().contains("expects 3 answers, got 2"));
    }

    #[test]
    fn invalid_option_names_the_question() {
        let exam = exam(vec![subject("logic", 3)]);
        let err = validate_submission(&exam, &submission(vec![1, 9, 2]), at(5)).unwrap_err();
        assert!(err.to_string().contains("question logic-2"), "{err}");
    }

    #[test]
    fn unknown_subject_is_rejected() {
        let exam = exam(vec![subject("data", 3)]);
        assert!(validate_submission(&exam, &submission(vec![1, 1, 1]), at(5)).is_err());
    }

    #[test]
    fn submissions_outside_window_are_closed() {
        let exam = exam(vec![subject("logic", 3)]);
        let err = validate_submission(&exam, &submission(vec![1, 1, 1]), at(3)).unwrap_err();
        assert!(matches!(err, SubmissionError::Closed { .. }));
    }

    #[test]
    fn answer_book_keeps_one_mark_per_question() {
        let q = QuestionId::new("logic", 1);
        let records = vec![
            AnswerRecord {
                candidate_id: 1,
                question: q.clone(),
                mark: Mark::Single(1),
                recorded_at: at(5),
            },
            AnswerRecord {
                candidate_id: 1,
                question: q.clone(),
                mark: Mark::Single(3),
                recorded_at: at(6),
            },
        ];
        let book = AnswerBook::from_records(&records);
        assert_eq!(book.mark(1, &q), Some(Mark::Single(3)));
        assert_eq!(book.sheet(1).unwrap().len(), 1);
        assert!(book.sheet(2).is_none());
    }
}

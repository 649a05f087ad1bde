//! Scoring candidates against the predicted or official key.
//!
//! Scores are kept to one decimal. A subject score is the number of credited
//! answers times the subject's scoring unit; the aggregate combines the
//! in-aggregate subjects with the exam's [`AggregateFormula`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changeset::Record;
use crate::error::ScoringError;
use crate::key::{AnswerKey, PredictedAnswer};
use crate::ledger::AnswerBook;
use crate::model::{AggregateFormula, CandidateId, Exam, KeyContext, ScoreField, Subject};

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Combine per-subject scores with the exam's aggregate formula.
pub fn combine(exam: &Exam, subjects: &BTreeMap<String, f64>) -> f64 {
    let mut weighted = 0.0;
    let mut weights = 0.0;
    for subject in exam.subjects.iter().filter(|s| s.in_aggregate) {
        weighted += subject.weight * subjects.get(&subject.code).copied().unwrap_or(0.0);
        weights += subject.weight;
    }
    match exam.aggregate {
        AggregateFormula::Sum => round1(weighted),
        AggregateFormula::Average if weights > 0.0 => round1(weighted / weights),
        AggregateFormula::Average => 0.0,
    }
}

/// One candidate's scores under one key context.
///
/// The aggregate is derived from the subject scores when the record is built
/// and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    candidate_id: CandidateId,
    context: KeyContext,
    subjects: BTreeMap<String, f64>,
    aggregate: f64,
}

impl ScoreRecord {
    pub fn new(
        exam: &Exam,
        candidate_id: CandidateId,
        context: KeyContext,
        subjects: BTreeMap<String, f64>,
    ) -> Self {
        let aggregate = combine(exam, &subjects);
        Self {
            candidate_id,
            context,
            subjects,
            aggregate,
        }
    }

    pub fn candidate_id(&self) -> CandidateId {
        self.candidate_id
    }

    pub fn context(&self) -> KeyContext {
        self.context
    }

    pub fn subjects(&self) -> &BTreeMap<String, f64> {
        &self.subjects
    }

    pub fn subject(&self, code: &str) -> f64 {
        self.subjects.get(code).copied().unwrap_or(0.0)
    }

    pub fn aggregate(&self) -> f64 {
        self.aggregate
    }

    pub fn field(&self, field: &ScoreField) -> f64 {
        match field {
            ScoreField::Subject(code) => self.subject(code),
            ScoreField::Aggregate => self.aggregate,
        }
    }
}

impl Record for ScoreRecord {
    type Key = (CandidateId, KeyContext);

    fn key(&self) -> Self::Key {
        (self.candidate_id, self.context)
    }
}

/// Scores candidates from an answer book against the exam's keys.
pub struct Scorer<'a> {
    exam: &'a Exam,
    book: &'a AnswerBook,
    predicted: AnswerKey,
    official: Option<&'a AnswerKey>,
    now: DateTime<Utc>,
}

impl<'a> Scorer<'a> {
    pub fn new(
        exam: &'a Exam,
        book: &'a AnswerBook,
        predicted: &[PredictedAnswer],
        official: Option<&'a AnswerKey>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            exam,
            book,
            predicted: AnswerKey::from_predictions(predicted),
            official,
            now,
        }
    }

    /// The key for `context`; the official key only once it is released.
    pub fn key(&self, context: KeyContext) -> Result<&AnswerKey, ScoringError> {
        match context {
            KeyContext::Predicted => Ok(&self.predicted),
            KeyContext::Official => {
                let key = self.official.ok_or_else(|| ScoringError::IncompleteKey {
                    exam_id: self.exam.id.clone(),
                    reason: "not published".into(),
                })?;
                key.ensure_released(self.exam, self.now)?;
                Ok(key)
            }
        }
    }

    /// Key contexts that can currently be scored.
    pub fn contexts(&self) -> Vec<KeyContext> {
        let mut contexts = vec![KeyContext::Predicted];
        if self.key(KeyContext::Official).is_ok() {
            contexts.push(KeyContext::Official);
        }
        contexts
    }

    /// The official context once released, else the predicted one.
    pub fn reference_context(&self) -> KeyContext {
        if self.key(KeyContext::Official).is_ok() {
            KeyContext::Official
        } else {
            KeyContext::Predicted
        }
    }

    pub fn score(
        &self,
        candidate_id: CandidateId,
        subject: &str,
        context: KeyContext,
    ) -> Result<f64, ScoringError> {
        let key = self.key(context)?;
        let subject = self.subject(subject)?;
        Ok(self.score_with(candidate_id, subject, key))
    }

    pub fn aggregate_score(
        &self,
        candidate_id: CandidateId,
        context: KeyContext,
    ) -> Result<f64, ScoringError> {
        Ok(self.score_record(candidate_id, context)?.aggregate())
    }

    /// Every subject score plus the aggregate.
    pub fn score_record(
        &self,
        candidate_id: CandidateId,
        context: KeyContext,
    ) -> Result<ScoreRecord, ScoringError> {
        let key = self.key(context)?;
        let subjects = self
            .exam
            .subjects
            .iter()
            .map(|s| (s.code.clone(), self.score_with(candidate_id, s, key)))
            .collect();
        Ok(ScoreRecord::new(self.exam, candidate_id, context, subjects))
    }

    /// Number of the candidate's answers in `subject` that `key` credits.
    pub fn correct_count(&self, candidate_id: CandidateId, subject: &Subject, key: &AnswerKey) -> u32 {
        let Some(sheet) = self.book.sheet(candidate_id) else {
            return 0;
        };
        subject
            .questions()
            .filter(|q| {
                match (sheet.get(q), key.get(q)) {
                    (Some(mark), Some(credited)) => mark.is_credited_by(credited),
                    _ => false,
                }
            })
            .count() as u32
    }

    fn score_with(&self, candidate_id: CandidateId, subject: &Subject, key: &AnswerKey) -> f64 {
        round1(self.correct_count(candidate_id, subject, key) as f64 * subject.unit())
    }

    fn subject(&self, code: &str) -> Result<&'a Subject, ScoringError> {
        self.exam.subject(code).ok_or_else(|| {
            ScoringError::Validation(format!("exam {} has no subject {code}", self.exam.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Prediction;
    use crate::model::fixtures::*;
    use crate::model::{AnswerRecord, Mark, OptionSet, QuestionId};

    fn book(sheets: &[(CandidateId, &str, &[u32])]) -> AnswerBook {
        let records: Vec<AnswerRecord> = sheets
            .iter()
            .flat_map(|&(id, subject, codes)| {
                codes.iter().enumerate().map(move |(i, &code)| AnswerRecord {
                    candidate_id: id,
                    question: QuestionId::new(subject, i as u32 + 1),
                    mark: Mark::parse(code, 5).unwrap(),
                    recorded_at: at(5),
                })
            })
            .collect();
        AnswerBook::from_records(&records)
    }

    fn predictions(subject: &str, options: &[u8]) -> Vec<PredictedAnswer> {
        options
            .iter()
            .enumerate()
            .map(|(i, &o)| PredictedAnswer {
                question: QuestionId::new(subject, i as u32 + 1),
                prediction: if o == 0 {
                    Prediction::Undetermined
                } else {
                    Prediction::Option(o)
                },
            })
            .collect()
    }

    fn official(exam: &Exam, subject: &str, codes: &[u32]) -> AnswerKey {
        let mut map = BTreeMap::new();
        map.insert(subject.to_string(), codes.to_vec());
        AnswerKey::from_codes(exam, &map).unwrap()
    }

    #[test]
    fn scores_count_credited_answers_times_unit() {
        let exam = exam(vec![subject("logic", 3)]);
        let book = book(&[(1, "logic", &[1, 2, 1]), (2, "logic", &[1, 2, 2])]);
        let predicted = predictions("logic", &[1, 2, 1]);
        let scorer = Scorer::new(&exam, &book, &predicted, None, at(9));

        assert_eq!(scorer.score(1, "logic", KeyContext::Predicted).unwrap(), 100.0);
        assert_eq!(scorer.score(2, "logic", KeyContext::Predicted).unwrap(), 66.7);
        // no answers at all
        assert_eq!(scorer.score(9, "logic", KeyContext::Predicted).unwrap(), 0.0);
    }

    #[test]
    fn multi_credit_key_accepts_any_listed_option() {
        let exam = exam(vec![subject("logic", 2)]);
        let book = book(&[(1, "logic", &[2, 13]), (2, "logic", &[1, 3])]);
        let key = official(&exam, "logic", &[12, 3]);
        let scorer = Scorer::new(&exam, &book, &[], Some(&key), at(13));

        // candidate 1 multi-marked question 2 and gets no credit for it
        assert_eq!(scorer.score(1, "logic", KeyContext::Official).unwrap(), 50.0);
        assert_eq!(scorer.score(2, "logic", KeyContext::Official).unwrap(), 100.0);
    }

    #[test]
    fn undetermined_predictions_credit_nobody() {
        let exam = exam(vec![subject("logic", 2)]);
        let book = book(&[(1, "logic", &[1, 1])]);
        let predicted = predictions("logic", &[1, 0]);
        let scorer = Scorer::new(&exam, &book, &predicted, None, at(9));
        assert_eq!(scorer.score(1, "logic", KeyContext::Predicted).unwrap(), 50.0);
    }

    #[test]
    fn official_scoring_before_release_is_incomplete() {
        let exam = exam(vec![subject("logic", 3)]);
        let book = book(&[(1, "logic", &[1, 2, 2])]);
        let key = official(&exam, "logic", &[1, 2, 2]);

        let early = Scorer::new(&exam, &book, &[], Some(&key), at(11));
        assert!(matches!(
            early.score(1, "logic", KeyContext::Official),
            Err(ScoringError::IncompleteKey { .. })
        ));
        assert_eq!(early.contexts(), vec![KeyContext::Predicted]);
        assert_eq!(early.reference_context(), KeyContext::Predicted);

        let unpublished = Scorer::new(&exam, &book, &[], None, at(13));
        assert!(unpublished.score(1, "logic", KeyContext::Official).is_err());

        let released = Scorer::new(&exam, &book, &[], Some(&key), at(13));
        assert_eq!(released.score(1, "logic", KeyContext::Official).unwrap(), 100.0);
        assert_eq!(released.contexts(), vec![KeyContext::Predicted, KeyContext::Official]);
    }

    #[test]
    fn aggregate_sum_skips_subjects_outside_the_aggregate() {
        let mut screening = subject("screening", 2);
        screening.in_aggregate = false;
        let exam = exam(vec![screening, subject("logic", 2), subject("data", 4)]);
        let book = book(&[
            (1, "screening", &[1, 1]),
            (1, "logic", &[1, 2]),
            (1, "data", &[1, 1, 1, 2]),
        ]);
        let mut key = AnswerKey::new();
        for q in exam.questions() {
            key.insert(q, OptionSet::single(1));
        }
        let scorer = Scorer::new(&exam, &book, &[], Some(&key), at(13));

        let record = scorer.score_record(1, KeyContext::Official).unwrap();
        assert_eq!(record.subject("screening"), 100.0);
        assert_eq!(record.subject("logic"), 50.0);
        assert_eq!(record.subject("data"), 75.0);
        assert_eq!(record.aggregate(), 125.0);
        assert_eq!(scorer.aggregate_score(1, KeyContext::Official).unwrap(), 125.0);
    }

    #[test]
    fn aggregate_average_is_weighted_and_rounded() {
        let mut exam = exam(vec![subject("a", 3), subject("b", 3), subject("c", 3)]);
        exam.aggregate = AggregateFormula::Average;
        exam.subjects[2].weight = 2.0;

        let mut subjects = BTreeMap::new();
        subjects.insert("a".to_string(), 100.0);
        subjects.insert("b".to_string(), 66.7);
        subjects.insert("c".to_string(), 33.3);
        let record = ScoreRecord::new(&exam, 1, KeyContext::Predicted, subjects);
        // (100 + 66.7 + 2 * 33.3) / 4 = 58.325
        assert_eq!(record.aggregate(), 58.3);
        assert_eq!(record.field(&ScoreField::Aggregate), record.aggregate());
    }

    #[test]
    fn round1_rounds_half_away_from_zero() {
        assert_eq!(round1(66.666), 66.7);
        assert_eq!(round1(0.25), 0.3);
        assert_eq!(round1(0.04), 0.0);
    }
}

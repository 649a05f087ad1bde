//! Answer keys: the crowd-derived predicted key and the official key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changeset::Record;
use crate::error::ScoringError;
use crate::model::{Exam, FilterState, OptionSet, QuestionId};
use crate::tally::{Band, TallyRecord};

/// The derived answer to one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prediction {
    Option(u8),
    /// Nobody has answered the question yet.
    Undetermined,
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prediction::Option(o) => write!(f, "{o}"),
            Prediction::Undetermined => write!(f, "-"),
        }
    }
}

/// Stored output of [`predicted_option`] for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedAnswer {
    pub question: QuestionId,
    pub prediction: Prediction,
}

impl Record for PredictedAnswer {
    type Key = QuestionId;

    fn key(&self) -> QuestionId {
        self.question.clone()
    }
}

/// The most-chosen single option; ties go to the lowest option number.
///
/// Undetermined while no single option has been chosen (blank and
/// multi-marked answers do not vote).
pub fn predicted_option(tally: &TallyRecord) -> Prediction {
    let mut best: Option<(u64, u8)> = None;
    for option in 1..=tally.option_count() {
        let count = tally.count(option);
        if count > 0 && best.map_or(true, |(top, _)| count > top) {
            best = Some((count, option));
        }
    }
    best.map_or(Prediction::Undetermined, |(_, option)| Prediction::Option(option))
}

/// Predicted answers for every question with an overall, unfiltered tally.
pub fn derive_predicted_key(tallies: &[TallyRecord]) -> Vec<PredictedAnswer> {
    tallies
        .iter()
        .filter(|t| t.band == Band::All && t.filter == FilterState::All)
        .map(|t| PredictedAnswer {
            question: t.question.clone(),
            prediction: predicted_option(t),
        })
        .collect()
}

/// One question's credited options, as stored and exchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub question: QuestionId,
    pub answer: OptionSet,
}

/// Credited option set per question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyEntry>", into = "Vec<KeyEntry>")]
pub struct AnswerKey {
    answers: BTreeMap<QuestionId, OptionSet>,
}

impl AnswerKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, rejecting a question listed twice.
    pub fn from_entries(entries: impl IntoIterator<Item = KeyEntry>) -> Result<Self, ScoringError> {
        let mut key = AnswerKey::new();
        for entry in entries {
            if key.answers.insert(entry.question.clone(), entry.answer).is_some() {
                return Err(ScoringError::DuplicateQuestion(entry.question));
            }
        }
        Ok(key)
    }

    /// Build from per-subject option code lists, as written in key files.
    pub fn from_codes(exam: &Exam, codes: &BTreeMap<String, Vec<u32>>) -> Result<Self, ScoringError> {
        let mut key = AnswerKey::new();
        for (code, options) in codes {
            let subject = exam.subject(code).ok_or_else(|| {
                ScoringError::Validation(format!("exam {} has no subject {code}", exam.id))
            })?;
            if options.len() != subject.question_count as usize {
                return Err(ScoringError::Validation(format!(
                    "key for {code} lists {} answers, subject has {} questions",
                    options.len(),
                    subject.question_count
                )));
            }
            for (question, &option) in subject.questions().zip(options) {
                key.insert(question, OptionSet::from_code(option, exam.option_count)?);
            }
        }
        Ok(key)
    }

    /// Key of the determined predictions; undetermined questions credit nobody.
    pub fn from_predictions(predictions: &[PredictedAnswer]) -> Self {
        let answers = predictions
            .iter()
            .filter_map(|p| match p.prediction {
                Prediction::Option(o) => Some((p.question.clone(), OptionSet::single(o))),
                Prediction::Undetermined => None,
            })
            .collect();
        Self { answers }
    }

    pub fn insert(&mut self, question: QuestionId, answer: OptionSet) -> Option<OptionSet> {
        self.answers.insert(question, answer)
    }

    pub fn get(&self, question: &QuestionId) -> Option<OptionSet> {
        self.answers.get(question).copied()
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuestionId, OptionSet)> {
        self.answers.iter().map(|(q, a)| (q, *a))
    }

    /// Whether this key may be scored against at `now`: the release time has
    /// passed and every question of the exam has a value.
    pub fn ensure_released(&self, exam: &Exam, now: DateTime<Utc>) -> Result<(), ScoringError> {
        let incomplete = |reason: String| ScoringError::IncompleteKey {
            exam_id: exam.id.clone(),
            reason,
        };
        if !exam.schedule.is_official_key_open(now) {
            return Err(incomplete(format!(
                "not released until {}",
                exam.schedule.official_key_opened_at
            )));
        }
        let missing = exam.questions().filter(|q| !self.answers.contains_key(q)).count();
        if missing > 0 {
            return Err(incomplete(format!("{missing} question(s) have no answer")));
        }
        Ok(())
    }
}

impl TryFrom<Vec<KeyEntry>> for AnswerKey {
    type Error = ScoringError;

    fn try_from(entries: Vec<KeyEntry>) -> Result<Self, Self::Error> {
        AnswerKey::from_entries(entries)
    }
}

impl From<AnswerKey> for Vec<KeyEntry> {
    fn from(key: AnswerKey) -> Self {
        key.answers
            .into_iter()
            .map(|(question, answer)| KeyEntry { question, answer })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn tally(codes: &[u32]) -> TallyRecord {
        let mut tally = TallyRecord::new(QuestionId::new("logic", 1), Band::All, FilterState::All, 5);
        for &code in codes {
            tally.record_answer(code).unwrap();
        }
        tally
    }

    #[test]
    fn predicted_option_is_the_mode() {
        assert_eq!(predicted_option(&tally(&[1, 2, 2, 3])), Prediction::Option(2));
    }

    #[test]
    fn ties_go_to_the_lowest_option() {
        assert_eq!(predicted_option(&tally(&[4, 2, 4, 2])), Prediction::Option(2));
    }

    #[test]
    fn empty_tally_is_undetermined() {
        assert_eq!(predicted_option(&tally(&[])), Prediction::Undetermined);
    }

    #[test]
    fn blank_and_multi_marks_do_not_vote() {
        assert_eq!(predicted_option(&tally(&[0, 13])), Prediction::Undetermined);
        assert_eq!(predicted_option(&tally(&[0, 13, 3])), Prediction::Option(3));
    }

    #[test]
    fn predicted_key_skips_band_and_filtered_tallies() {
        let mut filtered = tally(&[3]);
        filtered.filter = FilterState::Filtered;
        let mut top = tally(&[4]);
        top.band = Band::Top;
        let answers = derive_predicted_key(&[tally(&[2]), filtered, top]);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].prediction, Prediction::Option(2));
    }

    #[test]
    fn from_codes_checks_subjects_and_counts() {
        let exam = exam(vec![subject("logic", 3)]);
        let mut codes = BTreeMap::new();
        codes.insert("logic".to_string(), vec![1, 2, 24]);
        let key = AnswerKey::from_codes(&exam, &codes).unwrap();
        assert_eq!(key.len(), 3);
        assert!(key.get(&QuestionId::new("logic", 3)).unwrap().contains(4));

        codes.insert("logic".to_string(), vec![1, 2]);
        assert!(AnswerKey::from_codes(&exam, &codes).is_err());

        codes.insert("logic".to_string(), vec![1, 0, 2]);
        assert!(matches!(
            AnswerKey::from_codes(&exam, &codes),
            Err(ScoringError::InvalidOption { code: 0, .. })
        ));
    }

    #[test]
    fn release_requires_time_and_completeness() {
        let exam = exam(vec![subject("logic", 2)]);
        let mut key = AnswerKey::new();
        key.insert(QuestionId::new("logic", 1), OptionSet::single(1));
        key.insert(QuestionId::new("logic", 2), OptionSet::single(3));

        assert!(matches!(
            key.ensure_released(&exam, at(11)),
            Err(ScoringError::IncompleteKey { .. })
        ));
        assert!(key.ensure_released(&exam, at(12)).is_ok());

        let partial = AnswerKey::from_predictions(&[PredictedAnswer {
            question: QuestionId::new("logic", 1),
            prediction: Prediction::Option(1),
        }]);
        let err = partial.ensure_released(&exam, at(13)).unwrap_err();
        assert!(err.to_string().contains("1 question(s) have no answer"));
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let entry = KeyEntry {
            question: QuestionId::new("logic", 1),
            answer: OptionSet::single(2),
        };
        assert_eq!(
            AnswerKey::from_entries(vec![entry.clone(), entry.clone()]),
            Err(ScoringError::DuplicateQuestion(entry.question))
        );
    }

    #[test]
    fn key_serializes_as_entry_list() {
        let mut key = AnswerKey::new();
        key.insert(QuestionId::new("logic", 1), OptionSet::from_code(13, 5).unwrap());
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"[{"question":{"subject":"logic","number":1},"answer":13}]"#);
        let back: AnswerKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}

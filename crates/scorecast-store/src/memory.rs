//! In-memory exam store.
//!
//! All state sits behind one async mutex, which makes confirmation (check,
//! answer writes, tally increments) and versioned batch writes atomic.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use scorecast_core::error::{ScoringError, StoreError};
use scorecast_core::key::AnswerKey;
use scorecast_core::model::{AnswerRecord, Candidate, Exam, FilterState, Mark, QuestionId};
use scorecast_core::parser::validate_exam;
use scorecast_core::tally::{Band, TallyRecord};
use scorecast_core::traits::{
    ConfirmReceipt, ConfirmedSubject, DerivedState, ExamSnapshot, ExamStore, WriteBatch,
};

/// Everything stored for one exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamState {
    pub exam: Exam,
    /// Candidates in registration order.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    #[serde(default)]
    pub official_key: Option<AnswerKey>,
    #[serde(default)]
    pub ledger_version: u64,
    #[serde(default)]
    pub derived: DerivedState,
}

impl ExamState {
    fn new(exam: Exam) -> Self {
        Self {
            exam,
            candidates: Vec::new(),
            answers: Vec::new(),
            official_key: None,
            ledger_version: 0,
            derived: DerivedState::default(),
        }
    }

    fn candidate_mut(&mut self, id: u64) -> Result<&mut Candidate, StoreError> {
        let exam_id = &self.exam.id;
        self.candidates
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("candidate {id} in exam {exam_id}")))
    }

    fn find_overall(&self, question: &QuestionId) -> Option<&TallyRecord> {
        self.derived.tallies.iter().find(|t| {
            &t.question == question && t.band == Band::All && t.filter == FilterState::All
        })
    }

    /// The overall, unfiltered tally of `question`, created on first use.
    fn overall_tally(&mut self, question: &QuestionId) -> &mut TallyRecord {
        let position = self.derived.tallies.iter().position(|t| {
            &t.question == question && t.band == Band::All && t.filter == FilterState::All
        });
        let index = match position {
            Some(index) => index,
            None => {
                self.derived.tallies.push(TallyRecord::new(
                    question.clone(),
                    Band::All,
                    FilterState::All,
                    self.exam.option_count,
                ));
                self.derived.tallies.len() - 1
            }
        };
        &mut self.derived.tallies[index]
    }
}

/// Serialized form of a whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub exams: Vec<ExamState>,
}

/// A store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<BTreeMap<String, ExamState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from its serialized form, rejecting duplicates.
    pub fn from_document(document: StoreDocument) -> Result<Self, StoreError> {
        let mut exams = BTreeMap::new();
        for state in document.exams {
            check_unique(&state)?;
            let id = state.exam.id.clone();
            if exams.insert(id.clone(), state).is_some() {
                return Err(StoreError::IntegrityConflict(format!("duplicate exam {id}")));
            }
        }
        Ok(Self {
            state: Mutex::new(exams),
        })
    }

    pub async fn to_document(&self) -> StoreDocument {
        let state = self.state.lock().await;
        StoreDocument {
            exams: state.values().cloned().collect(),
        }
    }
}

fn check_unique(state: &ExamState) -> Result<(), StoreError> {
    let exam_id = &state.exam.id;
    let mut candidates = HashSet::new();
    for candidate in &state.candidates {
        if !candidates.insert(candidate.id) {
            return Err(StoreError::IntegrityConflict(format!(
                "duplicate candidate {} in exam {exam_id}",
                candidate.id
            )));
        }
    }
    let mut answers = HashSet::new();
    for answer in &state.answers {
        if !answers.insert((answer.candidate_id, &answer.question)) {
            return Err(StoreError::IntegrityConflict(format!(
                "duplicate answer of candidate {} to {} in exam {exam_id}",
                answer.candidate_id, answer.question
            )));
        }
    }
    Ok(())
}

/// A redefinition must still admit every stored answer and category.
fn check_redefinition(existing: &ExamState, exam: &Exam) -> Result<(), StoreError> {
    for answer in &existing.answers {
        if !exam.has_question(&answer.question) {
            return Err(StoreError::IntegrityConflict(format!(
                "exam {} no longer has question {} answered by candidate {}",
                exam.id, answer.question, answer.candidate_id
            )));
        }
        if Mark::parse(answer.mark.code(), exam.option_count).is_err() {
            return Err(StoreError::IntegrityConflict(format!(
                "answer {} of candidate {} to {} exceeds {} options",
                answer.mark.code(),
                answer.candidate_id,
                answer.question,
                exam.option_count
            )));
        }
    }
    for candidate in &existing.candidates {
        if let Some(category) = &candidate.category {
            if !exam.has_category(category) {
                return Err(StoreError::IntegrityConflict(format!(
                    "exam {} no longer has category {category} of candidate {}",
                    exam.id, candidate.id
                )));
            }
        }
    }
    Ok(())
}

fn exam_state<'a>(
    state: &'a mut BTreeMap<String, ExamState>,
    exam_id: &str,
) -> Result<&'a mut ExamState, StoreError> {
    state
        .get_mut(exam_id)
        .ok_or_else(|| StoreError::NotFound(format!("exam {exam_id}")))
}

#[async_trait]
impl ExamStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_exam(&self, exam: Exam) -> Result<(), StoreError> {
        let warnings = validate_exam(&exam);
        if !warnings.is_empty() {
            let message = warnings
                .iter()
                .map(|w| w.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ScoringError::Validation(message).into());
        }

        let mut state = self.state.lock().await;
        match state.get_mut(&exam.id) {
            Some(existing) => {
                check_redefinition(existing, &exam)?;
                tracing::info!("updating exam definition {}", exam.id);
                existing.exam = exam;
                existing.ledger_version += 1;
            }
            None => {
                tracing::info!("adding exam {}", exam.id);
                state.insert(exam.id.clone(), ExamState::new(exam));
            }
        }
        Ok(())
    }

    async fn exam(&self, exam_id: &str) -> Result<Exam, StoreError> {
        let mut state = self.state.lock().await;
        Ok(exam_state(&mut state, exam_id)?.exam.clone())
    }

    async fn exam_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.lock().await.keys().cloned().collect())
    }

    async fn register_candidate(&self, candidate: Candidate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let exam = exam_state(&mut state, &candidate.exam_id)?;

        if exam.candidates.iter().any(|c| c.id == candidate.id) {
            return Err(StoreError::IntegrityConflict(format!(
                "candidate {} already registered for exam {}",
                candidate.id, exam.exam.id
            )));
        }
        if let Some(category) = &candidate.category {
            if !exam.exam.has_category(category) {
                return Err(ScoringError::Validation(format!(
                    "exam {} has no category {category}",
                    exam.exam.id
                ))
                .into());
            }
        }

        exam.candidates.push(candidate);
        exam.ledger_version += 1;
        Ok(())
    }

    async fn confirm_subject(
        &self,
        confirmed: ConfirmedSubject,
    ) -> Result<ConfirmReceipt, StoreError> {
        let mut state = self.state.lock().await;
        let exam = exam_state(&mut state, &confirmed.exam_id)?;
        let candidate_id = confirmed.candidate_id;

        let candidate = exam.candidate_mut(candidate_id)?;
        if candidate.is_confirmed(&confirmed.subject) {
            return Err(StoreError::AlreadyConfirmed {
                candidate_id,
                subject: confirmed.subject,
            });
        }

        // Validate the whole batch before touching anything
        let mut tallies: BTreeMap<QuestionId, TallyRecord> = BTreeMap::new();
        for answer in &confirmed.answers {
            if answer.candidate_id != candidate_id
                || answer.question.subject != confirmed.subject
                || !exam.exam.has_question(&answer.question)
            {
                return Err(ScoringError::Validation(format!(
                    "answer to {} does not belong to this batch",
                    answer.question
                ))
                .into());
            }
            if exam
                .answers
                .iter()
                .any(|a| a.candidate_id == candidate_id && a.question == answer.question)
            {
                return Err(StoreError::IntegrityConflict(format!(
                    "candidate {candidate_id} already answered {}",
                    answer.question
                )));
            }
            if tallies.contains_key(&answer.question) {
                return Err(StoreError::IntegrityConflict(format!(
                    "question {} appears twice in the batch",
                    answer.question
                )));
            }
            let mut tally = exam.find_overall(&answer.question).cloned().unwrap_or_else(|| {
                TallyRecord::new(
                    answer.question.clone(),
                    Band::All,
                    FilterState::All,
                    exam.exam.option_count,
                )
            });
            tally.record_mark(answer.mark)?;
            tallies.insert(answer.question.clone(), tally);
        }

        let answers_written = confirmed.answers.len();
        for (question, tally) in tallies {
            *exam.overall_tally(&question) = tally;
        }
        exam.answers.extend(confirmed.answers);

        let definition = &exam.exam;
        let candidate = exam
            .candidates
            .iter_mut()
            .find(|c| c.id == candidate_id)
            .ok_or_else(|| StoreError::NotFound(format!("candidate {candidate_id}")))?;
        candidate
            .confirmed_at
            .insert(confirmed.subject, confirmed.confirmed_at);
        let all_confirmed_at = candidate.all_confirmed_at(definition);

        exam.ledger_version += 1;
        Ok(ConfirmReceipt {
            ledger_version: exam.ledger_version,
            answers_written,
            all_confirmed_at,
        })
    }

    async fn correct_answer(&self, exam_id: &str, answer: AnswerRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let exam = exam_state(&mut state, exam_id)?;

        let index = exam
            .answers
            .iter()
            .position(|a| a.candidate_id == answer.candidate_id && a.question == answer.question)
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "answer of candidate {} to {}",
                    answer.candidate_id, answer.question
                ))
            })?;
        let previous: Mark = exam.answers[index].mark;

        let mut tally = exam.overall_tally(&answer.question).clone();
        tally.withdraw_mark(previous)?;
        tally.record_mark(answer.mark)?;
        *exam.overall_tally(&answer.question) = tally;

        exam.answers[index] = answer;
        exam.ledger_version += 1;
        Ok(())
    }

    async fn publish_official_key(&self, exam_id: &str, key: AnswerKey) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let exam = exam_state(&mut state, exam_id)?;

        if let Some((question, _)) = key.iter().find(|(q, _)| !exam.exam.has_question(q)) {
            return Err(ScoringError::Validation(format!(
                "key lists {question}, which exam {exam_id} does not have"
            ))
            .into());
        }

        tracing::info!("official key for {exam_id} published ({} answers)", key.len());
        exam.official_key = Some(key);
        exam.ledger_version += 1;
        Ok(())
    }

    async fn snapshot(&self, exam_id: &str) -> Result<ExamSnapshot, StoreError> {
        let mut state = self.state.lock().await;
        let exam = exam_state(&mut state, exam_id)?;
        Ok(ExamSnapshot {
            exam: exam.exam.clone(),
            candidates: exam.candidates.clone(),
            answers: exam.answers.clone(),
            official_key: exam.official_key.clone(),
            ledger_version: exam.ledger_version,
        })
    }

    async fn derived(&self, exam_id: &str) -> Result<DerivedState, StoreError> {
        let mut state = self.state.lock().await;
        Ok(exam_state(&mut state, exam_id)?.derived.clone())
    }

    async fn apply(
        &self,
        exam_id: &str,
        expected_version: u64,
        batch: WriteBatch,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let exam = exam_state(&mut state, exam_id)?;

        if exam.ledger_version != expected_version {
            return Err(StoreError::StaleWrite {
                exam_id: exam_id.to_string(),
                expected: expected_version,
                actual: exam.ledger_version,
            });
        }

        match batch {
            WriteBatch::Tallies(changes) => changes.apply_to(&mut exam.derived.tallies),
            WriteBatch::PredictedKey(changes) => changes.apply_to(&mut exam.derived.predicted),
            WriteBatch::Scores(changes) => changes.apply_to(&mut exam.derived.scores),
            WriteBatch::Ranks(changes) => changes.apply_to(&mut exam.derived.ranks),
            WriteBatch::Statistics(changes) => changes.apply_to(&mut exam.derived.statistics),
            WriteBatch::FilterFlags(flags) => {
                if let Some(unknown) = flags
                    .iter()
                    .find(|f| !exam.candidates.iter().any(|c| c.id == f.candidate_id))
                {
                    return Err(StoreError::NotFound(format!(
                        "candidate {} in exam {exam_id}",
                        unknown.candidate_id
                    )));
                }
                for flag in flags {
                    exam.candidate_mut(flag.candidate_id)?.is_filtered = flag.is_filtered;
                }
            }
        }
        Ok(())
    }
}

//! Core data model types for scorecast.
//!
//! An [`Exam`] is the configuration that every engine component is
//! parameterized by: its subjects, their scoring units, the aggregate
//! formula and the declared candidate categories.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Candidate identifier, unique within an exam.
pub type CandidateId = u64;

/// Largest option count an exam may declare; option codes are decimal digits.
pub const MAX_OPTIONS: u8 = 9;

/// One question, addressed by subject code and ordinal number (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionId {
    pub subject: String,
    pub number: u32,
}

impl QuestionId {
    pub fn new(subject: impl Into<String>, number: u32) -> Self {
        Self {
            subject: subject.into(),
            number,
        }
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.subject, self.number)
    }
}

impl FromStr for QuestionId {
    type Err = String;

    /// Parse the `subject-number` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (subject, number) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("expected subject-number, got {s}"))?;
        let number: u32 = number
            .parse()
            .map_err(|_| format!("invalid question number in {s}"))?;
        if subject.is_empty() || number == 0 {
            return Err(format!("invalid question id: {s}"));
        }
        Ok(QuestionId::new(subject, number))
    }
}

/// A set of options, stored as a bitmask where bit `n` is option `n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct OptionSet(u16);

impl OptionSet {
    pub fn single(option: u8) -> Self {
        Self(1 << option)
    }

    pub fn contains(self, option: u8) -> bool {
        option <= MAX_OPTIONS && self.0 & (1 << option) != 0
    }

    pub fn insert(&mut self, option: u8) {
        self.0 |= 1 << option;
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Options in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (1..=MAX_OPTIONS).filter(move |&o| self.contains(o))
    }

    /// Decimal code: the options' digits in ascending order (`{1, 3}` → `13`).
    pub fn code(self) -> u32 {
        self.iter().fold(0, |acc, o| acc * 10 + o as u32)
    }

    /// Parse a non-blank option code for questions with `option_count` options.
    ///
    /// Accepts a single option `1..=option_count` or two or more distinct
    /// options written as strictly ascending digits.
    pub fn from_code(code: u32, option_count: u8) -> Result<Self, ScoringError> {
        let invalid = || ScoringError::InvalidOption { code, option_count };
        if code == 0 {
            return Err(invalid());
        }

        let mut set = OptionSet::default();
        let mut previous = 0u8;
        for digit in code.to_string().bytes().map(|b| b - b'0') {
            if digit == 0 || digit > option_count || digit <= previous {
                return Err(invalid());
            }
            set.insert(digit);
            previous = digit;
        }
        Ok(set)
    }
}

impl TryFrom<u32> for OptionSet {
    type Error = ScoringError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        OptionSet::from_code(code, MAX_OPTIONS)
    }
}

impl From<OptionSet> for u32 {
    fn from(set: OptionSet) -> Self {
        set.code()
    }
}

impl fmt::Display for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What a candidate marked on one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Mark {
    Blank,
    Single(u8),
    Multiple(OptionSet),
}

impl Mark {
    /// Parse a submitted option code (`0` is blank).
    pub fn parse(code: u32, option_count: u8) -> Result<Self, ScoringError> {
        if code == 0 {
            return Ok(Mark::Blank);
        }
        let set = OptionSet::from_code(code, option_count)?;
        Ok(match set.len() {
            1 => Mark::Single(code as u8),
            _ => Mark::Multiple(set),
        })
    }

    pub fn code(self) -> u32 {
        match self {
            Mark::Blank => 0,
            Mark::Single(option) => option as u32,
            Mark::Multiple(set) => set.code(),
        }
    }

    /// A single mark inside the key's credited set earns credit.
    /// Blank and multi-marked answers never do.
    pub fn is_credited_by(self, key: OptionSet) -> bool {
        matches!(self, Mark::Single(option) if key.contains(option))
    }
}

impl TryFrom<u32> for Mark {
    type Error = ScoringError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Mark::parse(code, MAX_OPTIONS)
    }
}

impl From<Mark> for u32 {
    fn from(mark: Mark) -> Self {
        mark.code()
    }
}

/// Lifecycle timestamps of an exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSchedule {
    pub page_opened_at: DateTime<Utc>,
    pub exam_started_at: DateTime<Utc>,
    pub exam_finished_at: DateTime<Utc>,
    pub predicted_key_opened_at: DateTime<Utc>,
    pub official_key_opened_at: DateTime<Utc>,
    pub predict_closed_at: DateTime<Utc>,
}

impl ExamSchedule {
    /// The phase the exam is in at `now`.
    pub fn phase(&self, now: DateTime<Utc>) -> ExamPhase {
        if now <= self.page_opened_at {
            ExamPhase::NotOpened
        } else if now <= self.exam_started_at {
            ExamPhase::NotStarted
        } else if now <= self.exam_finished_at {
            ExamPhase::InProgress
        } else if now <= self.predicted_key_opened_at {
            ExamPhase::CollectingAnswers
        } else if now < self.official_key_opened_at {
            ExamPhase::PredictedKeyOpen
        } else if now < self.predict_closed_at {
            ExamPhase::OfficialKeyOpen
        } else {
            ExamPhase::Closed
        }
    }

    /// Answers are collected from the end of the exam until prediction closes.
    pub fn accepts_submissions(&self, now: DateTime<Utc>) -> bool {
        self.exam_finished_at < now && now < self.predict_closed_at
    }

    pub fn is_official_key_open(&self, now: DateTime<Utc>) -> bool {
        self.official_key_opened_at <= now
    }

    /// Timestamps in declaration order, for ordering checks.
    pub(crate) fn ordered(&self) -> [(&'static str, DateTime<Utc>); 6] {
        [
            ("page_opened_at", self.page_opened_at),
            ("exam_started_at", self.exam_started_at),
            ("exam_finished_at", self.exam_finished_at),
            ("predicted_key_opened_at", self.predicted_key_opened_at),
            ("official_key_opened_at", self.official_key_opened_at),
            ("predict_closed_at", self.predict_closed_at),
        ]
    }
}

/// Where an exam is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamPhase {
    NotOpened,
    NotStarted,
    InProgress,
    CollectingAnswers,
    PredictedKeyOpen,
    OfficialKeyOpen,
    Closed,
}

impl fmt::Display for ExamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExamPhase::NotOpened => "not opened",
            ExamPhase::NotStarted => "not started",
            ExamPhase::InProgress => "in progress",
            ExamPhase::CollectingAnswers => "collecting answers",
            ExamPhase::PredictedKeyOpen => "predicted key open",
            ExamPhase::OfficialKeyOpen => "official key open",
            ExamPhase::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// One scored component of an exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Short code used in question ids and submissions.
    pub code: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Number of questions, numbered `1..=question_count`.
    pub question_count: u32,
    /// Points per correct answer (defaults to `100 / question_count`).
    #[serde(default)]
    pub scoring_unit: Option<f64>,
    /// Whether this subject contributes to the aggregate score.
    #[serde(default = "default_true")]
    pub in_aggregate: bool,
    /// Weight in the aggregate formula.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Subject {
    pub fn unit(&self) -> f64 {
        self.scoring_unit
            .unwrap_or_else(|| 100.0 / self.question_count.max(1) as f64)
    }

    pub fn questions(&self) -> impl Iterator<Item = QuestionId> + '_ {
        (1..=self.question_count).map(|n| QuestionId::new(self.code.clone(), n))
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

/// How per-subject scores combine into the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFormula {
    /// Weighted sum of the in-aggregate subjects.
    Sum,
    /// Weighted sum divided by total weight, rounded to one decimal.
    Average,
}

impl fmt::Display for AggregateFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFormula::Sum => write!(f, "sum"),
            AggregateFormula::Average => write!(f, "average"),
        }
    }
}

impl FromStr for AggregateFormula {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sum" | "total" => Ok(AggregateFormula::Sum),
            "average" | "avg" | "mean" => Ok(AggregateFormula::Average),
            other => Err(format!("unknown aggregate formula: {other}")),
        }
    }
}

/// One exam instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    pub year: i32,
    pub kind: String,
    pub round: u32,
    /// Options per question (2..=9).
    pub option_count: u8,
    pub aggregate: AggregateFormula,
    pub schedule: ExamSchedule,
    pub subjects: Vec<Subject>,
    /// Declared candidate categories (departments, tracks).
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Exam {
    pub fn subject(&self, code: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.code == code)
    }

    /// Every question of the exam, subject by subject.
    pub fn questions(&self) -> impl Iterator<Item = QuestionId> + '_ {
        self.subjects.iter().flat_map(|s| s.questions())
    }

    pub fn question_count(&self) -> usize {
        self.subjects.iter().map(|s| s.question_count as usize).sum()
    }

    pub fn has_question(&self, question: &QuestionId) -> bool {
        self.subject(&question.subject)
            .is_some_and(|s| (1..=s.question_count).contains(&question.number))
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// Human-readable reference, e.g. `2025 psat #1`.
    pub fn reference(&self) -> String {
        format!("{} {} #{}", self.year, self.kind, self.round)
    }

    /// Every score field: each subject, then the aggregate.
    pub fn score_fields(&self) -> Vec<ScoreField> {
        self.subjects
            .iter()
            .map(|s| ScoreField::Subject(s.code.clone()))
            .chain(std::iter::once(ScoreField::Aggregate))
            .collect()
    }
}

/// One exam-taker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub exam_id: String,
    pub name: String,
    /// Declared category used for cohort ranking.
    #[serde(default)]
    pub category: Option<String>,
    /// Confirmation time per subject code.
    #[serde(default)]
    pub confirmed_at: BTreeMap<String, DateTime<Utc>>,
    /// Cached result of [`crate::cohort::is_filtered`], refreshed by reconcile.
    #[serde(default)]
    pub is_filtered: bool,
}

impl Candidate {
    pub fn new(
        id: CandidateId,
        exam_id: impl Into<String>,
        name: impl Into<String>,
        category: Option<String>,
    ) -> Self {
        Self {
            id,
            exam_id: exam_id.into(),
            name: name.into(),
            category,
            confirmed_at: BTreeMap::new(),
            is_filtered: false,
        }
    }

    pub fn is_confirmed(&self, subject: &str) -> bool {
        self.confirmed_at.contains_key(subject)
    }

    /// Whether the candidate takes part in ranks and statistics.
    pub fn has_submitted(&self) -> bool {
        !self.confirmed_at.is_empty()
    }

    /// When the last subject was confirmed, if every subject is confirmed.
    pub fn all_confirmed_at(&self, exam: &Exam) -> Option<DateTime<Utc>> {
        exam.subjects
            .iter()
            .map(|s| self.confirmed_at.get(&s.code).copied())
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .max()
    }
}

/// One submitted answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub candidate_id: CandidateId,
    pub question: QuestionId,
    pub mark: Mark,
    pub recorded_at: DateTime<Utc>,
}

/// Which key a score, rank or statistic was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyContext {
    Predicted,
    Official,
}

impl fmt::Display for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyContext::Predicted => write!(f, "predicted"),
            KeyContext::Official => write!(f, "official"),
        }
    }
}

impl FromStr for KeyContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "predicted" | "predict" => Ok(KeyContext::Predicted),
            "official" => Ok(KeyContext::Official),
            other => Err(format!("unknown key context: {other}")),
        }
    }
}

/// Whether a cohort includes everyone or only the filtered candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterState {
    All,
    Filtered,
}

impl FilterState {
    pub const BOTH: [FilterState; 2] = [FilterState::All, FilterState::Filtered];
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterState::All => write!(f, "all"),
            FilterState::Filtered => write!(f, "filtered"),
        }
    }
}

/// The population a rank or statistic is computed over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortScope {
    Global,
    Category(String),
}

impl fmt::Display for CohortScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CohortScope::Global => write!(f, "global"),
            CohortScope::Category(name) => write!(f, "{name}"),
        }
    }
}

/// A subject score or the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreField {
    Subject(String),
    Aggregate,
}

impl fmt::Display for ScoreField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreField::Subject(code) => write!(f, "{code}"),
            ScoreField::Aggregate => write!(f, "aggregate"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn question_ids_parse_their_display_form() {
        let q: QuestionId = "logic-12".parse().unwrap();
        assert_eq!(q, QuestionId::new("logic", 12));
        assert_eq!(q.to_string().parse::<QuestionId>().unwrap(), q);
        assert!("logic".parse::<QuestionId>().is_err());
        assert!("logic-0".parse::<QuestionId>().is_err());
        assert!("-3".parse::<QuestionId>().is_err());
    }

    #[test]
    fn option_codes_parse() {
        assert_eq!(Mark::parse(0, 5).unwrap(), Mark::Blank);
        assert_eq!(Mark::parse(3, 5).unwrap(), Mark::Single(3));
        let multi = Mark::parse(135, 5).unwrap();
        assert!(matches!(multi, Mark::Multiple(set) if set.len() == 3));
        assert_eq!(multi.code(), 135);
    }

    #[test]
    fn non_canonical_codes_are_rejected() {
        for code in [6, 10, 21, 113, 56] {
            assert!(
                Mark::parse(code, 5).is_err(),
                "code {code} should be rejected"
            );
        }
    }

    #[test]
    fn only_single_marks_earn_credit() {
        let key = OptionSet::from_code(24, 5).unwrap();
        assert!(Mark::Single(2).is_credited_by(key));
        assert!(Mark::Single(4).is_credited_by(key));
        assert!(!Mark::Single(3).is_credited_by(key));
        assert!(!Mark::Blank.is_credited_by(key));
        assert!(!Mark::parse(24, 5).unwrap().is_credited_by(key));
    }

    #[test]
    fn mark_serializes_as_code() {
        let json = serde_json::to_string(&Mark::parse(13, 5).unwrap()).unwrap();
        assert_eq!(json, "13");
        let back: Mark = serde_json::from_str("4").unwrap();
        assert_eq!(back, Mark::Single(4));
        assert!(serde_json::from_str::<Mark>("31").is_err());
    }

    #[test]
    fn schedule_phases() {
        let s = schedule();
        assert_eq!(s.phase(at(0)), ExamPhase::NotOpened);
        assert_eq!(s.phase(at(3)), ExamPhase::InProgress);
        assert_eq!(s.phase(at(5)), ExamPhase::CollectingAnswers);
        assert_eq!(s.phase(at(9)), ExamPhase::PredictedKeyOpen);
        assert_eq!(s.phase(at(12)), ExamPhase::OfficialKeyOpen);
        assert_eq!(s.phase(at(20)), ExamPhase::Closed);
        assert!(!s.accepts_submissions(at(4)));
        assert!(s.accepts_submissions(at(13)));
        assert!(!s.accepts_submissions(at(20)));
    }

    #[test]
    fn all_confirmed_at_requires_every_subject() {
        let exam = exam(vec![subject("a", 2), subject("b", 2)]);
        let mut candidate = Candidate::new(1, &exam.id, "Kim", None);
        candidate.confirmed_at.insert("a".into(), at(6));
        assert_eq!(candidate.all_confirmed_at(&exam), None);
        candidate.confirmed_at.insert("b".into(), at(5));
        assert_eq!(candidate.all_confirmed_at(&exam), Some(at(6)));
    }

    #[test]
    fn default_scoring_unit_is_hundred_over_count() {
        let s = subject("a", 40);
        assert!((s.unit() - 2.5).abs() < f64::EPSILON);
        let fixed = Subject {
            scoring_unit: Some(4.0),
            ..subject("b", 25)
        };
        assert_eq!(fixed.unit(), 4.0);
    }

    #[test]
    fn aggregate_formula_parse() {
        assert_eq!(
            "avg".parse::<AggregateFormula>().unwrap(),
            AggregateFormula::Average
        );
        assert_eq!(AggregateFormula::Sum.to_string(), "sum");
        assert!("median".parse::<AggregateFormula>().is_err());
    }
}

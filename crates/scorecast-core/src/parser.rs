//! TOML exam definition and answer key parser.
//!
//! Loads exam definitions from TOML files and directories, and validates them.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{AggregateFormula, Exam, ExamSchedule, Subject, MAX_OPTIONS};

/// Intermediate TOML structure for parsing exam definition files.
#[derive(Debug, Deserialize)]
struct TomlExamFile {
    exam: TomlExamHeader,
    #[serde(default)]
    subjects: Vec<TomlSubject>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    #[serde(default)]
    id: Option<String>,
    year: i32,
    kind: String,
    round: u32,
    #[serde(default = "default_option_count")]
    option_count: u8,
    #[serde(default = "default_aggregate")]
    aggregate: String,
    #[serde(default)]
    categories: Vec<String>,
    schedule: TomlSchedule,
}

fn default_option_count() -> u8 {
    5
}

fn default_aggregate() -> String {
    "sum".to_string()
}

/// Timestamps are RFC 3339 strings.
#[derive(Debug, Deserialize)]
struct TomlSchedule {
    page_opened_at: String,
    exam_started_at: String,
    exam_finished_at: String,
    predicted_key_opened_at: String,
    official_key_opened_at: String,
    predict_closed_at: String,
}

#[derive(Debug, Deserialize)]
struct TomlSubject {
    code: String,
    #[serde(default)]
    name: Option<String>,
    question_count: u32,
    #[serde(default)]
    scoring_unit: Option<f64>,
    #[serde(default = "default_true")]
    in_aggregate: bool,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid {field}: {value:?} (expected RFC 3339)"))
}

/// Parse a single TOML file into an `Exam`.
pub fn parse_exam(path: &Path) -> Result<Exam> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read exam file: {}", path.display()))?;

    parse_exam_str(&content, path)
}

/// Parse a TOML string into an `Exam` (useful for testing).
pub fn parse_exam_str(content: &str, source_path: &Path) -> Result<Exam> {
    let parsed: TomlExamFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;
    let header = parsed.exam;

    let aggregate: AggregateFormula = header
        .aggregate
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{}", e))?;

    let s = &header.schedule;
    let schedule = ExamSchedule {
        page_opened_at: timestamp("page_opened_at", &s.page_opened_at)?,
        exam_started_at: timestamp("exam_started_at", &s.exam_started_at)?,
        exam_finished_at: timestamp("exam_finished_at", &s.exam_finished_at)?,
        predicted_key_opened_at: timestamp("predicted_key_opened_at", &s.predicted_key_opened_at)?,
        official_key_opened_at: timestamp("official_key_opened_at", &s.official_key_opened_at)?,
        predict_closed_at: timestamp("predict_closed_at", &s.predict_closed_at)?,
    };

    let subjects = parsed
        .subjects
        .into_iter()
        .map(|s| Subject {
            name: s.name.unwrap_or_else(|| s.code.clone()),
            code: s.code,
            question_count: s.question_count,
            scoring_unit: s.scoring_unit,
            in_aggregate: s.in_aggregate,
            weight: s.weight,
        })
        .collect();

    let id = header
        .id
        .unwrap_or_else(|| format!("{}-{}-{}", header.year, header.kind, header.round));

    Ok(Exam {
        id,
        year: header.year,
        kind: header.kind,
        round: header.round,
        option_count: header.option_count,
        aggregate,
        schedule,
        subjects,
        categories: header.categories,
    })
}

/// Recursively load all `.toml` exam files from a directory.
pub fn load_exam_directory(dir: &Path) -> Result<Vec<Exam>> {
    let mut exams = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            exams.extend(load_exam_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_exam(&path) {
                Ok(exam) => exams.push(exam),
                Err(e) => {
                    tracing::warn!("skipping {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(exams)
}

/// A parsed official key file.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyFile {
    /// Exam the key belongs to, if the file names one.
    #[serde(default)]
    pub exam: Option<String>,
    /// Option codes per subject, in question order.
    pub answers: BTreeMap<String, Vec<u32>>,
}

/// Parse an official key file.
pub fn parse_key_file(path: &Path) -> Result<KeyFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse TOML: {}", path.display()))
}

/// A warning from exam validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The subject code (if applicable).
    pub subject: Option<String>,
    /// Warning message.
    pub message: String,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "[{subject}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Validate an exam definition for common issues.
pub fn validate_exam(exam: &Exam) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let exam_warning = |message: String| ValidationWarning {
        subject: None,
        message,
    };

    if !(2..=MAX_OPTIONS).contains(&exam.option_count) {
        warnings.push(exam_warning(format!(
            "option_count must be between 2 and {MAX_OPTIONS}, got {}",
            exam.option_count
        )));
    }

    if exam.subjects.is_empty() {
        warnings.push(exam_warning("exam has no subjects".into()));
    }

    // Check for duplicate subject codes
    let mut seen = HashSet::new();
    for subject in &exam.subjects {
        if !seen.insert(&subject.code) {
            warnings.push(ValidationWarning {
                subject: Some(subject.code.clone()),
                message: format!("duplicate subject code: {}", subject.code),
            });
        }
        if subject.question_count == 0 {
            warnings.push(ValidationWarning {
                subject: Some(subject.code.clone()),
                message: "question_count is zero".into(),
            });
        }
        if subject.code.contains('-') || subject.code.trim().is_empty() {
            warnings.push(ValidationWarning {
                subject: Some(subject.code.clone()),
                message: "subject code must be non-empty and contain no '-'".into(),
            });
        }
        if subject.weight <= 0.0 {
            warnings.push(ValidationWarning {
                subject: Some(subject.code.clone()),
                message: format!("weight must be positive, got {}", subject.weight),
            });
        }
    }

    if !exam.subjects.is_empty() && !exam.subjects.iter().any(|s| s.in_aggregate) {
        warnings.push(exam_warning("no subject contributes to the aggregate".into()));
    }

    let mut seen = HashSet::new();
    for category in &exam.categories {
        if !seen.insert(category) {
            warnings.push(exam_warning(format!("duplicate category: {category}")));
        }
    }

    // Lifecycle timestamps must not go backwards
    for pair in exam.schedule.ordered().windows(2) {
        let (earlier, later) = (pair[0], pair[1]);
        if later.1 < earlier.1 {
            warnings.push(exam_warning(format!(
                "{} ({}) is before {} ({})",
                later.0, later.1, earlier.0, earlier.1
            )));
        }
    }

    warnings
}

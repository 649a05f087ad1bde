//! Per-question option tallies, overall and per percentile band.
//!
//! Submissions increment the overall tally as they arrive. Band tallies need
//! the candidates' aggregate ranks, which shift as more candidates submit, so
//! they are only ever produced by the batch recompute.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::changeset::Record;
use crate::error::ScoringError;
use crate::model::{
    AnswerRecord, CandidateId, Exam, FilterState, Mark, OptionSet, QuestionId,
};

/// Which slice of the candidate population a tally counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    /// Every candidate in the cohort.
    All,
    Top,
    Mid,
    Low,
}

impl Band {
    pub const PERCENTILE: [Band; 3] = [Band::Top, Band::Mid, Band::Low];
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Band::All => write!(f, "all"),
            Band::Top => write!(f, "top"),
            Band::Mid => write!(f, "mid"),
            Band::Low => write!(f, "low"),
        }
    }
}

/// Split points over aggregate-rank percentile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandSplit {
    /// Ranks up to `participants × top` are the top band.
    pub top: f64,
    /// Ranks up to `participants × mid` (and past `top`) are the mid band.
    pub mid: f64,
}

impl Default for BandSplit {
    fn default() -> Self {
        Self {
            top: 0.27,
            mid: 0.73,
        }
    }
}

impl BandSplit {
    pub fn band_of(&self, rank: u32, participants: u32) -> Band {
        let rank = rank as f64;
        let participants = participants as f64;
        if rank <= participants * self.top {
            Band::Top
        } else if rank <= participants * self.mid {
            Band::Mid
        } else {
            Band::Low
        }
    }
}

/// Option counters for one (question, band, filter state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyRecord {
    pub question: QuestionId,
    pub band: Band,
    pub filter: FilterState,
    /// `counts[i]` is the number of candidates who chose option `i + 1`.
    counts: Vec<u64>,
    blank: u64,
    multiple: u64,
    total: u64,
}

impl TallyRecord {
    pub fn new(question: QuestionId, band: Band, filter: FilterState, option_count: u8) -> Self {
        Self {
            question,
            band,
            filter,
            counts: vec![0; option_count as usize],
            blank: 0,
            multiple: 0,
            total: 0,
        }
    }

    /// Count one submitted option code.
    pub fn record_answer(&mut self, code: u32) -> Result<Mark, ScoringError> {
        let mark = Mark::parse(code, self.option_count())?;
        self.record_mark(mark)?;
        Ok(mark)
    }

    /// Count one already-parsed mark.
    pub fn record_mark(&mut self, mark: Mark) -> Result<(), ScoringError> {
        *self.counter_mut(mark)? += 1;
        self.total += 1;
        Ok(())
    }

    /// Undo one earlier [`record_mark`](Self::record_mark), for corrections.
    pub fn withdraw_mark(&mut self, mark: Mark) -> Result<(), ScoringError> {
        let counter = self.counter_mut(mark)?;
        if *counter > 0 {
            *counter -= 1;
            self.total -= 1;
        }
        Ok(())
    }

    fn counter_mut(&mut self, mark: Mark) -> Result<&mut u64, ScoringError> {
        let option_count = self.option_count();
        let invalid = ScoringError::InvalidOption {
            code: mark.code(),
            option_count,
        };
        match mark {
            Mark::Blank => Ok(&mut self.blank),
            Mark::Single(option) => self
                .counts
                .get_mut((option as usize).wrapping_sub(1))
                .ok_or(invalid),
            Mark::Multiple(set) => {
                if set.iter().any(|o| o > option_count) {
                    return Err(invalid);
                }
                Ok(&mut self.multiple)
            }
        }
    }

    pub fn option_count(&self) -> u8 {
        self.counts.len() as u8
    }

    pub fn count(&self, option: u8) -> u64 {
        (option as usize)
            .checked_sub(1)
            .and_then(|i| self.counts.get(i))
            .copied()
            .unwrap_or(0)
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn blank(&self) -> u64 {
        self.blank
    }

    pub fn multiple(&self) -> u64 {
        self.multiple
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Option counters plus blank plus multiple equal the running total.
    pub fn is_consistent(&self) -> bool {
        self.counts.iter().sum::<u64>() + self.blank + self.multiple == self.total
    }

    /// Share of candidates (in percent) who chose `option`.
    pub fn selection_rate(&self, option: u8) -> Option<f64> {
        (self.total > 0).then(|| self.count(option) as f64 * 100.0 / self.total as f64)
    }

    /// Share of candidates (in percent) whose answer the key credits.
    pub fn credited_rate(&self, key: OptionSet) -> Option<f64> {
        let credited: u64 = key.iter().map(|o| self.count(o)).sum();
        (self.total > 0).then(|| credited as f64 * 100.0 / self.total as f64)
    }
}

impl Record for TallyRecord {
    type Key = (QuestionId, Band, FilterState);

    fn key(&self) -> Self::Key {
        (self.question.clone(), self.band, self.filter)
    }
}

/// Percentile band of each candidate, per filter state.
#[derive(Debug, Default, Clone)]
pub struct BandMembership {
    bands: HashMap<(CandidateId, FilterState), Band>,
}

impl BandMembership {
    /// Build from aggregate ranks `(candidate, filter, rank, participants)`.
    pub fn from_ranks(
        ranks: impl IntoIterator<Item = (CandidateId, FilterState, u32, u32)>,
        split: BandSplit,
    ) -> Self {
        let bands = ranks
            .into_iter()
            .map(|(id, filter, rank, participants)| {
                ((id, filter), split.band_of(rank, participants))
            })
            .collect();
        Self { bands }
    }

    pub fn band(&self, candidate_id: CandidateId, filter: FilterState) -> Option<Band> {
        self.bands.get(&(candidate_id, filter)).copied()
    }
}

/// Overall (band [`Band::All`]) tallies for every question, both filter states.
pub fn tally_overall(
    exam: &Exam,
    answers: &[AnswerRecord],
    filtered: &HashSet<CandidateId>,
) -> Result<Vec<TallyRecord>, ScoringError> {
    let mut book = empty_book(exam, &[Band::All]);
    for answer in answers {
        if !exam.has_question(&answer.question) {
            tracing::warn!("ignoring answer to unknown question {}", answer.question);
            continue;
        }
        for filter in FilterState::BOTH {
            if filter == FilterState::Filtered && !filtered.contains(&answer.candidate_id) {
                continue;
            }
            if let Some(record) = book.get_mut(&(answer.question.clone(), Band::All, filter)) {
                record.record_mark(answer.mark)?;
            }
        }
    }
    Ok(book.into_values().collect())
}

/// Top/mid/low tallies for every question, both filter states.
pub fn tally_bands(
    exam: &Exam,
    answers: &[AnswerRecord],
    membership: &BandMembership,
) -> Result<Vec<TallyRecord>, ScoringError> {
    let mut book = empty_book(exam, &Band::PERCENTILE);
    for answer in answers {
        for filter in FilterState::BOTH {
            let Some(band) = membership.band(answer.candidate_id, filter) else {
                continue;
            };
            if let Some(record) = book.get_mut(&(answer.question.clone(), band, filter)) {
                record.record_mark(answer.mark)?;
            }
        }
    }
    Ok(book.into_values().collect())
}

/// Rebuild every tally from the ledger, correcting incremental drift.
pub fn recompute_from_ledger(
    exam: &Exam,
    answers: &[AnswerRecord],
    filtered: &HashSet<CandidateId>,
    membership: &BandMembership,
) -> Result<Vec<TallyRecord>, ScoringError> {
    let mut tallies = tally_overall(exam, answers, filtered)?;
    tallies.extend(tally_bands(exam, answers, membership)?);
    Ok(tallies)
}

fn empty_book(
    exam: &Exam,
    bands: &[Band],
) -> BTreeMap<(QuestionId, Band, FilterState), TallyRecord> {
    let mut book = BTreeMap::new();
    for question in exam.questions() {
        for &band in bands {
            for filter in FilterState::BOTH {
                book.insert(
                    (question.clone(), band, filter),
                    TallyRecord::new(question.clone(), band, filter, exam.option_count),
                );
            }
        }
    }
    book
}

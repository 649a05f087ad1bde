//! Cohort membership and the "filtered" population.
//!
//! A candidate is filtered when every subject was confirmed before the
//! official key opened, i.e. their answers could not have been influenced by
//! it. Filtered statistics and ranks only count these candidates.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::changeset::Record;
use crate::model::{Candidate, CandidateId, CohortScope, Exam, FilterState, ScoreField};

/// Whether `candidate` belongs to the filtered population of `exam`.
pub fn is_filtered(candidate: &Candidate, exam: &Exam) -> bool {
    candidate
        .all_confirmed_at(exam)
        .is_some_and(|t| t < exam.schedule.official_key_opened_at)
}

/// Refreshed value of a candidate's cached filter flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterFlag {
    pub candidate_id: CandidateId,
    pub is_filtered: bool,
}

impl Record for FilterFlag {
    type Key = CandidateId;

    fn key(&self) -> CandidateId {
        self.candidate_id
    }
}

/// Participating candidates of one exam, indexed for cohort lookups.
#[derive(Debug, Clone)]
pub struct Cohorts<'a> {
    exam: &'a Exam,
    participants: Vec<&'a Candidate>,
    filtered: HashSet<CandidateId>,
}

impl<'a> Cohorts<'a> {
    /// Candidates who confirmed at least one subject take part.
    pub fn new(exam: &'a Exam, candidates: &'a [Candidate]) -> Self {
        let participants: Vec<&Candidate> =
            candidates.iter().filter(|c| c.has_submitted()).collect();
        let filtered = participants
            .iter()
            .filter(|c| is_filtered(c, exam))
            .map(|c| c.id)
            .collect();
        Self {
            exam,
            participants,
            filtered,
        }
    }

    /// Global first, then every declared category.
    pub fn scopes(&self) -> Vec<CohortScope> {
        std::iter::once(CohortScope::Global)
            .chain(self.exam.categories.iter().cloned().map(CohortScope::Category))
            .collect()
    }

    pub fn filtered(&self) -> &HashSet<CandidateId> {
        &self.filtered
    }

    pub fn contains(&self, candidate: &Candidate, scope: &CohortScope, filter: FilterState) -> bool {
        let in_scope = match scope {
            CohortScope::Global => true,
            CohortScope::Category(name) => candidate.category.as_deref() == Some(name.as_str()),
        };
        let in_filter = match filter {
            FilterState::All => true,
            FilterState::Filtered => self.filtered.contains(&candidate.id),
        };
        in_scope && in_filter
    }

    /// Ids of the cohort members, in registration order.
    pub fn members(&self, scope: &CohortScope, filter: FilterState) -> Vec<CandidateId> {
        self.participants
            .iter()
            .filter(|c| self.contains(c, scope, filter))
            .map(|c| c.id)
            .collect()
    }

    /// Whether `candidate` has a score on `field`: the subject is confirmed,
    /// or for the aggregate every subject is.
    pub fn sat(&self, candidate: &Candidate, field: &ScoreField) -> bool {
        match field {
            ScoreField::Subject(code) => candidate.confirmed_at.contains_key(code),
            ScoreField::Aggregate => candidate.all_confirmed_at(self.exam).is_some(),
        }
    }

    /// Cohort members who sat `field`, in registration order.
    pub fn field_members(
        &self,
        scope: &CohortScope,
        filter: FilterState,
        field: &ScoreField,
    ) -> Vec<CandidateId> {
        self.participants
            .iter()
            .filter(|c| self.contains(c, scope, filter) && self.sat(c, field))
            .map(|c| c.id)
            .collect()
    }

    /// Flags for every registered candidate, participating or not.
    pub fn flags(exam: &Exam, candidates: &[Candidate]) -> Vec<FilterFlag> {
        candidates
            .iter()
            .map(|c| FilterFlag {
                candidate_id: c.id,
                is_filtered: is_filtered(c, exam),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn candidate(id: CandidateId, category: Option<&str>, confirmed: &[(&str, u32)]) -> Candidate {
        let mut c = Candidate::new(id, "2025-test-1", format!("c{id}"), category.map(String::from));
        for &(subject, hour) in confirmed {
            c.confirmed_at.insert(subject.into(), at(hour));
        }
        c
    }

    #[test]
    fn filtered_requires_all_subjects_before_official_key() {
        let exam = exam(vec![subject("a", 1), subject("b", 1)]);
        assert!(is_filtered(&candidate(1, None, &[("a", 5), ("b", 11)]), &exam));
        // official key opens at hour 12; equal is not strictly earlier
        assert!(!is_filtered(&candidate(2, None, &[("a", 5), ("b", 12)]), &exam));
        assert!(!is_filtered(&candidate(3, None, &[("a", 5)]), &exam));
        assert!(!is_filtered(&candidate(4, None, &[]), &exam));
    }

    #[test]
    fn members_respect_scope_and_filter() {
        let exam = exam(vec![subject("a", 1)]);
        let candidates = vec![
            candidate(1, Some("north"), &[("a", 5)]),
            candidate(2, Some("south"), &[("a", 13)]),
            candidate(3, None, &[("a", 6)]),
            candidate(4, Some("north"), &[]),
        ];
        let cohorts = Cohorts::new(&exam, &candidates);

        assert_eq!(cohorts.members(&CohortScope::Global, FilterState::All), vec![1, 2, 3]);
        assert_eq!(cohorts.members(&CohortScope::Global, FilterState::Filtered), vec![1, 3]);
        let north = CohortScope::Category("north".into());
        assert_eq!(cohorts.members(&north, FilterState::All), vec![1]);
        let south = CohortScope::Category("south".into());
        assert!(cohorts.members(&south, FilterState::Filtered).is_empty());
    }

    #[test]
    fn filtered_members_are_a_subset_of_all_members() {
        let exam = exam(vec![subject("a", 1)]);
        let candidates: Vec<Candidate> = (1..=10)
            .map(|id| candidate(id, Some("north"), &[("a", 4 + id as u32)]))
            .collect();
        let cohorts = Cohorts::new(&exam, &candidates);
        for scope in cohorts.scopes() {
            let all = cohorts.members(&scope, FilterState::All);
            for id in cohorts.members(&scope, FilterState::Filtered) {
                assert!(all.contains(&id));
            }
        }
    }

    #[test]
    fn field_members_only_count_confirmed_subjects() {
        let exam = exam(vec![subject("a", 1), subject("b", 1)]);
        let candidates = vec![
            candidate(1, Some("north"), &[("a", 5), ("b", 6)]),
            candidate(2, Some("north"), &[("a", 5)]),
            candidate(3, Some("north"), &[("b", 13)]),
        ];
        let cohorts = Cohorts::new(&exam, &candidates);
        let global = CohortScope::Global;

        assert_eq!(cohorts.members(&global, FilterState::All), vec![1, 2, 3]);
        let a = ScoreField::Subject("a".into());
        let b = ScoreField::Subject("b".into());
        assert_eq!(cohorts.field_members(&global, FilterState::All, &a), vec![1, 2]);
        assert_eq!(cohorts.field_members(&global, FilterState::All, &b), vec![1, 3]);
        assert_eq!(
            cohorts.field_members(&global, FilterState::All, &ScoreField::Aggregate),
            vec![1]
        );
        assert_eq!(cohorts.field_members(&global, FilterState::Filtered, &b), vec![1]);
    }

    #[test]
    fn flags_cover_every_registered_candidate() {
        let exam = exam(vec![subject("a", 1)]);
        let candidates = vec![candidate(1, None, &[("a", 5)]), candidate(2, None, &[])];
        let flags = Cohorts::flags(&exam, &candidates);
        assert_eq!(
            flags,
            vec![
                FilterFlag { candidate_id: 1, is_filtered: true },
                FilterFlag { candidate_id: 2, is_filtered: false },
            ]
        );
    }
}

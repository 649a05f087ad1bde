//! Competition ranking within cohorts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::changeset::Record;
use crate::model::{CandidateId, CohortScope, FilterState, KeyContext, ScoreField};
use crate::scorer::ScoreRecord;

/// Standard competition ranks ("1224"), highest score first.
///
/// Tied scores share the best rank; the next distinct score resumes at its
/// position, so two candidates tied at 3 are followed by rank 5. Output is
/// ordered by rank, ties in input order.
pub fn competition_ranks(scores: &[(CandidateId, f64)]) -> Vec<(CandidateId, u32)> {
    let mut order: Vec<&(CandidateId, f64)> = scores.iter().collect();
    order.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut ranks = Vec::with_capacity(order.len());
    let mut previous: Option<(f64, u32)> = None;
    for (position, &&(id, score)) in order.iter().enumerate() {
        let rank = match previous {
            Some((prev_score, prev_rank)) if prev_score == score => prev_rank,
            _ => position as u32 + 1,
        };
        previous = Some((score, rank));
        ranks.push((id, rank));
    }
    ranks
}

/// A rank and the size of the population it was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRank {
    pub rank: u32,
    pub participants: u32,
}

/// One candidate's ranks in one cohort under one key context.
///
/// A subject is ranked only among members who confirmed it, and the
/// aggregate only among members who confirmed every subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRecord {
    pub candidate_id: CandidateId,
    pub context: KeyContext,
    pub scope: CohortScope,
    pub filter: FilterState,
    /// Rank per confirmed subject code.
    pub subjects: BTreeMap<String, FieldRank>,
    pub aggregate: Option<FieldRank>,
}

impl RankRecord {
    pub fn field(&self, field: &ScoreField) -> Option<FieldRank> {
        match field {
            ScoreField::Subject(code) => self.subjects.get(code).copied(),
            ScoreField::Aggregate => self.aggregate,
        }
    }
}

impl Record for RankRecord {
    type Key = (CandidateId, KeyContext, CohortScope, FilterState);

    fn key(&self) -> Self::Key {
        (self.candidate_id, self.context, self.scope.clone(), self.filter)
    }
}

/// Ranks of one score field across a cohort's score records.
pub fn rank_field(scores: &[&ScoreRecord], field: &ScoreField) -> Vec<(CandidateId, u32)> {
    let values: Vec<(CandidateId, f64)> = scores
        .iter()
        .map(|s| (s.candidate_id(), s.field(field)))
        .collect();
    competition_ranks(&values)
}

/// Rank records for every member of one cohort.
///
/// `members` must hold exactly the cohort's records for `context`; each
/// entry of `fields` pairs a score field with the members ranked on it.
pub fn rank_cohort(
    members: &[&ScoreRecord],
    fields: &[(ScoreField, Vec<&ScoreRecord>)],
    context: KeyContext,
    scope: &CohortScope,
    filter: FilterState,
) -> Vec<RankRecord> {
    let mut by_candidate: BTreeMap<CandidateId, RankRecord> = members
        .iter()
        .map(|s| {
            (
                s.candidate_id(),
                RankRecord {
                    candidate_id: s.candidate_id(),
                    context,
                    scope: scope.clone(),
                    filter,
                    subjects: BTreeMap::new(),
                    aggregate: None,
                },
            )
        })
        .collect();

    for (field, ranked) in fields {
        let participants = ranked.len() as u32;
        for (id, rank) in rank_field(ranked, field) {
            let Some(record) = by_candidate.get_mut(&id) else {
                continue;
            };
            let entry = FieldRank { rank, participants };
            match field {
                ScoreField::Subject(code) => {
                    record.subjects.insert(code.clone(), entry);
                }
                ScoreField::Aggregate => record.aggregate = Some(entry),
            }
        }
    }

    by_candidate.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn ranks_of(scores: &[f64]) -> Vec<u32> {
        let input: Vec<(CandidateId, f64)> = scores
            .iter()
            .enumerate()
            .map(|(i, &s)| (i as CandidateId + 1, s))
            .collect();
        let mut ranks = competition_ranks(&input);
        ranks.sort_by_key(|&(id, _)| id);
        ranks.into_iter().map(|(_, r)| r).collect()
    }

    #[test]
    fn ties_share_rank_and_skip() {
        assert_eq!(ranks_of(&[90.0, 80.0, 70.0, 70.0, 60.0]), vec![1, 2, 3, 3, 5]);
        assert_eq!(ranks_of(&[50.0, 50.0, 50.0]), vec![1, 1, 1]);
    }

    #[test]
    fn rank_one_is_the_maximum() {
        let ranks = ranks_of(&[10.0, 95.5, 40.0, 95.5]);
        assert_eq!(ranks, vec![4, 1, 3, 1]);
    }

    #[test]
    fn single_participant_is_rank_one() {
        assert_eq!(ranks_of(&[0.0]), vec![1]);
        assert!(competition_ranks(&[]).is_empty());
    }

    fn records(exam: &crate::model::Exam, rows: &[(CandidateId, f64, f64)]) -> Vec<ScoreRecord> {
        rows.iter()
            .map(|&(id, a, b)| {
                let mut subjects = BTreeMap::new();
                subjects.insert("a".to_string(), a);
                subjects.insert("b".to_string(), b);
                ScoreRecord::new(exam, id, KeyContext::Predicted, subjects)
            })
            .collect()
    }

    #[test]
    fn rank_cohort_fills_subjects_and_aggregate() {
        let exam = exam(vec![subject("a", 2), subject("b", 2)]);
        let scores = records(&exam, &[(1, 100.0, 0.0), (2, 50.0, 100.0), (3, 50.0, 50.0)]);
        let refs: Vec<&ScoreRecord> = scores.iter().collect();
        let fields: Vec<(ScoreField, Vec<&ScoreRecord>)> = exam
            .score_fields()
            .into_iter()
            .map(|f| (f, refs.clone()))
            .collect();

        let ranks = rank_cohort(
            &refs,
            &fields,
            KeyContext::Predicted,
            &CohortScope::Global,
            FilterState::All,
        );
        assert_eq!(ranks.len(), 3);
        assert!(ranks
            .iter()
            .all(|r| r.aggregate.is_some_and(|a| a.participants == 3)));
        let two = &ranks[1];
        assert_eq!(two.candidate_id, 2);
        assert_eq!(
            two.field(&ScoreField::Subject("a".into())),
            Some(FieldRank { rank: 2, participants: 3 })
        );
        assert_eq!(two.subjects["b"].rank, 1);
        assert_eq!(two.aggregate.map(|a| a.rank), Some(1));
        // aggregates 100, 150, 100
        assert_eq!(ranks[0].aggregate.map(|a| a.rank), Some(2));
        assert_eq!(ranks[2].aggregate.map(|a| a.rank), Some(2));
    }

    #[test]
    fn unconfirmed_fields_are_left_unranked() {
        let exam = exam(vec![subject("a", 2), subject("b", 2)]);
        // candidate 2 only confirmed subject a
        let scores = records(&exam, &[(1, 100.0, 100.0), (2, 100.0, 0.0)]);
        let refs: Vec<&ScoreRecord> = scores.iter().collect();
        let fields = vec![
            (ScoreField::Subject("a".into()), refs.clone()),
            (ScoreField::Subject("b".into()), vec![refs[0]]),
            (ScoreField::Aggregate, vec![refs[0]]),
        ];

        let ranks = rank_cohort(
            &refs,
            &fields,
            KeyContext::Predicted,
            &CohortScope::Global,
            FilterState::All,
        );
        assert_eq!(ranks[0].subjects["b"], FieldRank { rank: 1, participants: 1 });
        assert_eq!(ranks[1].subjects["a"], FieldRank { rank: 1, participants: 2 });
        assert!(!ranks[1].subjects.contains_key("b"));
        assert_eq!(ranks[1].aggregate, None);
    }
}

//! Compare-then-write change detection shared by every derived record kind.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A derived record with a natural key.
///
/// Two records with the same key are compared as whole values; any field
/// difference makes the computed one an update.
pub trait Record: Clone + PartialEq + fmt::Debug + Send + Sync {
    type Key: Ord + Clone + fmt::Debug + Send + Sync;

    fn key(&self) -> Self::Key;
}

/// The writes needed to bring stored records in line with computed ones.
#[derive(Debug, Clone)]
pub struct ChangeSet<R: Record> {
    /// Computed records with no stored counterpart.
    pub created: Vec<R>,
    /// Computed records that differ from their stored counterpart.
    pub updated: Vec<R>,
    /// Keys of stored records that are no longer computed.
    pub deleted: Vec<R::Key>,
    /// Computed records identical to what is stored.
    pub unchanged: usize,
}

impl<R: Record> Default for ChangeSet<R> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            unchanged: 0,
        }
    }
}

impl<R: Record> ChangeSet<R> {
    /// Classify each computed record against the stored set.
    ///
    /// Stored records whose key is not computed any more are deleted.
    pub fn diff(stored: &[R], computed: impl IntoIterator<Item = R>) -> Self {
        let index: BTreeMap<R::Key, &R> = stored.iter().map(|r| (r.key(), r)).collect();
        let mut seen = BTreeSet::new();

        let mut changes = ChangeSet::default();
        for record in computed {
            let key = record.key();
            match index.get(&key) {
                None => changes.created.push(record),
                Some(existing) if **existing != record => changes.updated.push(record),
                Some(_) => changes.unchanged += 1,
            }
            seen.insert(key);
        }
        changes.deleted = index.into_keys().filter(|k| !seen.contains(k)).collect();
        changes
    }

    /// Records to upsert, created first.
    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.created.iter().chain(self.updated.iter())
    }

    pub fn into_records(self) -> impl Iterator<Item = R> {
        self.created.into_iter().chain(self.updated)
    }

    /// Apply to a stored set: drop deleted keys, then insert or replace by
    /// key, keeping the stored order.
    pub fn apply_to(self, stored: &mut Vec<R>) {
        if !self.deleted.is_empty() {
            let deleted: BTreeSet<&R::Key> = self.deleted.iter().collect();
            stored.retain(|r| !deleted.contains(&r.key()));
        }
        let index: BTreeMap<R::Key, usize> = stored
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key(), i))
            .collect();
        for record in self.into_records() {
            match index.get(&record.key()) {
                Some(&i) => stored[i] = record,
                None => stored.push(record),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn written(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

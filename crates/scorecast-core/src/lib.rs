//! scorecast-core: answer ledger, tallies, predicted keys, scoring, ranking
//! and statistics.
//!
//! This crate defines the data model, the persistence trait and the
//! reconciliation driver that keeps every derived record in line with the
//! answer ledger.

pub mod changeset;
pub mod cohort;
pub mod engine;
pub mod error;
pub mod key;
pub mod ledger;
pub mod model;
pub mod parser;
pub mod rank;
pub mod report;
pub mod scorer;
pub mod statistics;
pub mod tally;
pub mod traits;

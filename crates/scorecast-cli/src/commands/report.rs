//! The `scorecast report` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table};

use scorecast_core::model::{CohortScope, FilterState, KeyContext};
use scorecast_core::report::{item_analysis, rank_listing};
use scorecast_core::traits::{DerivedState, ExamSnapshot};

use super::open_store;
use crate::View;

fn percent(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}%")).unwrap_or_else(|| "-".to_string())
}

fn score(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

pub async fn execute(
    exam_id: String,
    view: View,
    context: String,
    filtered: bool,
    scope: String,
    config_path: Option<PathBuf>,
    now: DateTime<Utc>,
) -> Result<()> {
    let context: KeyContext = context.parse().map_err(anyhow::Error::msg)?;
    let filter = if filtered {
        FilterState::Filtered
    } else {
        FilterState::All
    };

    let (_, store) = open_store(config_path).await?;
    let snapshot = store.snapshot(&exam_id).await?;
    let derived = store.derived(&exam_id).await?;

    let scope = if scope.eq_ignore_ascii_case("global") {
        CohortScope::Global
    } else if snapshot.exam.has_category(&scope) {
        CohortScope::Category(scope)
    } else {
        anyhow::bail!("exam {exam_id} has no category {scope}");
    };

    println!(
        "{}: {context} key, {scope} cohort, {filter} candidates",
        snapshot.exam.reference()
    );
    match view {
        View::Statistics => print_statistics(&derived, context, &scope, filter),
        View::Ranks => print_ranks(&snapshot, &derived, context, &scope, filter),
        View::Items => print_items(&snapshot, &derived, context, filter, now)?,
    }
    Ok(())
}

fn print_statistics(
    derived: &DerivedState,
    context: KeyContext,
    scope: &CohortScope,
    filter: FilterState,
) {
    let records: Vec<_> = derived
        .statistics
        .iter()
        .filter(|s| s.context == context && &s.scope == scope && s.filter == filter)
        .collect();
    if records.is_empty() {
        println!("No statistics. Run `scorecast reconcile` first.");
        return;
    }

    let mut header = vec![
        "Field".to_string(),
        "Participants".to_string(),
        "Max".to_string(),
        "Mean".to_string(),
    ];
    header.extend(records[0].thresholds.iter().map(|t| t.label()));

    let mut table = Table::new();
    table.set_header(header);
    for record in records {
        let mut row = vec![
            Cell::new(&record.field),
            Cell::new(record.participants),
            Cell::new(score(record.max)),
            Cell::new(score(record.mean)),
        ];
        row.extend(record.thresholds.iter().map(|t| Cell::new(score(t.score))));
        table.add_row(row);
    }
    println!("{table}");
}

fn print_ranks(
    snapshot: &ExamSnapshot,
    derived: &DerivedState,
    context: KeyContext,
    scope: &CohortScope,
    filter: FilterState,
) {
    let rows = rank_listing(derived, context, scope, filter);
    if rows.is_empty() {
        println!("No ranks. Run `scorecast reconcile` first.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Rank", "Candidate", "Name", "Score"]);
    for row in rows {
        let name = snapshot
            .candidates
            .iter()
            .find(|c| c.id == row.candidate_id)
            .map(|c| c.name.as_str())
            .unwrap_or("");
        table.add_row(vec![
            Cell::new(
                row.aggregate_rank
                    .map(|a| format!("{}/{}", a.rank, a.participants))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(row.candidate_id),
            Cell::new(name),
            Cell::new(format!("{:.1}", row.aggregate_score)),
        ]);
    }
    println!("{table}");
}

fn print_items(
    snapshot: &ExamSnapshot,
    derived: &DerivedState,
    context: KeyContext,
    filter: FilterState,
    now: DateTime<Utc>,
) -> Result<()> {
    let official = match context {
        KeyContext::Official => {
            let key = snapshot.official_key.as_ref().with_context(|| {
                format!("no official key published for {}", snapshot.exam.id)
            })?;
            key.ensure_released(&snapshot.exam, now)?;
            Some(key)
        }
        KeyContext::Predicted => None,
    };
    let rows = item_analysis(&snapshot.exam, derived, official, filter);

    let mut header = vec!["Question".to_string(), "Predicted".to_string(), "Official".to_string()];
    header.extend((1..=snapshot.exam.option_count).map(|o| format!("#{o}")));
    header.extend(
        ["Correct", "Top", "Mid", "Low", "Responses"]
            .iter()
            .map(|h| h.to_string()),
    );

    let mut table = Table::new();
    table.set_header(header);
    for row in rows {
        let mut cells = vec![
            Cell::new(&row.question),
            Cell::new(row.predicted),
            Cell::new(
                row.official
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ];
        cells.extend(row.selection.iter().map(|s| Cell::new(percent(*s))));
        cells.extend([
            Cell::new(percent(row.correct_all)),
            Cell::new(percent(row.correct_top)),
            Cell::new(percent(row.correct_mid)),
            Cell::new(percent(row.correct_low)),
            Cell::new(row.responses),
        ]);
        table.add_row(cells);
    }
    println!("{table}");
    Ok(())
}

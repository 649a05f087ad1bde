//! The `scorecast exam` commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table};

use scorecast_core::parser;

use super::open_store;

pub async fn add(exam_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let exams = if exam_path.is_dir() {
        parser::load_exam_directory(&exam_path)?
    } else {
        vec![parser::parse_exam(&exam_path)?]
    };
    anyhow::ensure!(!exams.is_empty(), "no exam definitions found in {}", exam_path.display());

    let (_, store) = open_store(config_path).await?;
    for exam in exams {
        let id = exam.id.clone();
        store
            .put_exam(exam)
            .await
            .with_context(|| format!("failed to store exam {id}"))?;
        println!("Stored exam {id}");
    }
    Ok(())
}

pub async fn list(config_path: Option<PathBuf>, now: DateTime<Utc>) -> Result<()> {
    let (_, store) = open_store(config_path).await?;
    let ids = store.exam_ids().await?;
    if ids.is_empty() {
        println!("No exams stored. Run `scorecast exam add --exam <file>` first.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Exam", "Reference", "Phase", "Candidates", "Ledger"]);
    for id in ids {
        let snapshot = store.snapshot(&id).await?;
        table.add_row(vec![
            Cell::new(&id),
            Cell::new(snapshot.exam.reference()),
            Cell::new(snapshot.exam.schedule.phase(now)),
            Cell::new(snapshot.candidates.len()),
            Cell::new(format!("v{}", snapshot.ledger_version)),
        ]);
    }
    println!("{table}");
    Ok(())
}

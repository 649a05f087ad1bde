//! The `scorecast submit` and `scorecast correct` commands.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};

use scorecast_core::ledger::{self, Submission};
use scorecast_core::model::QuestionId;

use super::open_store;

/// Parse a comma-separated list of option codes.
fn parse_codes(s: &str) -> Result<Vec<u32>> {
    s.split(',')
        .map(|c| {
            c.trim()
                .parse::<u32>()
                .map_err(|_| anyhow::anyhow!("invalid option code: '{}'", c.trim()))
        })
        .collect()
}

pub async fn execute(
    exam_id: String,
    candidate_id: u64,
    subject: String,
    answers: String,
    config_path: Option<PathBuf>,
    now: DateTime<Utc>,
) -> Result<()> {
    let options = parse_codes(&answers)?;
    let (_, store) = open_store(config_path).await?;
    let receipt = ledger::submit(
        store.as_ref(),
        Submission {
            exam_id: exam_id.clone(),
            candidate_id,
            subject: subject.clone(),
            options,
        },
        now,
    )
    .await?;

    println!(
        "Confirmed {subject} for candidate {candidate_id}: {} answers (ledger v{})",
        receipt.answers_written, receipt.ledger_version
    );
    if let Some(at) = receipt.all_confirmed_at {
        println!("All subjects confirmed at {}", at.to_rfc3339());
    }
    Ok(())
}

pub async fn correct(
    exam_id: String,
    candidate_id: u64,
    question: String,
    option: u32,
    config_path: Option<PathBuf>,
    now: DateTime<Utc>,
) -> Result<()> {
    let question: QuestionId = question.parse().map_err(anyhow::Error::msg)?;
    let (_, store) = open_store(config_path).await?;
    ledger::correct_answer(store.as_ref(), &exam_id, candidate_id, question.clone(), option, now)
        .await?;
    println!("Corrected {question} for candidate {candidate_id}");
    Ok(())
}

//! The `scorecast register` command.

use std::path::PathBuf;

use anyhow::Result;

use scorecast_core::model::Candidate;

use super::open_store;

pub async fn execute(
    exam_id: String,
    candidate_id: u64,
    name: String,
    category: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let (_, store) = open_store(config_path).await?;
    store
        .register_candidate(Candidate::new(candidate_id, &exam_id, name, category))
        .await?;
    println!("Registered candidate {candidate_id} for {exam_id}");
    Ok(())
}

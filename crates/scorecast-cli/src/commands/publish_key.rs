//! The `scorecast publish-key` command.

use std::path::PathBuf;

use anyhow::Result;

use scorecast_core::key::AnswerKey;
use scorecast_core::parser::parse_key_file;

use super::open_store;

pub async fn execute(
    exam_id: Option<String>,
    key_path: PathBuf,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let file = parse_key_file(&key_path)?;
    let exam_id = match (exam_id, file.exam) {
        (Some(arg), Some(named)) if arg != named => {
            anyhow::bail!("{} is a key for {named}, not {arg}", key_path.display())
        }
        (Some(id), _) | (None, Some(id)) => id,
        (None, None) => anyhow::bail!(
            "{} does not name its exam; pass --exam-id",
            key_path.display()
        ),
    };

    let (_, store) = open_store(config_path).await?;
    let exam = store.exam(&exam_id).await?;
    let key = AnswerKey::from_codes(&exam, &file.answers)?;
    let missing = exam.question_count().saturating_sub(key.len());
    store.publish_official_key(&exam_id, key).await?;

    println!("Published official key for {exam_id}");
    if missing > 0 {
        println!("Warning: {missing} question(s) have no answer; official scoring stays unavailable.");
    }
    Ok(())
}

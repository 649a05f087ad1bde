pub mod exam;
pub mod init;
pub mod publish_key;
pub mod reconcile;
pub mod register;
pub mod report;
pub mod submit;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use scorecast_core::traits::ExamStore;
use scorecast_store::{create_store, load_config_from, ScorecastConfig};

/// Load the configuration and open the store it names.
pub async fn open_store(
    config_path: Option<PathBuf>,
) -> Result<(ScorecastConfig, Arc<dyn ExamStore>)> {
    let config = load_config_from(config_path.as_deref())?;
    let store = create_store(&config.store).await?;
    tracing::debug!("using {} store", store.name());
    Ok((config, store))
}

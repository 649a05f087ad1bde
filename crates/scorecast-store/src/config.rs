//! Store configuration and factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use scorecast_core::engine::EngineConfig;
use scorecast_core::statistics::DEFAULT_PERCENTILES;
use scorecast_core::tally::BandSplit;
use scorecast_core::traits::ExamStore;

use crate::file::JsonFileStore;
use crate::memory::MemoryStore;

/// Where exams, answers and derived records are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// A JSON document rewritten after every change.
    File {
        #[serde(default = "default_store_path")]
        path: String,
    },
    /// Process memory only; everything is lost on exit.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "scorecast-store.json".to_string()
}

/// Top-level scorecast configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorecastConfig {
    #[serde(default)]
    pub store: StoreConfig,
    /// Max exams reconciled concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Recomputations of a step after a stale write.
    #[serde(default = "default_stale_write_retries")]
    pub stale_write_retries: u32,
    /// Top-percentile thresholds reported by statistics.
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
    /// Band split points for percentile-band tallies.
    #[serde(default)]
    pub bands: BandSplit,
    /// Output directory for reconciliation reports.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_parallelism() -> usize {
    4
}
fn default_stale_write_retries() -> u32 {
    1
}
fn default_percentiles() -> Vec<f64> {
    DEFAULT_PERCENTILES.to_vec()
}
fn default_report_dir() -> PathBuf {
    PathBuf::from("./scorecast-reports")
}

impl Default for ScorecastConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            parallelism: default_parallelism(),
            stale_write_retries: default_stale_write_retries(),
            percentiles: default_percentiles(),
            bands: BandSplit::default(),
            report_dir: default_report_dir(),
        }
    }
}

impl ScorecastConfig {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            anyhow::bail!("parallelism must be at least 1");
        }
        if let Some(p) = self.percentiles.iter().find(|p| !(**p > 0.0 && **p <= 1.0)) {
            anyhow::bail!("percentile {p} is outside (0, 1]");
        }
        let BandSplit { top, mid } = self.bands;
        if !(0.0 < top && top < mid && mid < 1.0) {
            anyhow::bail!("band split points must satisfy 0 < top < mid < 1 (got {top}, {mid})");
        }
        Ok(())
    }

    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            parallelism: self.parallelism,
            percentiles: self.percentiles.clone(),
            bands: self.bands,
            stale_write_retries: self.stale_write_retries,
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `scorecast.toml` in the current directory
/// 2. `~/.config/scorecast/config.toml`
///
/// `SCORECAST_STORE` overrides the store with a file store at that path.
pub fn load_config() -> Result<ScorecastConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ScorecastConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("scorecast.toml");
        if local.exists() {
            Some(local)
        } else if let Some(home) = dirs_path() {
            let global = home.join("config.toml");
            if global.exists() {
                Some(global)
            } else {
                None
            }
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            parse_config(&std::fs::read_to_string(&path).with_context(|| {
                format!("failed to read config: {}", path.display())
            })?)
            .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ScorecastConfig::default(),
    };

    if let Ok(path) = std::env::var("SCORECAST_STORE") {
        config.store = StoreConfig::File { path };
    }

    if let StoreConfig::File { path } = &mut config.store {
        *path = resolve_env_vars(path);
    }
    config.report_dir = PathBuf::from(resolve_env_vars(&config.report_dir.to_string_lossy()));

    config.validate()?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<ScorecastConfig> {
    Ok(toml::from_str::<ScorecastConfig>(content)?)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("scorecast"))
}

/// Open the configured store.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn ExamStore>> {
    match config {
        StoreConfig::File { path } => {
            let store = JsonFileStore::open(Path::new(path))
                .await
                .with_context(|| format!("failed to open store {path}"))?;
            Ok(Arc::new(store))
        }
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_SCORECAST_TEST_VAR", "data");
        assert_eq!(resolve_env_vars("${_SCORECAST_TEST_VAR}"), "data");
        assert_eq!(
            resolve_env_vars("/srv/${_SCORECAST_TEST_VAR}/store.json"),
            "/srv/data/store.json"
        );
        std::env::remove_var("_SCORECAST_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = ScorecastConfig::default();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.stale_write_retries, 1);
        assert_eq!(config.percentiles, vec![0.10, 0.20]);
        assert_eq!(config.bands, BandSplit { top: 0.27, mid: 0.73 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_store_config() {
        let config = parse_config(
            r#"
parallelism = 2
percentiles = [0.1, 0.5]

[store]
type = "memory"

[bands]
top = 0.3
mid = 0.7
"#,
        )
        .unwrap();
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.stale_write_retries, 1);

        let engine = config.to_engine_config();
        assert_eq!(engine.percentiles, vec![0.1, 0.5]);
        assert_eq!(engine.bands.top, 0.3);

        let config = parse_config("[store]\ntype = \"file\"\n").unwrap();
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = ScorecastConfig::default();
        config.percentiles = vec![0.0];
        assert!(config.validate().is_err());

        let mut config = ScorecastConfig::default();
        config.bands = BandSplit { top: 0.8, mid: 0.5 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_config_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config_from(Some(&missing)).is_err());

        let path = dir.path().join("scorecast.toml");
        std::fs::write(&path, "stale_write_retries = 3\n").unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.stale_write_retries, 3);
    }
}

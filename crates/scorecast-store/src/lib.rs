//! scorecast-store: persistence backends and configuration.
//!
//! Implements the `ExamStore` trait in memory and as a JSON document on
//! disk, and loads the `scorecast.toml` configuration that selects one.

pub mod config;
pub mod file;
pub mod memory;

pub use config::{create_store, load_config, load_config_from, ScorecastConfig, StoreConfig};
pub use file::JsonFileStore;
pub use memory::{ExamState, MemoryStore, StoreDocument};

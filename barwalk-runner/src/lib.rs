//! BarWalk Runner: batch orchestration on top of `barwalk-core`.
//!
//! This crate provides:
//! - TOML configuration with validation and a content hash
//! - CSV loading of bars and entries into an in-memory, resampling bar store
//! - Deterministic synthetic sessions for offline runs
//! - The batch runner with per-reason skip accounting
//! - Outcome stores with upsert semantics (JSON files, memory)

pub mod config;
pub mod data_loader;
pub mod runner;
pub mod store;
pub mod synthetic;

pub use config::{BacktestConfig, ConfigError, ConfigHash, StructureConfig};
pub use data_loader::{
    load_bars, load_entries, read_bars, read_entries, resample, BarStore, LoadError,
};
pub use runner::{BatchReport, BatchRunner, BatchStats, BatchSummary, EntryReport, RunError};
pub use store::{JsonOutcomeStore, MemoryOutcomeStore, OutcomeStore, StoreError, UpsertStatus};
pub use synthetic::{
    recent_weekdays, synthetic_entries, synthetic_session, synthetic_store,
    REGULAR_SESSION_MINUTES,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
    }

    #[test]
    fn bar_store_is_send_sync() {
        assert_send::<BarStore>();
        assert_sync::<BarStore>();
    }

    #[test]
    fn batch_runner_is_send_sync() {
        assert_send::<BatchRunner>();
        assert_sync::<BatchRunner>();
    }

    #[test]
    fn report_types_are_send_sync() {
        assert_send::<BatchReport>();
        assert_sync::<BatchReport>();
        assert_send::<BatchStats>();
        assert_sync::<BatchStats>();
    }

    #[test]
    fn stores_are_send_sync() {
        assert_send::<JsonOutcomeStore>();
        assert_sync::<JsonOutcomeStore>();
        assert_send::<MemoryOutcomeStore>();
        assert_sync::<MemoryOutcomeStore>();
    }
}

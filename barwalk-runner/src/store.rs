//! Outcome persistence with upsert semantics.
//!
//! One record per trade id. Writing an outcome for an id that already exists
//! replaces the record instead of appending a second one.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use barwalk_core::domain::TradeId;
use barwalk_core::simulation::SimulationOutcome;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize outcome {trade_id}: {source}")]
    Serialize {
        trade_id: TradeId,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt outcome file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Inserted,
    Replaced,
    /// The stored record already had the same `input_hash`; nothing written.
    Unchanged,
}

fn status_for(existing: Option<&SimulationOutcome>, outcome: &SimulationOutcome) -> UpsertStatus {
    match existing {
        None => UpsertStatus::Inserted,
        Some(prev) if prev.input_hash == outcome.input_hash && prev == outcome => {
            UpsertStatus::Unchanged
        }
        Some(_) => UpsertStatus::Replaced,
    }
}

pub trait OutcomeStore: Send + Sync {
    fn upsert(&self, outcome: &SimulationOutcome) -> Result<UpsertStatus, StoreError>;

    fn get(&self, trade_id: &TradeId) -> Result<Option<SimulationOutcome>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    outcomes: Mutex<BTreeMap<TradeId, SimulationOutcome>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored outcome, ordered by trade id.
    pub fn all(&self) -> Vec<SimulationOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl OutcomeStore for MemoryOutcomeStore {
    fn upsert(&self, outcome: &SimulationOutcome) -> Result<UpsertStatus, StoreError> {
        let mut outcomes = self.outcomes.lock().unwrap_or_else(PoisonError::into_inner);
        let status = status_for(outcomes.get(&outcome.trade_id), outcome);
        if status != UpsertStatus::Unchanged {
            outcomes.insert(outcome.trade_id.clone(), outcome.clone());
        }
        Ok(status)
    }

    fn get(&self, trade_id: &TradeId) -> Result<Option<SimulationOutcome>, StoreError> {
        Ok(self
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(trade_id)
            .cloned())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.outcomes.lock().unwrap_or_else(PoisonError::into_inner).len())
    }
}

/// One pretty-printed JSON file per trade id under a directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// reader never sees a half-written outcome.
#[derive(Debug, Clone)]
pub struct JsonOutcomeStore {
    dir: PathBuf,
}

impl JsonOutcomeStore {
    /// Opens a store in `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a trade id. Ids that are not filename-safe get a hash
    /// suffix so two distinct ids never share a file.
    pub fn path_for(&self, trade_id: &TradeId) -> PathBuf {
        let raw = trade_id.as_str();
        let safe: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = if safe == raw && !raw.is_empty() && !raw.starts_with('.') {
            safe
        } else {
            let digest = blake3::hash(raw.as_bytes()).to_hex();
            format!("{safe}-{}", &digest[..12])
        };
        self.dir.join(format!("{name}.json"))
    }

    fn read(&self, path: &Path) -> Result<Option<SimulationOutcome>, StoreError> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Every stored outcome, ordered by file name.
    pub fn all(&self) -> Result<Vec<SimulationOutcome>, StoreError> {
        let mut paths = self.outcome_files()?;
        paths.sort();
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(outcome) = self.read(&path)? {
                out.push(outcome);
            }
        }
        Ok(out)
    }

    fn outcome_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

impl OutcomeStore for JsonOutcomeStore {
    fn upsert(&self, outcome: &SimulationOutcome) -> Result<UpsertStatus, StoreError> {
        let path = self.path_for(&outcome.trade_id);
        let existing = self.read(&path)?;
        let status = status_for(existing.as_ref(), outcome);
        if status == UpsertStatus::Unchanged {
            return Ok(status);
        }

        let json =
            serde_json::to_string_pretty(outcome).map_err(|source| StoreError::Serialize {
                trade_id: outcome.trade_id.clone(),
                source,
            })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(status)
    }

    fn get(&self, trade_id: &TradeId) -> Result<Option<SimulationOutcome>, StoreError> {
        self.read(&self.path_for(trade_id))
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.outcome_files()?.len())
    }
}

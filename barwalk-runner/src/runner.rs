//! Batch runner: entries in, outcomes out.
//!
//! Entries are grouped by (instrument, session). Each group is independent,
//! so groups run on the rayon pool when `parallel` is set. All groups share
//! one [`HtfCache`], which fetches each stop-timeframe and structure series
//! at most once.
//!
//! Outcomes are computed in full before anything touches the store; a fatal
//! error part-way through the batch leaves the store as it was.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use barwalk_core::data::{BarSource, DataError, HtfCache};
use barwalk_core::domain::{BarSeries, Entry, SeriesKey, TradeId};
use barwalk_core::simulation::{OutcomeSimulator, SimulationOutcome, SkipReason};
use barwalk_core::structure::{structure_at, MultiTimeframeStructure};

use crate::config::{BacktestConfig, ConfigError};
use crate::data_loader::LoadError;
use crate::store::{OutcomeStore, StoreError, UpsertStatus};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("bar store error: {0}")]
    Data(#[from] DataError),

    #[error("outcome store error: {0}")]
    Store(#[from] StoreError),
}

/// Result for one entry: an outcome or the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryReport {
    pub trade_id: TradeId,
    pub instrument: String,
    pub session: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SimulationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipReason>,
    /// Structure labels as of the entry time, when they could be computed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<MultiTimeframeStructure>,
}

impl EntryReport {
    fn skipped(entry: &Entry, reason: SkipReason) -> Self {
        Self {
            trade_id: entry.trade_id.clone(),
            instrument: entry.instrument.clone(),
            session: entry.session,
            outcome: None,
            skip: Some(reason),
            structure: None,
        }
    }
}

/// Counters for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub entries: usize,
    pub sessions: usize,
    pub simulated: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub htf_fetches: usize,
}

impl BatchStats {
    pub fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    fn record_upsert(&mut self, status: UpsertStatus) {
        match status {
            UpsertStatus::Inserted => self.inserted += 1,
            UpsertStatus::Replaced => self.replaced += 1,
            UpsertStatus::Unchanged => self.unchanged += 1,
        }
    }
}

/// Aggregate view over simulated outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub mean_max_r: f64,
    pub total_pnl_r: f64,
    /// Count per exit reason (`STOP_HIT`, `R_MAX_HIT`, `EOD`).
    pub exits: BTreeMap<String, usize>,
    /// How many trades reached each level, index 0 being R1.
    pub level_hits: Vec<usize>,
}

impl BatchSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a SimulationOutcome>) -> Self {
        let mut summary = Self::default();
        let mut max_r_sum = 0.0;
        for outcome in outcomes {
            summary.trades += 1;
            if outcome.is_win() {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
            max_r_sum += f64::from(outcome.max_r);
            summary.total_pnl_r += outcome.pnl_r;
            *summary.exits.entry(outcome.exit_reason.to_string()).or_insert(0) += 1;
            if summary.level_hits.len() < outcome.levels.len() {
                summary.level_hits.resize(outcome.levels.len(), 0);
            }
            for (i, level) in outcome.levels.iter().enumerate() {
                if level.hit {
                    summary.level_hits[i] += 1;
                }
            }
        }
        if summary.trades > 0 {
            summary.win_rate = summary.wins as f64 / summary.trades as f64;
            summary.mean_max_r = max_r_sum / summary.trades as f64;
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub config_hash: String,
    pub stats: BatchStats,
    pub summary: BatchSummary,
    /// Per-entry results, grouped by (instrument, session) in key order and in
    /// input order within a group.
    pub entries: Vec<EntryReport>,
}

impl BatchReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &SimulationOutcome> {
        self.entries.iter().filter_map(|e| e.outcome.as_ref())
    }
}

struct SessionJob<'a> {
    instrument: &'a str,
    session: NaiveDate,
    entries: Vec<&'a Entry>,
}

fn group_entries(entries: &[Entry]) -> Vec<SessionJob<'_>> {
    let mut groups: BTreeMap<(&str, NaiveDate), Vec<&Entry>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry((entry.instrument.as_str(), entry.session))
            .or_default()
            .push(entry);
    }
    groups
        .into_iter()
        .map(|((instrument, session), entries)| SessionJob {
            instrument,
            session,
            entries,
        })
        .collect()
}

pub struct BatchRunner {
    config: BacktestConfig,
    simulator: OutcomeSimulator,
    source: Arc<dyn BarSource>,
    cache: HtfCache,
}

impl BatchRunner {
    pub fn new(config: BacktestConfig, source: Arc<dyn BarSource>) -> Result<Self, RunError> {
        config.validate()?;
        let simulator =
            OutcomeSimulator::new(config.simulation.clone()).map_err(ConfigError::from)?;
        let cache = HtfCache::new(Arc::clone(&source), config.htf_lookback);
        Ok(Self {
            config,
            simulator,
            source,
            cache,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn cache(&self) -> &HtfCache {
        &self.cache
    }

    /// Simulate every entry and upsert the outcomes into `store`.
    pub fn run(
        &self,
        entries: &[Entry],
        store: &dyn OutcomeStore,
    ) -> Result<BatchReport, RunError> {
        let config_hash = self.config.config_hash()?;
        let jobs = group_entries(entries);
        info!(
            entries = entries.len(),
            sessions = jobs.len(),
            parallel = self.config.parallel,
            source = self.source.name(),
            %config_hash,
            "batch started"
        );

        let per_session: Vec<Vec<EntryReport>> = if self.config.parallel {
            jobs.par_iter()
                .map(|job| self.run_session(job))
                .collect::<Result<_, _>>()?
        } else {
            jobs.iter()
                .map(|job| self.run_session(job))
                .collect::<Result<_, _>>()?
        };
        let reports: Vec<EntryReport> = per_session.into_iter().flatten().collect();

        let mut stats = BatchStats {
            entries: entries.len(),
            sessions: jobs.len(),
            ..BatchStats::default()
        };
        for report in &reports {
            match (&report.outcome, report.skip) {
                (Some(outcome), _) => {
                    stats.simulated += 1;
                    stats.record_upsert(store.upsert(outcome)?);
                }
                (None, Some(reason)) => stats.record_skip(reason),
                (None, None) => {}
            }
        }
        stats.htf_fetches = self.cache.fetch_count();

        let summary =
            BatchSummary::from_outcomes(reports.iter().filter_map(|r| r.outcome.as_ref()));
        info!(
            simulated = stats.simulated,
            skipped = stats.skipped_total(),
            wins = summary.wins,
            losses = summary.losses,
            win_rate = summary.win_rate,
            htf_fetches = stats.htf_fetches,
            "batch finished"
        );

        Ok(BatchReport {
            config_hash,
            stats,
            summary,
            entries: reports,
        })
    }

    fn run_session(&self, job: &SessionJob<'_>) -> Result<Vec<EntryReport>, DataError> {
        let sim_tf = self.config.simulation.sim_timeframe;
        let sim_series = match self.source.fetch(job.instrument, sim_tf, job.session, 1) {
            Ok(bars) => {
                BarSeries::from_unsorted(SeriesKey::new(job.instrument, job.session, sim_tf), bars)?
            }
            Err(DataError::NotFound { .. }) => {
                warn!(
                    instrument = job.instrument,
                    session = %job.session,
                    entries = job.entries.len(),
                    "no bars for session, skipping its entries"
                );
                return Ok(job
                    .entries
                    .iter()
                    .map(|e| EntryReport::skipped(e, SkipReason::UnknownSession))
                    .collect());
            }
            Err(e) => return Err(e),
        };

        let stop_key = SeriesKey::new(
            job.instrument,
            job.session,
            self.config.simulation.stop_timeframe,
        );
        let stop_series = self.cache.series(&stop_key).map_err(|e| {
            warn!(key = %stop_key, error = %e, "stop series unavailable");
            SkipReason::HtfUnavailable
        });

        let mut reports = Vec::with_capacity(job.entries.len());
        for entry in &job.entries {
            let result = stop_series
                .as_ref()
                .map_err(|reason| *reason)
                .and_then(|stop| self.simulator.run(entry, &sim_series, stop));
            match result {
                Ok(outcome) => {
                    let structure = self.structure_for(&outcome);
                    debug!(
                        trade_id = %outcome.trade_id,
                        result = %outcome.result,
                        max_r = outcome.max_r,
                        exit = %outcome.exit_reason,
                        "entry simulated"
                    );
                    reports.push(EntryReport {
                        trade_id: outcome.trade_id.clone(),
                        instrument: outcome.instrument.clone(),
                        session: outcome.session,
                        outcome: Some(outcome),
                        skip: None,
                        structure,
                    });
                }
                Err(reason) => {
                    warn!(trade_id = %entry.trade_id, reason = reason.as_str(), "entry skipped");
                    reports.push(EntryReport::skipped(entry, reason));
                }
            }
        }
        Ok(reports)
    }

    fn structure_for(&self, outcome: &SimulationOutcome) -> Option<MultiTimeframeStructure> {
        match structure_at(
            &self.cache,
            &outcome.instrument,
            outcome.session,
            &self.config.structure.timeframes,
            self.config.structure.half_window,
            outcome.entry_time,
        ) {
            Ok(structure) => Some(structure),
            Err(e) => {
                debug!(trade_id = %outcome.trade_id, error = %e, "no structure snapshot");
                None
            }
        }
    }
}

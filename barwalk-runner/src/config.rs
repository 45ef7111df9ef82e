//! Serializable batch configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! parallel = true
//! session_open = "09:30:00"
//!
//! [simulation]
//! atr_period = 14
//! atr_multiplier = 1.0
//! ladder_depth = 5
//! session_cutoff = "15:30:00"
//! sim_timeframe = "M1"
//! stop_timeframe = "M5"
//!
//! [structure]
//! half_window = 2
//! timeframes = ["M5", "M15", "H1"]
//!
//! [htf_lookback]
//! m5 = 5
//! h1 = 30
//! ```

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use barwalk_core::data::HtfLookback;
use barwalk_core::domain::Timeframe;
use barwalk_core::simulation::{SimulationConfig, SimulationConfigError};
use barwalk_core::structure::DEFAULT_FRACTAL_HALF_WINDOW;

/// Content hash of a configuration (BLAKE3 hex).
pub type ConfigHash = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid simulation settings: {0}")]
    Simulation(#[from] SimulationConfigError),

    #[error("structure.half_window must be >= 1")]
    ZeroHalfWindow,

    #[error("structure.timeframes must not be empty")]
    NoStructureTimeframes,

    #[error("session cutoff {cutoff} is not after session open {open}")]
    CutoffBeforeOpen { cutoff: NaiveTime, open: NaiveTime },

    #[error("failed to hash config: {0}")]
    Hash(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StructureConfig {
    pub half_window: usize,
    pub timeframes: Vec<Timeframe>,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            half_window: DEFAULT_FRACTAL_HALF_WINDOW,
            timeframes: vec![Timeframe::M5, Timeframe::M15, Timeframe::H1],
        }
    }
}

/// Everything needed to reproduce a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestConfig {
    pub simulation: SimulationConfig,
    pub structure: StructureConfig,
    pub htf_lookback: HtfLookback,
    /// First bar of the regular session; used by the synthetic generator and
    /// to sanity-check the cutoff.
    pub session_open: NaiveTime,
    /// Process sessions on the rayon pool. Off for sequential debugging.
    pub parallel: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            structure: StructureConfig::default(),
            htf_lookback: HtfLookback::default(),
            session_open: NaiveTime::from_hms_opt(9, 30, 0).expect("09:30 is a valid time"),
            parallel: true,
        }
    }
}

impl BacktestConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        if self.structure.half_window == 0 {
            return Err(ConfigError::ZeroHalfWindow);
        }
        if self.structure.timeframes.is_empty() {
            return Err(ConfigError::NoStructureTimeframes);
        }
        if self.simulation.session_cutoff <= self.session_open {
            return Err(ConfigError::CutoffBeforeOpen {
                cutoff: self.simulation.session_cutoff,
                open: self.session_open,
            });
        }
        Ok(())
    }

    /// Deterministic hash over the full configuration.
    ///
    /// Two batches with identical configs produce the same hash.
    pub fn config_hash(&self) -> Result<ConfigHash, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = BacktestConfig::from_toml_str("").unwrap();
        assert_eq!(config, BacktestConfig::default());
        assert_eq!(config.simulation.atr_period, 14);
        assert_eq!(config.simulation.ladder_depth, 5);
        assert_eq!(config.structure.half_window, 2);
        assert_eq!(config.htf_lookback.h1, 30);
        assert!(config.parallel);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_overrides() {
        let config = BacktestConfig::from_toml_str(
            r#"
            parallel = false

            [simulation]
            atr_period = 10
            session_cutoff = "15:00:00"
            stop_timeframe = "M15"

            [structure]
            timeframes = ["H1", "H4"]

            [htf_lookback]
            h4 = 120
            "#,
        )
        .unwrap();
        assert!(!config.parallel);
        assert_eq!(config.simulation.atr_period, 10);
        assert_eq!(config.simulation.ladder_depth, 5);
        assert_eq!(config.simulation.stop_timeframe, Timeframe::M15);
        assert_eq!(config.simulation.outcome_method(), "M15_ATR");
        assert_eq!(config.structure.timeframes, vec![Timeframe::H1, Timeframe::H4]);
        assert_eq!(config.htf_lookback.h4, 120);
        assert_eq!(config.htf_lookback.m5, 5);
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(matches!(
            BacktestConfig::from_toml_str("paralel = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn misspelled_nested_keys_are_rejected() {
        assert!(matches!(
            BacktestConfig::from_toml_str("[simulation]\natr_peroid = 3"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            BacktestConfig::from_toml_str("[htf_lookback]\nh2 = 10"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            BacktestConfig::from_toml_str("[structure]\nhalf_windw = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = BacktestConfig::default();
        config.structure.half_window = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroHalfWindow)));

        let mut config = BacktestConfig::default();
        config.structure.timeframes.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoStructureTimeframes)));

        let mut config = BacktestConfig::default();
        config.simulation.atr_period = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Simulation(_))));

        let mut config = BacktestConfig::default();
        config.simulation.session_cutoff = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::CutoffBeforeOpen { .. })));
    }

    #[test]
    fn config_hash_is_deterministic() {
        let a = BacktestConfig::default();
        let b = BacktestConfig::default();
        assert_eq!(a.config_hash().unwrap(), b.config_hash().unwrap());

        let mut c = BacktestConfig::default();
        c.simulation.atr_multiplier = 1.5;
        assert_ne!(a.config_hash().unwrap(), c.config_hash().unwrap());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = BacktestConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}

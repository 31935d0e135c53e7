use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::{DEFAULT_RISK_FRACTION, ParameterVector};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Engine settings, built once at startup and handed to the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub history_size: usize,
    pub optimization_interval: usize,
    pub recalibration_days: u32,
    pub train_ratio: f64,
    /// Floor on the optimizer's history length; the warm-up-derived minimum applies on top.
    pub min_history: usize,
    pub sample_count: usize,
    pub seed: u64,
    pub device_count: usize,
    /// 0 splits available parallelism evenly across devices.
    pub threads_per_device: usize,
    pub timeframe_minutes: u32,
    /// Risk per trade for sampled vectors; `default_params` must carry the same value.
    pub risk_fraction: f64,
    pub default_params: ParameterVector,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_size: 8640,
            optimization_interval: 100,
            recalibration_days: 7,
            train_ratio: 0.7,
            min_history: 1000,
            sample_count: 100_000,
            seed: 42,
            device_count: 2,
            threads_per_device: 0,
            timeframe_minutes: 15,
            risk_fraction: DEFAULT_RISK_FRACTION,
            default_params: ParameterVector::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return invalid("train_ratio", "must be in (0, 1)");
        }
        if self.history_size == 0 {
            return invalid("history_size", "must be positive");
        }
        if self.optimization_interval == 0 {
            return invalid("optimization_interval", "must be positive");
        }
        if self.sample_count == 0 {
            return invalid("sample_count", "must be positive");
        }
        if self.timeframe_minutes == 0 {
            return invalid("timeframe_minutes", "must be positive");
        }
        if self.min_history < 2 {
            return invalid("min_history", "must be at least 2");
        }
        if !(self.risk_fraction > 0.0 && self.risk_fraction <= 1.0) {
            return invalid("risk_fraction", "must be in (0, 1]");
        }
        if self.default_params.risk_fraction() != self.risk_fraction {
            return invalid("default_params", "risk_fraction must equal risk_fraction");
        }
        Ok(())
    }
}

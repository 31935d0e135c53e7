use std::fmt;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::candle::Candle;
use crate::config::EngineConfig;
use crate::device::DeviceProvider;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::fitness::{self, FitnessRecord};
use crate::indicators::prepare_bars;
use crate::kernel::{WARMUP_BARS, simulate};
use crate::params::ParameterVector;
use crate::sampler::{ParameterSampler, SamplerError};

/// Holdout fitness must keep at least this share of the training fitness.
pub const MIN_HOLDOUT_RATIO: f64 = 0.5;
/// Holdout length: the kernel warm-up plus 100 bars on which entries may open.
pub const MIN_HOLDOUT_BARS: usize = WARMUP_BARS + 100;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("insufficient history: have {have} candles, need {need}")]
    InsufficientHistory { have: usize, need: usize },
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Every training candidate hit a hard filter.
    NoValidCandidate,
    HoldoutRejected,
    NonPositiveTraining,
    Overfit { ratio: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoValidCandidate => f.write_str("no valid candidate"),
            Self::HoldoutRejected => f.write_str("holdout run hit a hard rejection"),
            Self::NonPositiveTraining => f.write_str("training fitness is not positive"),
            Self::Overfit { ratio } => {
                write!(f, "holdout/train fitness ratio {ratio:.3} below {MIN_HOLDOUT_RATIO}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkForwardOutcome {
    Accepted(ParameterVector),
    Rejected(RejectReason),
}

impl WalkForwardOutcome {
    pub fn accepted(&self) -> Option<&ParameterVector> {
        match self {
            Self::Accepted(p) => Some(p),
            Self::Rejected(_) => None,
        }
    }
}

impl fmt::Display for WalkForwardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted(_) => f.write_str("accepted"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub history_len: usize,
    pub train_len: usize,
    pub test_len: usize,
    pub population: usize,
    pub valid_candidates: usize,
    pub train: Option<FitnessRecord>,
    pub test: Option<FitnessRecord>,
    pub holdout_ratio: Option<f64>,
    pub outcome: WalkForwardOutcome,
    pub elapsed_ms: u64,
}

fn split_point(len: usize, ratio: f64) -> usize {
    ((len as f64 * ratio) as usize).min(len)
}

/// Chronological split: the first `floor(len * ratio)` items train, the rest test.
pub fn split_train_test<T>(series: &[T], ratio: f64) -> (&[T], &[T]) {
    series.split_at(split_point(series.len(), ratio))
}

/// Shortest history whose split leaves at least `MIN_HOLDOUT_BARS` in the holdout.
/// A ratio outside `[0, 1)` never leaves one.
pub fn minimum_history(train_ratio: f64) -> usize {
    if !(0.0..1.0).contains(&train_ratio) {
        return usize::MAX;
    }
    let mut len = (MIN_HOLDOUT_BARS as f64 / (1.0 - train_ratio)).ceil() as usize;
    while len - split_point(len, train_ratio) < MIN_HOLDOUT_BARS {
        len += 1;
    }
    len
}

pub struct WalkForwardOptimizer {
    sampler: ParameterSampler,
    dispatcher: Dispatcher,
    train_ratio: f64,
    min_history: usize,
}

impl WalkForwardOptimizer {
    pub fn new(
        sampler: ParameterSampler,
        dispatcher: Dispatcher,
        train_ratio: f64,
        min_history: usize,
    ) -> Self {
        Self {
            sampler,
            dispatcher,
            train_ratio,
            min_history,
        }
    }

    pub fn from_config(cfg: &EngineConfig, devices: &dyn DeviceProvider) -> Self {
        Self::new(
            ParameterSampler::new(cfg.sample_count, cfg.seed, cfg.risk_fraction),
            Dispatcher::from_provider(devices),
            cfg.train_ratio,
            cfg.min_history,
        )
    }

    pub fn run(&self, history: &[Candle]) -> Result<OptimizationReport, OptimizeError> {
        let started = Instant::now();
        // A shorter holdout cannot open a single trade past the kernel warm-up.
        let need = self.min_history.max(minimum_history(self.train_ratio));
        if history.len() < need {
            return Err(OptimizeError::InsufficientHistory {
                have: history.len(),
                need,
            });
        }

        // ATR is computed over the whole history so the holdout starts warm.
        let bars = prepare_bars(history);
        let (train, test) = split_train_test(&bars, self.train_ratio);
        info!(
            history = bars.len(),
            train = train.len(),
            test = test.len(),
            "walk-forward split"
        );

        let population = self.sampler.sample()?;
        let results = self.dispatcher.run(train, &population)?;
        let records: Vec<FitnessRecord> = population
            .iter()
            .zip(results)
            .map(|(p, r)| FitnessRecord::new(*p, r))
            .collect();
        let valid_candidates = records.iter().filter(|r| !r.is_rejected()).count();

        let mut report = OptimizationReport {
            history_len: bars.len(),
            train_len: train.len(),
            test_len: test.len(),
            population: population.len(),
            valid_candidates,
            train: None,
            test: None,
            holdout_ratio: None,
            outcome: WalkForwardOutcome::Rejected(RejectReason::NoValidCandidate),
            elapsed_ms: 0,
        };

        let best = fitness::best(&records).copied().filter(|b| !b.is_rejected());
        report.train = best;
        if let Some(best) = best {
            let holdout = FitnessRecord::new(best.params, simulate(test, &best.params));
            report.test = Some(holdout);
            info!(
                train_fitness = best.fitness,
                train_trades = best.result.trade_count,
                test_fitness = holdout.fitness,
                test_trades = holdout.result.trade_count,
                "evaluated training winner on holdout"
            );
            report.outcome = if holdout.is_rejected() {
                WalkForwardOutcome::Rejected(RejectReason::HoldoutRejected)
            } else if best.fitness <= 0.0 {
                WalkForwardOutcome::Rejected(RejectReason::NonPositiveTraining)
            } else {
                let ratio = holdout.fitness / best.fitness;
                report.holdout_ratio = Some(ratio);
                if ratio < MIN_HOLDOUT_RATIO {
                    WalkForwardOutcome::Rejected(RejectReason::Overfit { ratio })
                } else {
                    WalkForwardOutcome::Accepted(best.params)
                }
            };
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            outcome = %report.outcome,
            valid = valid_candidates,
            elapsed_ms = report.elapsed_ms,
            "walk-forward finished"
        );
        Ok(report)
    }
}

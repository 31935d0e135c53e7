use std::cmp::Ordering;

use serde::Serialize;

use crate::kernel::{KILL_SWITCH_DRAWDOWN, SimulationResult};
use crate::params::ParameterVector;

/// Score assigned to any result that fails a hard filter.
pub const REJECTION_SENTINEL: f64 = -999_999.0;
/// Anything at or below this came from a hard rejection.
pub const REJECTION_FLOOR: f64 = -999_000.0;
pub const MIN_TRADES: u32 = 20;
pub const MAX_TRADES: u32 = 500;
const MIN_AVG_LOSS: f64 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FitnessRecord {
    pub params: ParameterVector,
    pub result: SimulationResult,
    pub fitness: f64,
}

impl FitnessRecord {
    pub fn new(params: ParameterVector, result: SimulationResult) -> Self {
        Self {
            params,
            result,
            fitness: evaluate(&result),
        }
    }

    pub fn is_rejected(&self) -> bool {
        is_rejected(self.fitness)
    }
}

pub fn is_rejected(fitness: f64) -> bool {
    fitness <= REJECTION_FLOOR
}

pub fn win_rate(r: &SimulationResult) -> f64 {
    if r.trade_count == 0 {
        return 0.0;
    }
    r.win_count as f64 / r.trade_count as f64
}

/// Average win over average loss, the latter floored so a loss-free run stays finite.
pub fn profit_factor(r: &SimulationResult) -> f64 {
    let avg_win = if r.win_count > 0 {
        r.gross_profit / r.win_count as f64
    } else {
        0.0
    };
    let losses = r.loss_count();
    let avg_loss = if losses > 0 {
        r.gross_loss / losses as f64
    } else {
        0.0
    };
    avg_win / avg_loss.max(MIN_AVG_LOSS)
}

pub fn sharpe_like(r: &SimulationResult) -> f64 {
    if r.max_drawdown > 0.0 {
        r.net_profit / r.max_drawdown
    } else {
        0.0
    }
}

fn win_rate_penalty(wr: f64) -> f64 {
    if wr > 0.75 {
        0.5
    } else if wr < 0.40 {
        0.6
    } else {
        1.0
    }
}

fn profit_factor_penalty(pf: f64) -> f64 {
    if pf > 5.0 {
        0.4
    } else if pf < 1.2 {
        0.7
    } else {
        1.0
    }
}

fn trade_count_penalty(trades: u32) -> f64 {
    match trades {
        0..30 => 0.7,
        50..=150 => 1.2,
        301.. => 0.6,
        _ => 1.0,
    }
}

fn drawdown_penalty(dd: f64) -> f64 {
    1.0 - 0.5 * (dd / KILL_SWITCH_DRAWDOWN)
}

pub fn evaluate(r: &SimulationResult) -> f64 {
    if r.max_drawdown >= KILL_SWITCH_DRAWDOWN
        || r.trade_count < MIN_TRADES
        || r.trade_count > MAX_TRADES
    {
        return REJECTION_SENTINEL;
    }

    let wr = win_rate(r);
    let pf = profit_factor(r);
    let raw = r.net_profit * 2.0 + sharpe_like(r) * 50.0 + wr * 30.0 + pf * 10.0;

    raw * win_rate_penalty(wr)
        * profit_factor_penalty(pf)
        * trade_count_penalty(r.trade_count)
        * drawdown_penalty(r.max_drawdown)
}

fn compare(a: &FitnessRecord, b: &FitnessRecord) -> Ordering {
    b.fitness
        .partial_cmp(&a.fitness)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.result
                .net_profit
                .partial_cmp(&a.result.net_profit)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.result.trade_count.cmp(&b.result.trade_count))
}

/// Best first. Stable, so fully tied records keep population order.
pub fn rank(records: &mut [FitnessRecord]) {
    records.sort_by(compare);
}

/// The best record of a scored population without sorting it.
pub fn best(records: &[FitnessRecord]) -> Option<&FitnessRecord> {
    records
        .iter()
        .reduce(|best, r| if compare(r, best) == Ordering::Less { r } else { best })
}

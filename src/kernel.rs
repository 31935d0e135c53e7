//! Single-pass trade simulator: one parameter vector over one bar series.
//!
//! Pure function of its inputs; every invocation owns all of its state.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::indicators::{Ema, KernelBar, WilderRsi};
use crate::params::{MAX_BAND_PERIOD, ParameterVector};

pub const STARTING_BALANCE: f64 = 50.0;
pub const KILL_SWITCH_DRAWDOWN: f64 = 10.0;
/// Net profit reported for a blown account (balance forced to minus the starting balance).
pub const FORCED_NET_PROFIT: f64 = -2.0 * STARTING_BALANCE;
pub const PIP_MULTIPLIER: f64 = 10.0;
pub const WARMUP_BARS: usize = 200;
pub const TRADING_HOURS: Range<u32> = 7..20;
pub const MIN_ATR_PIPS: f64 = 2.5;
pub const MAX_ATR_PIPS: f64 = 500.0;
pub const MIN_POSITION_SIZE: f64 = 0.01;
pub const MAX_OPEN_POSITIONS: usize = 2;

const TREND_RSI_PERIOD: usize = 14;
const TREND_EMA_PERIOD: usize = 100;
const BREAKOUT_BUY_RSI: f64 = 55.0;
const BREAKOUT_SELL_RSI: f64 = 45.0;
const MIN_BODY_RATIO: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub net_profit: f64,
    pub trade_count: u32,
    pub win_count: u32,
    pub max_drawdown: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub account_blown: bool,
}

impl SimulationResult {
    pub fn loss_count(&self) -> u32 {
        self.trade_count.saturating_sub(self.win_count)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryRule {
    OscillatorCross,
    TrendPullback,
    BandBreakout,
}

/// Per-rule signals for one bar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntrySignals {
    pub oscillator_cross: Option<Direction>,
    pub band_breakout: Option<Direction>,
    pub trend_pullback: Option<Direction>,
}

impl EntrySignals {
    /// First match wins in the fixed order oscillator cross, trend pullback, band breakout.
    pub fn resolve(&self) -> Option<(EntryRule, Direction)> {
        self.oscillator_cross
            .map(|d| (EntryRule::OscillatorCross, d))
            .or(self.trend_pullback.map(|d| (EntryRule::TrendPullback, d)))
            .or(self.band_breakout.map(|d| (EntryRule::BandBreakout, d)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    direction: Direction,
    entry: f64,
    stop: f64,
    target: f64,
    size: f64,
}

impl Position {
    /// Realized P&L if the bar breached the stop or target. The stop is tested first.
    fn exit_pnl(&self, bar: &KernelBar) -> Option<f64> {
        let exit = match self.direction {
            Direction::Long if bar.low <= self.stop => self.stop,
            Direction::Long if bar.high >= self.target => self.target,
            Direction::Short if bar.high >= self.stop => self.stop,
            Direction::Short if bar.low <= self.target => self.target,
            _ => return None,
        };
        let distance = match self.direction {
            Direction::Long => exit - self.entry,
            Direction::Short => self.entry - exit,
        };
        Some(distance * PIP_MULTIPLIER * self.size)
    }
}

struct Indicators {
    scalper_rsi: WilderRsi,
    scalper_prev: f64,
    band: [f64; MAX_BAND_PERIOD],
    band_period: usize,
    band_idx: usize,
    band_sum: f64,
    breakout_rsi: WilderRsi,
    trend_ema: Ema,
    fast_ema: Ema,
    slow_ema: Ema,
    pullback_rsi: WilderRsi,
}

impl Indicators {
    fn new(first_close: f64, params: &ParameterVector) -> Self {
        let band_period = params.band_period().clamp(1, MAX_BAND_PERIOD);
        Self {
            scalper_rsi: WilderRsi::default(),
            scalper_prev: 50.0,
            band: [first_close; MAX_BAND_PERIOD],
            band_period,
            band_idx: 0,
            band_sum: first_close * band_period as f64,
            breakout_rsi: WilderRsi::default(),
            trend_ema: Ema::seeded(first_close),
            fast_ema: Ema::seeded(first_close),
            slow_ema: Ema::seeded(first_close),
            pullback_rsi: WilderRsi::default(),
        }
    }

    fn update(&mut self, close: f64, prev_close: f64, params: &ParameterVector) {
        let change = close - prev_close;

        self.scalper_prev = self.scalper_rsi.value();
        self.scalper_rsi.update(change, params.scalper_period());

        self.band_sum -= self.band[self.band_idx];
        self.band[self.band_idx] = close;
        self.band_sum += close;
        self.band_idx = (self.band_idx + 1) % self.band_period;
        self.breakout_rsi.update(change, TREND_RSI_PERIOD);
        self.trend_ema.update(close, TREND_EMA_PERIOD);

        self.fast_ema.update(close, params.fast_period());
        self.slow_ema.update(close, params.slow_period());
        self.pullback_rsi.update(change, TREND_RSI_PERIOD);
    }

    fn band(&self, deviation: f64) -> (f64, f64) {
        let window = &self.band[..self.band_period];
        let n = self.band_period as f64;
        let mean = self.band_sum / n;
        let var = window.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        (mean - deviation * std, mean + deviation * std)
    }

    fn signals(&self, bar: &KernelBar, params: &ParameterVector) -> EntrySignals {
        let s = params.scalper();
        let rsi = self.scalper_rsi.value();
        let oscillator_cross = if self.scalper_prev <= s.oversold && rsi > s.oversold {
            Some(Direction::Long)
        } else if self.scalper_prev >= s.overbought && rsi < s.overbought {
            Some(Direction::Short)
        } else {
            None
        };

        let b = params.breakout();
        let (lower, upper) = self.band(b.deviation);
        let width_pips = (upper - lower) * PIP_MULTIPLIER;
        let range = bar.high - bar.low;
        let band_breakout = if width_pips <= b.max_width
            && range > 0.0
            && (bar.close - bar.open).abs() / range >= MIN_BODY_RATIO
        {
            let trend_rsi = self.breakout_rsi.value();
            let ema = self.trend_ema.value();
            if bar.close > upper && trend_rsi > BREAKOUT_BUY_RSI && bar.close > ema {
                Some(Direction::Long)
            } else if bar.close < lower && trend_rsi < BREAKOUT_SELL_RSI && bar.close < ema {
                Some(Direction::Short)
            } else {
                None
            }
        } else {
            None
        };

        let p = params.pullback();
        let fast = self.fast_ema.value();
        let slow = self.slow_ema.value();
        let pull_rsi = self.pullback_rsi.value();
        let trend_pullback = if fast > slow && pull_rsi < p.rsi_trigger {
            Some(Direction::Long)
        } else if fast < slow && pull_rsi > 100.0 - p.rsi_trigger {
            Some(Direction::Short)
        } else {
            None
        };

        EntrySignals {
            oscillator_cross,
            band_breakout,
            trend_pullback,
        }
    }
}

fn multipliers(rule: EntryRule, params: &ParameterVector) -> (f64, f64) {
    match rule {
        EntryRule::OscillatorCross => (params.scalper().stop_loss, params.scalper().take_profit),
        EntryRule::TrendPullback => (params.pullback().stop_loss, params.pullback().take_profit),
        EntryRule::BandBreakout => (params.breakout().stop_loss, params.breakout().take_profit),
    }
}

fn entry_gates_pass(index: usize, bar: &KernelBar) -> bool {
    let atr_pips = bar.atr * PIP_MULTIPLIER;
    index > WARMUP_BARS
        && TRADING_HOURS.contains(&bar.hour)
        && (MIN_ATR_PIPS..=MAX_ATR_PIPS).contains(&atr_pips)
}

/// Replays `bars[1..]` under `params`.
pub fn simulate(bars: &[KernelBar], params: &ParameterVector) -> SimulationResult {
    let mut out = SimulationResult::default();
    let Some(first) = bars.first() else {
        return out;
    };

    let mut balance = STARTING_BALANCE;
    let mut peak = STARTING_BALANCE;
    let mut slots: [Option<Position>; MAX_OPEN_POSITIONS] = [None; MAX_OPEN_POSITIONS];
    let mut ind = Indicators::new(first.close, params);

    for i in 1..bars.len() {
        let bar = &bars[i];
        ind.update(bar.close, bars[i - 1].close, params);

        for slot in slots.iter_mut() {
            let Some(pnl) = slot.as_ref().and_then(|p| p.exit_pnl(bar)) else {
                continue;
            };
            *slot = None;
            balance += pnl;
            out.trade_count += 1;
            if pnl > 0.0 {
                out.win_count += 1;
                out.gross_profit += pnl;
            } else {
                out.gross_loss -= pnl;
            }
            peak = peak.max(balance);
            let drawdown = peak - balance;
            out.max_drawdown = out.max_drawdown.max(drawdown);
            if drawdown >= KILL_SWITCH_DRAWDOWN {
                out.net_profit = FORCED_NET_PROFIT;
                out.max_drawdown = KILL_SWITCH_DRAWDOWN;
                out.account_blown = true;
                return out;
            }
        }

        let Some(free) = slots.iter().position(Option::is_none) else {
            continue;
        };
        if !entry_gates_pass(i, bar) {
            continue;
        }
        let Some((rule, direction)) = ind.signals(bar, params).resolve() else {
            continue;
        };

        let (stop_mult, target_mult) = multipliers(rule, params);
        // ATR pips * multiplier, expressed back in price units
        let stop_distance = bar.atr * stop_mult;
        let target_distance = bar.atr * target_mult;
        let entry = bar.close;
        let (stop, target) = match direction {
            Direction::Long => (entry - stop_distance, entry + target_distance),
            Direction::Short => (entry + stop_distance, entry - target_distance),
        };
        let size = (balance * params.risk_fraction() / (stop_distance * PIP_MULTIPLIER))
            .max(MIN_POSITION_SIZE);
        slots[free] = Some(Position {
            direction,
            entry,
            stop,
            target,
            size,
        });
    }

    out.net_profit = balance - STARTING_BALANCE;
    out
}

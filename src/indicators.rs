use serde::{Deserialize, Serialize};

use crate::candle::Candle;

pub const ATR_PERIOD: usize = 14;

/// Incremental RSI with Wilder smoothing. The period is supplied per update so a
/// live consumer can switch periods without losing its averages.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WilderRsi {
    avg_gain: f64,
    avg_loss: f64,
    value: f64,
}

impl Default for WilderRsi {
    fn default() -> Self {
        Self {
            avg_gain: 0.0,
            avg_loss: 0.0,
            value: 50.0,
        }
    }
}

impl WilderRsi {
    pub fn update(&mut self, change: f64, period: usize) -> f64 {
        let p = period.max(1) as f64;
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
        self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;

        self.value = if self.avg_loss == 0.0 {
            100.0
        } else {
            let rs = self.avg_gain / self.avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ema {
    value: f64,
}

impl Ema {
    pub fn seeded(value: f64) -> Self {
        Self { value }
    }

    pub fn update(&mut self, close: f64, period: usize) -> f64 {
        let alpha = 2.0 / (period as f64 + 1.0);
        self.value += (close - self.value) * alpha;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

pub fn true_range(candle: &Candle, prev_close: Option<f64>) -> f64 {
    let hl = candle.high - candle.low;
    match prev_close {
        Some(pc) => hl.max((candle.high - pc).abs()).max((candle.low - pc).abs()),
        None => hl,
    }
}

/// Wilder ATR seeded with the mean of the first `period` true ranges.
/// Bars before the seed are 0.
pub fn average_true_range(candles: &[Candle], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = vec![0.0; candles.len()];
    let mut seed_sum = 0.0;
    let mut atr = 0.0;

    for (i, c) in candles.iter().enumerate() {
        let prev_close = i.checked_sub(1).map(|j| candles[j].close);
        let tr = true_range(c, prev_close);
        if i + 1 < period {
            seed_sum += tr;
            continue;
        }
        if i + 1 == period {
            seed_sum += tr;
            atr = seed_sum / period as f64;
        } else {
            atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        }
        out[i] = atr;
    }
    out
}

/// Per-bar inputs of the simulation kernel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub atr: f64,
    pub hour: u32,
}

pub fn prepare_bars(candles: &[Candle]) -> Vec<KernelBar> {
    let atr = average_true_range(candles, ATR_PERIOD);
    candles
        .iter()
        .zip(atr)
        .map(|(c, atr)| KernelBar {
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            atr,
            hour: c.hour_utc(),
        })
        .collect()
}

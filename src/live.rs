use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::trace;

use crate::candle::Candle;
use crate::indicators::WilderRsi;
use crate::kernel::Direction;
use crate::params::ParameterVector;

/// Shared handle to the parameter vector driving the live path. A store replaces
/// the whole vector behind one pointer, so a reader sees either the old or the new one.
#[derive(Clone, Debug)]
pub struct ActiveConfig {
    current: Arc<RwLock<Arc<ParameterVector>>>,
    version: Arc<AtomicU64>,
}

impl ActiveConfig {
    pub fn new(initial: ParameterVector) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn load(&self) -> Arc<ParameterVector> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Publishes `next` and returns the new version number.
    pub fn store(&self, next: ParameterVector) -> u64 {
        let next = Arc::new(next);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of swaps since construction.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LiveSignal {
    pub signal: Option<Direction>,
    pub latency: Duration,
    pub oscillator: f64,
}

impl LiveSignal {
    pub fn label(&self) -> &'static str {
        match self.signal {
            Some(Direction::Long) => "BUY",
            Some(Direction::Short) => "SELL",
            None => "none",
        }
    }
}

/// O(1) per candle: one Wilder RSI on the scalper period against the scalper levels.
#[derive(Debug)]
pub struct LiveEngine {
    config: ActiveConfig,
    rsi: WilderRsi,
}

impl LiveEngine {
    pub fn new(config: ActiveConfig) -> Self {
        Self {
            config,
            rsi: WilderRsi::default(),
        }
    }

    pub fn config(&self) -> &ActiveConfig {
        &self.config
    }

    pub fn on_candle(&mut self, candle: &Candle, prev: &Candle) -> LiveSignal {
        let started = Instant::now();
        let params = self.config.load();
        let s = params.scalper();

        let value = self
            .rsi
            .update(candle.close - prev.close, params.scalper_period());
        let signal = if value < s.oversold {
            Some(Direction::Long)
        } else if value > s.overbought {
            Some(Direction::Short)
        } else {
            None
        };

        let out = LiveSignal {
            signal,
            latency: started.elapsed(),
            oscillator: value,
        };
        trace!(ts = candle.ts, rsi = value, signal = out.label(), "live tick");
        out
    }
}

use std::collections::VecDeque;

use crate::candle::Candle;

/// Bounded, time-ordered candle buffer. Appending past capacity drops the oldest candle.
#[derive(Clone, Debug)]
pub struct RollingHistory {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl RollingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity.min(1 << 16)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, candle: Candle) {
        debug_assert!(
            self.candles.back().is_none_or(|last| last.ts <= candle.ts),
            "candles must arrive in time order"
        );
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    /// Replaces the contents with the newest `capacity` candles of `seed`.
    pub fn reset(&mut self, seed: &[Candle]) {
        self.candles.clear();
        let skip = seed.len().saturating_sub(self.capacity);
        self.candles.extend(seed[skip..].iter().copied());
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// One OHLC bar. `ts` is the bar open time in UTC epoch seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
        }
    }

    pub fn flat(ts: i64, price: f64) -> Self {
        Self::new(ts, price, price, price, price)
    }

    pub fn hour_utc(&self) -> u32 {
        DateTime::from_timestamp(self.ts, 0)
            .map(|dt| dt.hour())
            .unwrap_or(0)
    }
}

pub fn load_candles_from_csv(path: &Path) -> Result<Vec<Candle>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open csv: {}", path.display()))?;
    read_candles(file).with_context(|| format!("failed to read csv: {}", path.display()))
}

/// Reads `time,open,high,low,close` rows. Rows that do not parse are skipped,
/// the result is sorted by time.
pub fn read_candles<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut candles = Vec::new();
    for rec in rdr.records() {
        let r = match rec {
            Ok(x) => x,
            Err(_) => continue,
        };
        let ts = r.get(0).and_then(parse_timestamp);
        let o = r.get(1).and_then(|x| x.trim().parse::<f64>().ok());
        let h = r.get(2).and_then(|x| x.trim().parse::<f64>().ok());
        let l = r.get(3).and_then(|x| x.trim().parse::<f64>().ok());
        let c = r.get(4).and_then(|x| x.trim().parse::<f64>().ok());
        if let (Some(ts), Some(open), Some(high), Some(low), Some(close)) = (ts, o, h, l, c) {
            candles.push(Candle::new(ts, open, high, low, close));
        }
    }
    candles.sort_by_key(|c| c.ts);
    Ok(candles)
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(n) = s.parse::<i64>() {
        // anything this large is epoch milliseconds
        return Some(if n.abs() >= 100_000_000_000 { n / 1000 } else { n });
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    None
}

/// Aggregates sorted candles into `minutes`-wide buckets labelled by their left edge.
pub fn resample(candles: &[Candle], minutes: u32) -> Vec<Candle> {
    if minutes <= 1 {
        return candles.to_vec();
    }
    let width = minutes as i64 * 60;
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len() / minutes as usize + 1);

    for c in candles {
        let bucket = c.ts.div_euclid(width) * width;
        match out.last_mut() {
            Some(last) if last.ts == bucket => {
                last.high = last.high.max(c.high);
                last.low = last.low.min(c.low);
                last.close = c.close;
            }
            _ => out.push(Candle::new(bucket, c.open, c.high, c.low, c.close)),
        }
    }
    out
}

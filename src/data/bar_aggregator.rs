/// Bar aggregation from live quotes
use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{Bar, BarExtras, Frequency};

/// Counters kept per aggregator; drops and clamps are counted, never raised
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregatorStats {
    pub updates: u64,
    pub emitted: u64,
    pub late_dropped: u64,
    pub invalid_dropped: u64,
    pub volume_clamped: u64,
}

/// Bar in progress (not yet complete)
#[derive(Debug, Clone)]
struct PartialBar {
    bucket: NaiveDateTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    quote_count: usize,
}

impl PartialBar {
    fn new(bucket: NaiveDateTime, price: f64, volume: f64) -> Self {
        PartialBar {
            bucket,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            quote_count: 1,
        }
    }

    fn update(&mut self, price: f64, volume: f64) {
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.volume += volume;
        self.quote_count += 1;
    }

    fn to_bar(&self, symbol: &str, timeframe: Frequency, source: &str) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            frequency: timeframe,
            date: self.bucket.date(),
            time: timeframe.is_intraday().then(|| self.bucket.time()),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            amount: None,
            extras: BarExtras::default(),
            source: source.to_string(),
            provisional: true,
        }
    }
}

/// OHLCV aggregator for a single symbol and timeframe.
///
/// Owned by one dispatch loop; quotes must arrive in order. A quote in a later
/// bucket completes the open bar, which `update` returns.
pub struct TimeframeAggregator {
    symbol: String,
    timeframe: Frequency,
    source: String,
    current: Option<PartialBar>,
    last_closed: Option<NaiveDateTime>,
    stats: AggregatorStats,
}

impl TimeframeAggregator {
    pub fn new(symbol: impl Into<String>, timeframe: Frequency, source: impl Into<String>) -> Self {
        TimeframeAggregator {
            symbol: symbol.into(),
            timeframe,
            source: source.into(),
            current: None,
            last_closed: None,
            stats: AggregatorStats::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Frequency {
        self.timeframe
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Apply one quote. Returns the completed bar when `ts` opens a later bucket.
    pub fn update(&mut self, ts: NaiveDateTime, price: f64, volume_increment: f64) -> Option<Bar> {
        if !price.is_finite() || price <= 0.0 {
            self.stats.invalid_dropped += 1;
            debug!("{} {}: dropped quote with price {}", self.symbol, self.timeframe, price);
            return None;
        }

        let volume = if volume_increment.is_finite() && volume_increment >= 0.0 {
            volume_increment
        } else {
            self.stats.volume_clamped += 1;
            debug!(
                "{} {}: clamped volume increment {} to 0",
                self.symbol, self.timeframe, volume_increment
            );
            0.0
        };

        let bucket = self.timeframe.bucket_start(ts);

        let floor = self.current.as_ref().map(|bar| bar.bucket).or(self.last_closed);
        let is_late = match (&self.current, floor) {
            (Some(_), Some(open)) => bucket < open,
            (None, Some(closed)) => bucket <= closed,
            _ => false,
        };
        if is_late {
            self.stats.late_dropped += 1;
            debug!(
                "{} {}: dropped late quote for bucket {} (open: {:?})",
                self.symbol, self.timeframe, bucket, floor
            );
            return None;
        }

        self.stats.updates += 1;
        match self.current.as_mut() {
            Some(bar) if bar.bucket == bucket => {
                bar.update(price, volume);
                None
            }
            Some(_) => {
                let completed = self.close_current();
                self.current = Some(PartialBar::new(bucket, price, volume));
                completed
            }
            None => {
                self.current = Some(PartialBar::new(bucket, price, volume));
                None
            }
        }
    }

    /// Snapshot of the open bar (for monitoring)
    pub fn current_bar(&self) -> Option<Bar> {
        self.current
            .as_ref()
            .map(|bar| bar.to_bar(&self.symbol, self.timeframe, &self.source))
    }

    /// Emit the open bar, if any, and return to the empty state
    pub fn flush(&mut self) -> Option<Bar> {
        self.close_current()
    }

    fn close_current(&mut self) -> Option<Bar> {
        let bar = self.current.take()?;
        self.last_closed = Some(bar.bucket);
        self.stats.emitted += 1;
        let completed = bar.to_bar(&self.symbol, self.timeframe, &self.source);
        debug!(
            "📊 Bar completed: {} {} @ {} {:?} - O:{:.2} H:{:.2} L:{:.2} C:{:.2} V:{} ({} quotes)",
            self.symbol,
            self.timeframe,
            completed.date,
            completed.time,
            completed.open,
            completed.high,
            completed.low,
            completed.close,
            completed.volume,
            bar.quote_count
        );
        Some(completed)
    }
}

/// Turns session-cumulative volume into per-quote increments.
///
/// The first observation for a symbol only sets the baseline. A counter that
/// goes backwards yields zero and becomes the new baseline.
#[derive(Debug, Default)]
pub struct VolumeTracker {
    baselines: HashMap<String, f64>,
    rollbacks: u64,
}

impl VolumeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, symbol: &str, cumulative: f64) -> f64 {
        if !cumulative.is_finite() {
            return 0.0;
        }
        match self.baselines.insert(symbol.to_string(), cumulative) {
            None => 0.0,
            Some(previous) if cumulative >= previous => cumulative - previous,
            Some(previous) => {
                self.rollbacks += 1;
                warn!(
                    "⚠️  {} cumulative volume went back from {} to {}, rebasing",
                    symbol, previous, cumulative
                );
                0.0
            }
        }
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks
    }

    /// Forget every baseline, e.g. at a new session
    pub fn reset(&mut self) {
        self.baselines.clear();
    }
}

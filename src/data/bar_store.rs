/// Bar repository: ordered in-memory index + JSONL journal on disk
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::data::journal::Journal;
use crate::error::Result;
use crate::types::{Bar, BarKey, Frequency};

/// Idempotent storage for bars keyed by (symbol, frequency, date[, time])
#[async_trait]
pub trait BarRepository: Send + Sync {
    /// Insert or replace bars by key; returns how many were accepted.
    ///
    /// A provisional bar never replaces an authoritative one.
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<usize>;

    async fn find_latest_bar_date(&self, symbol: &str, frequency: Frequency) -> Result<Option<NaiveDate>>;

    async fn get_bar(&self, key: &BarKey) -> Result<Option<Bar>>;

    /// Bars for one symbol with `start <= date <= end`, in key order
    async fn range(
        &self,
        symbol: &str,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>>;

    /// Symbols with at least one bar in the window whose pct change >= threshold
    async fn find_symbols_by_pct_change(
        &self,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
        threshold: f64,
    ) -> Result<Vec<String>>;

    /// Number of stored bars, optionally for one frequency
    async fn count(&self, frequency: Option<Frequency>) -> Result<usize>;
}

/// File-backed bar store
pub struct BarStore {
    bars: RwLock<BTreeMap<BarKey, Bar>>,
    journal: Option<Journal>,
}

impl BarStore {
    pub fn in_memory() -> Self {
        BarStore {
            bars: RwLock::new(BTreeMap::new()),
            journal: None,
        }
    }

    /// Open a store and replay its journal (last write wins)
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::new(path);
        let entries: Vec<Bar> = journal.replay().await?;

        let mut bars = BTreeMap::new();
        for bar in entries {
            bars.insert(bar.key(), bar);
        }

        info!("📂 Loaded {} bars from {}", bars.len(), journal.path().display());

        Ok(BarStore {
            bars: RwLock::new(bars),
            journal: Some(journal),
        })
    }

    /// Shared handle for engines
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Rewrite the journal to one line per key, archiving the old one
    pub async fn compact(&self) -> Result<Option<PathBuf>> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };
        let bars = self.bars.write().await;
        let snapshot: Vec<&Bar> = bars.values().collect();
        journal.compact(&snapshot).await
    }

    /// Distinct symbols holding bars of a frequency
    pub async fn symbols(&self, frequency: Frequency) -> BTreeSet<String> {
        let bars = self.bars.read().await;
        bars.keys()
            .filter(|k| k.frequency == frequency)
            .map(|k| k.symbol.clone())
            .collect()
    }
}

fn symbol_bounds(
    symbol: &str,
    frequency: Frequency,
    start: NaiveDate,
    end: NaiveDate,
) -> (Bound<BarKey>, Bound<BarKey>) {
    let lower = BarKey {
        symbol: symbol.to_string(),
        frequency,
        date: start,
        time: None,
    };
    let upper = BarKey {
        symbol: symbol.to_string(),
        frequency,
        date: end,
        time: Some(NaiveTime::from_hms_nano_opt(23, 59, 59, 1_999_999_999).unwrap_or(NaiveTime::MIN)),
    };
    (Bound::Included(lower), Bound::Included(upper))
}

#[async_trait]
impl BarRepository for BarStore {
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut index = self.bars.write().await;

        let mut accepted = Vec::with_capacity(bars.len());
        let mut changed = Vec::new();
        for bar in bars {
            let key = bar.key();
            match index.get(&key) {
                Some(existing) if bar.provisional && !existing.provisional => {
                    debug!("Keeping authoritative bar {} {} {}", key.symbol, key.frequency, key.date);
                    continue;
                }
                Some(existing) if existing == bar => {}
                _ => changed.push(bar.clone()),
            }
            accepted.push(key);
        }

        // Durable before visible
        if let Some(journal) = &self.journal {
            journal.append(&changed).await?;
        }
        for bar in changed {
            index.insert(bar.key(), bar);
        }

        Ok(accepted.len())
    }

    async fn find_latest_bar_date(&self, symbol: &str, frequency: Frequency) -> Result<Option<NaiveDate>> {
        let index = self.bars.read().await;
        Ok(index
            .range(symbol_bounds(symbol, frequency, NaiveDate::MIN, NaiveDate::MAX))
            .next_back()
            .map(|(key, _)| key.date))
    }

    async fn get_bar(&self, key: &BarKey) -> Result<Option<Bar>> {
        let index = self.bars.read().await;
        Ok(index.get(key).cloned())
    }

    async fn range(
        &self,
        symbol: &str,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>> {
        if start > end {
            return Ok(Vec::new());
        }
        let index = self.bars.read().await;
        Ok(index
            .range(symbol_bounds(symbol, frequency, start, end))
            .map(|(_, bar)| bar.clone())
            .collect())
    }

    async fn find_symbols_by_pct_change(
        &self,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
        threshold: f64,
    ) -> Result<Vec<String>> {
        let index = self.bars.read().await;
        let symbols: BTreeSet<String> = index
            .iter()
            .filter(|(key, _)| key.frequency == frequency && key.date >= start && key.date <= end)
            .filter(|(_, bar)| bar.extras.pct_chg.is_some_and(|pct| pct >= threshold))
            .map(|(key, _)| key.symbol.clone())
            .collect();
        Ok(symbols.into_iter().collect())
    }

    async fn count(&self, frequency: Option<Frequency>) -> Result<usize> {
        let index = self.bars.read().await;
        Ok(match frequency {
            Some(f) => index.keys().filter(|k| k.frequency == f).count(),
            None => index.len(),
        })
    }
}

/// Quarterly fundamentals keyed by (symbol, year, quarter, report type)
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::data::journal::Journal;
use crate::error::Result;
use crate::types::{FinancialKey, FinancialRecord, QuarterMarker};

#[async_trait]
pub trait FinancialRepository: Send + Sync {
    /// Insert or replace by key; returns how many were accepted
    async fn upsert_records(&self, records: &[FinancialRecord]) -> Result<usize>;

    /// Latest quarter with any stored report for the symbol
    async fn latest_quarter(&self, symbol: &str) -> Result<Option<QuarterMarker>>;

    async fn get(&self, key: &FinancialKey) -> Result<Option<FinancialRecord>>;

    async fn records_for(&self, symbol: &str) -> Result<Vec<FinancialRecord>>;
}

pub struct FinanceStore {
    records: RwLock<BTreeMap<FinancialKey, FinancialRecord>>,
    journal: Option<Journal>,
}

impl FinanceStore {
    pub fn in_memory() -> Self {
        FinanceStore {
            records: RwLock::new(BTreeMap::new()),
            journal: None,
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::new(path);
        let entries: Vec<FinancialRecord> = journal.replay().await?;

        let mut records = BTreeMap::new();
        for record in entries {
            records.insert(record.key(), record);
        }

        info!("📂 Loaded {} financial records from {}", records.len(), journal.path().display());

        Ok(FinanceStore {
            records: RwLock::new(records),
            journal: Some(journal),
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl FinancialRepository for FinanceStore {
    async fn upsert_records(&self, incoming: &[FinancialRecord]) -> Result<usize> {
        let mut records = self.records.write().await;
        let changed: Vec<FinancialRecord> = incoming
            .iter()
            .filter(|r| records.get(&r.key()) != Some(*r))
            .cloned()
            .collect();

        if let Some(journal) = &self.journal {
            journal.append(&changed).await?;
        }
        for record in changed {
            records.insert(record.key(), record);
        }
        Ok(incoming.len())
    }

    async fn latest_quarter(&self, symbol: &str) -> Result<Option<QuarterMarker>> {
        let records = self.records.read().await;
        Ok(records
            .keys()
            .filter(|k| k.symbol == symbol)
            .map(|k| QuarterMarker { year: k.year, quarter: k.quarter })
            .max())
    }

    async fn get(&self, key: &FinancialKey) -> Result<Option<FinancialRecord>> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned())
    }

    async fn records_for(&self, symbol: &str) -> Result<Vec<FinancialRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect())
    }
}

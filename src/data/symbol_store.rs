/// Symbol reference data and per-frequency sync watermarks
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::data::journal::Journal;
use crate::error::Result;
use crate::types::{Frequency, QuarterMarker, ReportType, SecurityType, SymbolRecord, SymbolStatus};

/// Symbol universe plus the watermark store
#[async_trait]
pub trait SymbolRepository: Send + Sync {
    async fn get(&self, symbol: &str) -> Result<Option<SymbolRecord>>;

    async fn list(&self) -> Result<Vec<SymbolRecord>>;

    /// Merge basic-info fields; watermarks, markers and industry tags are kept
    async fn upsert_basic(&self, records: &[SymbolRecord]) -> Result<usize>;

    /// Insert a temporary record if the symbol is unknown; true when inserted
    async fn ensure_placeholder(&self, symbol: &str, security_type: SecurityType) -> Result<bool>;

    async fn get_watermark(&self, symbol: &str, frequency: Frequency) -> Result<Option<NaiveDate>>;

    /// Advance the watermark; an earlier date is ignored. Returns the stored value.
    async fn update_watermark(&self, symbol: &str, frequency: Frequency, date: NaiveDate) -> Result<NaiveDate>;

    /// Advance the fundamentals marker and the markers of the given report types
    async fn update_quarter_marker(
        &self,
        symbol: &str,
        report_types: &[ReportType],
        marker: QuarterMarker,
    ) -> Result<QuarterMarker>;

    async fn mark_delisted(&self, symbols: &[String]) -> Result<usize>;

    async fn set_industry(&self, symbol: &str, code: Option<String>, name: Option<String>) -> Result<()>;
}

/// File-backed symbol store. Every mutation appends the full updated record.
pub struct SymbolStore {
    records: RwLock<BTreeMap<String, SymbolRecord>>,
    journal: Option<Journal>,
}

impl SymbolStore {
    pub fn in_memory() -> Self {
        SymbolStore {
            records: RwLock::new(BTreeMap::new()),
            journal: None,
        }
    }

    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::new(path);
        let entries: Vec<SymbolRecord> = journal.replay().await?;

        let mut records = BTreeMap::new();
        for record in entries {
            records.insert(record.symbol.clone(), record);
        }

        info!("📂 Loaded {} symbols from {}", records.len(), journal.path().display());

        Ok(SymbolStore {
            records: RwLock::new(records),
            journal: Some(journal),
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub async fn compact(&self) -> Result<Option<PathBuf>> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };
        let records = self.records.write().await;
        let snapshot: Vec<&SymbolRecord> = records.values().collect();
        journal.compact(&snapshot).await
    }

    async fn persist(&self, changed: &[SymbolRecord]) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.append(changed).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SymbolRepository for SymbolStore {
    async fn get(&self, symbol: &str) -> Result<Option<SymbolRecord>> {
        let records = self.records.read().await;
        Ok(records.get(symbol).cloned())
    }

    async fn list(&self) -> Result<Vec<SymbolRecord>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn upsert_basic(&self, incoming: &[SymbolRecord]) -> Result<usize> {
        let mut records = self.records.write().await;

        let mut changed = Vec::new();
        for basic in incoming {
            let merged = match records.get(&basic.symbol) {
                Some(existing) => SymbolRecord {
                    symbol: existing.symbol.clone(),
                    name: basic.name.clone(),
                    ipo_date: basic.ipo_date,
                    out_date: basic.out_date,
                    security_type: basic.security_type,
                    status: basic.status,
                    source: basic.source.clone(),
                    temporary: false,
                    industry_code: existing.industry_code.clone(),
                    industry_name: existing.industry_name.clone(),
                    watermarks: existing.watermarks.clone(),
                    last_finance_quarter: existing.last_finance_quarter,
                    report_markers: existing.report_markers.clone(),
                },
                None => SymbolRecord {
                    temporary: false,
                    ..basic.clone()
                },
            };
            if records.get(&basic.symbol) != Some(&merged) {
                changed.push(merged);
            }
        }

        self.persist(&changed).await?;
        let count = changed.len();
        for record in changed {
            records.insert(record.symbol.clone(), record);
        }

        debug!("Upserted basic info: {} of {} changed", count, incoming.len());
        Ok(count)
    }

    async fn ensure_placeholder(&self, symbol: &str, security_type: SecurityType) -> Result<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(symbol) {
            return Ok(false);
        }
        let record = SymbolRecord::placeholder(symbol, security_type);
        self.persist(std::slice::from_ref(&record)).await?;
        records.insert(symbol.to_string(), record);
        Ok(true)
    }

    async fn get_watermark(&self, symbol: &str, frequency: Frequency) -> Result<Option<NaiveDate>> {
        let records = self.records.read().await;
        Ok(records.get(symbol).and_then(|r| r.watermark(frequency)))
    }

    async fn update_watermark(&self, symbol: &str, frequency: Frequency, date: NaiveDate) -> Result<NaiveDate> {
        let mut records = self.records.write().await;
        let mut record = records
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| SymbolRecord::placeholder(symbol, SecurityType::Stock));

        match record.watermark(frequency) {
            Some(current) if current >= date => return Ok(current),
            _ => {}
        }
        record.watermarks.insert(frequency.as_str().to_string(), date);

        self.persist(std::slice::from_ref(&record)).await?;
        records.insert(symbol.to_string(), record);
        Ok(date)
    }

    async fn update_quarter_marker(
        &self,
        symbol: &str,
        report_types: &[ReportType],
        marker: QuarterMarker,
    ) -> Result<QuarterMarker> {
        let mut records = self.records.write().await;
        let mut record = records
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| SymbolRecord::placeholder(symbol, SecurityType::Stock));
        let before = record.clone();

        for report_type in report_types {
            let entry = record
                .report_markers
                .entry(report_type.as_str().to_string())
                .or_insert(marker);
            if *entry < marker {
                *entry = marker;
            }
        }
        let stored = match record.last_finance_quarter {
            Some(current) if current >= marker => current,
            _ => marker,
        };
        record.last_finance_quarter = Some(stored);

        if record != before {
            self.persist(std::slice::from_ref(&record)).await?;
            records.insert(symbol.to_string(), record);
        }
        Ok(stored)
    }

    async fn mark_delisted(&self, symbols: &[String]) -> Result<usize> {
        let mut records = self.records.write().await;
        let mut changed = Vec::new();
        for symbol in symbols {
            if let Some(record) = records.get(symbol) {
                if record.status != SymbolStatus::Delisted {
                    changed.push(SymbolRecord {
                        status: SymbolStatus::Delisted,
                        ..record.clone()
                    });
                }
            }
        }

        self.persist(&changed).await?;
        let count = changed.len();
        for record in changed {
            records.insert(record.symbol.clone(), record);
        }
        Ok(count)
    }

    async fn set_industry(&self, symbol: &str, code: Option<String>, name: Option<String>) -> Result<()> {
        let mut records = self.records.write().await;
        let mut record = records
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| SymbolRecord::placeholder(symbol, SecurityType::Stock));
        if record.industry_code == code && record.industry_name == name && records.contains_key(symbol) {
            return Ok(());
        }
        record.industry_code = code;
        record.industry_name = name;

        self.persist(std::slice::from_ref(&record)).await?;
        records.insert(symbol.to_string(), record);
        Ok(())
    }
}

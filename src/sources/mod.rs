/// Vendor capabilities consumed by the sync engines
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::types::{Frequency, Quote, RawBatch, ReportType};

#[cfg(test)]
pub mod testing;

/// Rate-limited history API (Baostock-like)
#[async_trait]
pub trait HistoryDataSource: Send + Sync {
    /// Bars for `[start, end]` inclusive, rows in the frequency's field schema
    async fn query_range(
        &self,
        symbol: &str,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawBatch>;

    /// Full security listing
    async fn query_basic(&self) -> Result<RawBatch>;
}

/// Live quote snapshots
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn poll(&self, symbols: &[String]) -> Result<Vec<Quote>>;
}

/// Quarterly fundamentals API
#[async_trait]
pub trait FinancialsSource: Send + Sync {
    async fn query(
        &self,
        symbol: &str,
        year: i32,
        quarter: u8,
        report_type: ReportType,
    ) -> Result<RawBatch>;
}

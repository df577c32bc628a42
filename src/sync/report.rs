/// Per-run sync reports
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::types::Frequency;

/// Range a dry run would have fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedRange {
    pub symbol: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub symbol: String,
    pub error_code: String,
    pub error: String,
}

/// What happened to one unit of work (usually one symbol)
#[derive(Debug)]
pub enum ItemOutcome {
    /// Data persisted; `latest` is the new watermark candidate
    Synced { written: usize, latest: Option<NaiveDate> },
    /// Vendor returned nothing
    Empty,
    /// Nothing to fetch (already up to date)
    Skipped,
    Planned { start: String, end: String },
    Failed(SyncError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub task: String,
    pub frequency: Option<Frequency>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub succeeded: usize,
    pub empty: usize,
    pub skipped: usize,
    pub records_written: usize,
    pub planned: Vec<PlannedRange>,
    pub failed: Vec<FailedItem>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new(task: impl Into<String>, frequency: Option<Frequency>, dry_run: bool) -> Self {
        SyncReport {
            run_id: Uuid::new_v4(),
            task: task.into(),
            frequency,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            total: 0,
            succeeded: 0,
            empty: 0,
            skipped: 0,
            records_written: 0,
            planned: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    pub fn record(&mut self, symbol: &str, outcome: ItemOutcome) {
        self.total += 1;
        match outcome {
            ItemOutcome::Synced { written, .. } => {
                self.succeeded += 1;
                self.records_written += written;
            }
            ItemOutcome::Empty => self.empty += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Planned { start, end } => self.planned.push(PlannedRange {
                symbol: symbol.to_string(),
                start,
                end,
            }),
            ItemOutcome::Failed(e) => self.failed.push(FailedItem {
                symbol: symbol.to_string(),
                error_code: e.error_code().to_string(),
                error: e.to_string(),
            }),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Share of non-failed items, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.total - self.failed.len()) as f64 / self.total as f64 * 100.0
    }

    pub fn elapsed_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn log_summary(&self) {
        let frequency = self.frequency.map(|f| f.as_str()).unwrap_or("-");
        info!(
            task = %self.task,
            frequency,
            total = self.total,
            succeeded = self.succeeded,
            empty = self.empty,
            skipped = self.skipped,
            failed = self.failed.len(),
            written = self.records_written,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed_secs = format!("{:.1}", self.elapsed_secs()),
            "✅ {} [{}] finished",
            self.task,
            frequency
        );
        if self.cancelled {
            warn!("⏹️  {} [{}] was cancelled before all items ran", self.task, frequency);
        }
        for failure in self.failed.iter().take(5) {
            warn!("   ❌ {} [{}] {}", failure.symbol, failure.error_code, failure.error);
        }
        if self.failed.len() > 5 {
            warn!("   ... and {} more failures", self.failed.len() - 5);
        }
    }

    /// Write `sync_report_<task>_<timestamp>.json` into `dir`
    pub async fn save_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let filename = dir.join(format!(
            "sync_report_{}_{}_{}.json",
            self.task,
            self.frequency.map(|f| f.as_str()).unwrap_or("all"),
            self.started_at.format("%Y%m%d_%H%M%S")
        ));

        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&filename, json).await?;

        info!("💾 Saved sync report to {}", filename.display());
        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accounting() {
        let mut report = SyncReport::new("kline", Some(Frequency::Daily), false);
        report.record("sh.600000", ItemOutcome::Synced { written: 5, latest: None });
        report.record("sh.600001", ItemOutcome::Empty);
        report.record("sh.600002", ItemOutcome::Skipped);
        report.record("sh.600003", ItemOutcome::Failed(SyncError::TransientFetch("timeout".into())));

        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.records_written, 5);
        assert_eq!(report.failed[0].error_code, "VENDOR_002");
        assert!((report.success_rate() - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_save_report() {
        let dir = std::env::temp_dir().join(format!("barsync_reports_{}", Uuid::new_v4()));
        let mut report = SyncReport::new("finance", None, true);
        report.record("sh.600000", ItemOutcome::Planned { start: "2024Q1".into(), end: "2024Q2".into() });
        report.finish();

        let path = report.save_to_dir(&dir).await.unwrap();
        let saved: SyncReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.run_id, report.run_id);
        assert_eq!(saved.planned.len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}

/// Quarterly fundamentals synchronization
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::budget::CallBudget;
use crate::data::{FinancialRepository, SymbolRepository};
use crate::error::{Result, SyncError};
use crate::sources::FinancialsSource;
use crate::sync::planner::{current_quarter, finance_min_year, quarter_range, resolve_start_quarter};
use crate::sync::report::{ItemOutcome, SyncReport};
use crate::sync::retry::RetryPolicy;
use crate::sync::schema::parse_financials;
use crate::types::{QuarterMarker, ReportType, SecurityType, SymbolStatus, SyncMode};
use crate::utils::{Clock, RequestPacer};

/// Result of walking one symbol's quarters
#[derive(Debug, Default)]
struct SymbolProgress {
    written: usize,
    /// Latest quarter with data, per report type
    with_data: Vec<(QuarterMarker, ReportType)>,
    first_failed: Option<QuarterMarker>,
    first_error: Option<SyncError>,
}

impl SymbolProgress {
    /// Marker to store: the latest quarter with data, held below any failed quarter
    fn marker(&self) -> Option<(QuarterMarker, Vec<ReportType>)> {
        let eligible: Vec<&(QuarterMarker, ReportType)> = self
            .with_data
            .iter()
            .filter(|(q, _)| self.first_failed.map_or(true, |failed| *q < failed))
            .collect();
        let latest = eligible.iter().map(|(q, _)| *q).max()?;
        let types: BTreeSet<ReportType> = eligible.iter().map(|(_, t)| *t).collect();
        Some((latest, types.into_iter().collect()))
    }
}

pub struct FinanceSyncEngine {
    source: Arc<dyn FinancialsSource>,
    records: Arc<dyn FinancialRepository>,
    symbols: Arc<dyn SymbolRepository>,
    budget: Arc<CallBudget>,
    retry: RetryPolicy,
    pacer: RequestPacer,
    workers: usize,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl FinanceSyncEngine {
    pub fn new(
        source: Arc<dyn FinancialsSource>,
        records: Arc<dyn FinancialRepository>,
        symbols: Arc<dyn SymbolRepository>,
        budget: Arc<CallBudget>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        FinanceSyncEngine {
            source,
            records,
            symbols,
            budget,
            retry: RetryPolicy::default(),
            pacer: RequestPacer::unlimited(),
            workers: 1,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pacer(mut self, pacer: RequestPacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch every report type for each quarter after the stored marker, for all listed stocks
    pub async fn sync_financials(&self, mode: SyncMode, lookback_years: u32, dry_run: bool) -> Result<SyncReport> {
        let symbols: Vec<String> = self
            .symbols
            .list()
            .await?
            .into_iter()
            .filter(|r| r.security_type == SecurityType::Stock && r.status == SymbolStatus::Listed)
            .map(|r| r.symbol)
            .collect();

        let today = self.clock.today();
        let min_year = finance_min_year(today, lookback_years);
        let end = current_quarter(today);
        info!(
            "📑 Syncing fundamentals for {} stocks (mode: {:?}, from {}Q1 to {}, dry_run: {})",
            symbols.len(),
            mode,
            min_year,
            end,
            dry_run
        );

        let mut report = SyncReport::new("finance", None, dry_run);
        let aborted = AtomicBool::new(false);
        let aborted = &aborted;

        let mut results = stream::iter(&symbols)
            .map(move |symbol| async move {
                if aborted.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                    return (symbol, None);
                }
                let result = self.sync_symbol(symbol, mode, min_year, end, dry_run).await;
                if result.is_err() {
                    aborted.store(true, Ordering::SeqCst);
                }
                (symbol, Some(result))
            })
            .buffer_unordered(self.workers);

        let mut fatal = None;
        while let Some((symbol, result)) = results.next().await {
            match result {
                Some(Ok((outcome, extra_written))) => {
                    report.records_written += extra_written;
                    report.record(symbol, outcome);
                }
                Some(Err(e)) => {
                    error!(code = e.error_code(), "🛑 {} fundamentals: {}", symbol, e);
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                None => {
                    if self.cancel.is_cancelled() {
                        report.cancelled = true;
                    }
                }
            }
        }

        report.finish();
        if let Some(e) = fatal {
            report.log_summary();
            return Err(e);
        }
        Ok(report)
    }

    /// Outcome plus records written that the outcome itself doesn't carry
    async fn sync_symbol(
        &self,
        symbol: &str,
        mode: SyncMode,
        min_year: i32,
        end: QuarterMarker,
        dry_run: bool,
    ) -> Result<(ItemOutcome, usize)> {
        let marker = match self.symbols.get(symbol).await?.and_then(|r| r.last_finance_quarter) {
            Some(marker) => Some(marker),
            None => self.records.latest_quarter(symbol).await?,
        };
        let start = resolve_start_quarter(marker, mode, min_year);
        if start > end {
            debug!("{} fundamentals up to date at {:?}", symbol, marker);
            return Ok((ItemOutcome::Skipped, 0));
        }

        if dry_run {
            info!("📝 [dry run] {} fundamentals {}..{}", symbol, start, end);
            return Ok((
                ItemOutcome::Planned {
                    start: start.to_string(),
                    end: end.to_string(),
                },
                0,
            ));
        }

        let mut progress = SymbolProgress::default();
        for quarter in quarter_range(start, end) {
            for report_type in ReportType::ALL {
                match self.fetch_report(symbol, quarter, report_type).await {
                    Ok(0) => {}
                    Ok(written) => {
                        progress.written += written;
                        progress.with_data.push((quarter, report_type));
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(
                            code = e.error_code(),
                            "❌ {} {} {} failed: {}", symbol, quarter, report_type, e
                        );
                        progress.first_failed.get_or_insert(quarter);
                        progress.first_error.get_or_insert(e);
                    }
                }
            }
        }

        if let Some((marker, types)) = progress.marker() {
            let stored = self.symbols.update_quarter_marker(symbol, &types, marker).await?;
            debug!("{} fundamentals marker now {}", symbol, stored);
        }

        match progress.first_error.take() {
            Some(e) => Ok((ItemOutcome::Failed(e), progress.written)),
            None if progress.written == 0 => Ok((ItemOutcome::Empty, 0)),
            None => Ok((
                ItemOutcome::Synced {
                    written: progress.written,
                    latest: None,
                },
                0,
            )),
        }
    }

    /// One report query; returns the number of rows stored
    async fn fetch_report(&self, symbol: &str, quarter: QuarterMarker, report_type: ReportType) -> Result<usize> {
        let label = format!("{} {} {}", symbol, quarter, report_type);
        let batch = self
            .retry
            .run(&label, move |_| async move {
                self.pacer.acquire().await;
                self.budget.consume(1).await?;
                self.source
                    .query(symbol, quarter.year, quarter.quarter, report_type)
                    .await
            })
            .await?;

        let records = parse_financials(symbol, quarter.year, quarter.quarter, report_type, &batch)?;
        if records.is_empty() {
            return Ok(0);
        }
        self.records.upsert_records(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FinanceStore, SymbolStore};
    use crate::sources::testing::{Scripted, ScriptedFinancials};
    use crate::types::{FinancialKey, RawBatch, SymbolRecord};
    use crate::utils::ManualClock;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Harness {
        source: Arc<ScriptedFinancials>,
        records: Arc<FinanceStore>,
        symbols: Arc<SymbolStore>,
        engine: FinanceSyncEngine,
    }

    async fn harness(limit: u64) -> Harness {
        let clock = Arc::new(ManualClock::at_local(
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_hms_opt(18, 0, 0).unwrap(),
        ));
        let source = Arc::new(ScriptedFinancials::new());
        let records = FinanceStore::in_memory().shared();
        let symbols = SymbolStore::in_memory().shared();
        symbols.upsert_basic(&[SymbolRecord::new("sh.600000")]).await.unwrap();
        let budget = Arc::new(CallBudget::in_memory(limit, clock.clone()));
        let engine = FinanceSyncEngine::new(source.clone(), records.clone(), symbols.clone(), budget, clock)
            .with_retry(RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(2),
            });
        Harness {
            source,
            records,
            symbols,
            engine,
        }
    }

    fn q(year: i32, quarter: u8) -> QuarterMarker {
        QuarterMarker::new(year, quarter).unwrap()
    }

    #[tokio::test]
    async fn test_marker_advances_to_latest_quarter_with_data() {
        let h = harness(100).await;
        h.symbols
            .update_quarter_marker("sh.600000", &ReportType::ALL, q(2023, 4))
            .await
            .unwrap();
        h.source.push_report("sh.600000", 2024, 1, ReportType::Profit);
        h.source.push_report("sh.600000", 2024, 1, ReportType::Balance);

        let report = h.engine.sync_financials(SyncMode::Incremental, 10, false).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.records_written, 2);
        // 2024Q1 and 2024Q2, four report types each
        assert_eq!(h.source.call_count(), 8);

        let record = h.symbols.get("sh.600000").await.unwrap().unwrap();
        assert_eq!(record.last_finance_quarter, Some(q(2024, 1)));
        assert_eq!(record.report_markers.get("profit"), Some(&q(2024, 1)));
        assert_eq!(record.report_markers.get("cash_flow"), Some(&q(2023, 4)));

        let stored = h
            .records
            .get(&FinancialKey {
                symbol: "sh.600000".into(),
                year: 2024,
                quarter: 1,
                report_type: ReportType::Profit,
            })
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_empty_quarters_do_not_advance_marker() {
        let h = harness(100).await;
        h.symbols
            .update_quarter_marker("sh.600000", &ReportType::ALL, q(2024, 1))
            .await
            .unwrap();

        let report = h.engine.sync_financials(SyncMode::Incremental, 10, false).await.unwrap();

        assert_eq!(report.empty, 1);
        let record = h.symbols.get("sh.600000").await.unwrap().unwrap();
        assert_eq!(record.last_finance_quarter, Some(q(2024, 1)));
    }

    #[tokio::test]
    async fn test_failed_quarter_caps_marker() {
        let h = harness(100).await;
        h.symbols
            .update_quarter_marker("sh.600000", &ReportType::ALL, q(2023, 3))
            .await
            .unwrap();
        for _ in 0..2 {
            h.source
                .push("sh.600000", 2023, 4, ReportType::Profit, Scripted::Transient("timeout".into()));
        }
        h.source.push_report("sh.600000", 2024, 1, ReportType::Profit);

        let report = h.engine.sync_financials(SyncMode::Incremental, 10, false).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.records_written, 1);
        let record = h.symbols.get("sh.600000").await.unwrap().unwrap();
        assert_eq!(record.last_finance_quarter, Some(q(2023, 3)));
    }

    #[tokio::test]
    async fn test_lookback_without_marker() {
        let h = harness(100).await;
        h.source.push_report("sh.600000", 2024, 2, ReportType::Dupont);

        h.engine.sync_financials(SyncMode::Incremental, 1, false).await.unwrap();

        // 2024Q1 and 2024Q2 only
        assert_eq!(h.source.call_count(), 8);
        let record = h.symbols.get("sh.600000").await.unwrap().unwrap();
        assert_eq!(record.last_finance_quarter, Some(q(2024, 2)));
        assert_eq!(record.report_markers.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_plans_quarter_range() {
        let h = harness(100).await;
        let report = h.engine.sync_financials(SyncMode::Full, 2, true).await.unwrap();

        assert_eq!(report.planned.len(), 1);
        assert_eq!(report.planned[0].start, "2023Q1");
        assert_eq!(report.planned[0].end, "2024Q2");
        assert_eq!(h.source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_quota_aborts_finance_run() {
        let h = harness(3).await;
        let err = h.engine.sync_financials(SyncMode::Incremental, 1, false).await.unwrap_err();

        assert!(matches!(err, SyncError::QuotaExceeded { .. }));
        assert_eq!(h.source.call_count(), 3);
        let record = h.symbols.get("sh.600000").await.unwrap().unwrap();
        assert_eq!(record.last_finance_quarter, None);
    }

    #[tokio::test]
    async fn test_field_drift_aborts_finance_run() {
        let h = harness(100).await;
        h.symbols
            .update_quarter_marker("sh.600000", &ReportType::ALL, q(2024, 1))
            .await
            .unwrap();
        let drifted = RawBatch::new(&["totally", "different"], vec![vec!["a".into(), "b".into()]]);
        h.source
            .push("sh.600000", 2024, 2, ReportType::Profit, Scripted::Batch(drifted));

        let err = h.engine.sync_financials(SyncMode::Incremental, 10, false).await.unwrap_err();

        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
        assert_eq!(h.records.len().await, 0);
        let record = h.symbols.get("sh.600000").await.unwrap().unwrap();
        assert_eq!(record.last_finance_quarter, Some(q(2024, 1)));
    }
}

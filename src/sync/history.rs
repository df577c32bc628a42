/// Incremental bar synchronization against a history vendor
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::budget::CallBudget;
use crate::config::HistoryConfig;
use crate::data::{BarRepository, SymbolRepository};
use crate::error::{Result, SyncError};
use crate::sources::HistoryDataSource;
use crate::sync::planner::{resolve_start_date, trailing_window};
use crate::sync::report::{ItemOutcome, SyncReport};
use crate::sync::retry::RetryPolicy;
use crate::sync::schema::parse_bars;
use crate::types::{Frequency, LookbackSpan, SymbolStatus, SyncMode};
use crate::utils::{Clock, RequestPacer};

/// How start dates are chosen for a watermark-driven run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Used only when a symbol has no watermark
    pub lookback: Option<LookbackSpan>,
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            mode: SyncMode::Incremental,
            lookback: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Window {
    FromWatermark(SyncOptions),
    Fixed { start: NaiveDate, end: NaiveDate },
}

pub struct HistorySyncEngine {
    source: Arc<dyn HistoryDataSource>,
    bars: Arc<dyn BarRepository>,
    symbols: Arc<dyn SymbolRepository>,
    budget: Arc<CallBudget>,
    retry: RetryPolicy,
    pacer: RequestPacer,
    settings: HistoryConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl HistorySyncEngine {
    pub fn new(
        source: Arc<dyn HistoryDataSource>,
        bars: Arc<dyn BarRepository>,
        symbols: Arc<dyn SymbolRepository>,
        budget: Arc<CallBudget>,
        settings: HistoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pacer = RequestPacer::new(settings.request_interval());
        HistorySyncEngine {
            source,
            bars,
            symbols,
            budget,
            retry: RetryPolicy::default(),
            pacer,
            settings,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &HistoryConfig {
        &self.settings
    }

    /// Options from the configured mode and the frequency's lookback
    pub fn default_options(&self, frequency: Frequency, dry_run: bool) -> SyncOptions {
        SyncOptions {
            mode: self.settings.mode,
            lookback: self.settings.lookback(frequency),
            dry_run,
        }
    }

    /// Bring every symbol up to today for one frequency, starting after its watermark
    pub async fn sync_frequency(
        &self,
        frequency: Frequency,
        symbols: &[String],
        options: SyncOptions,
    ) -> Result<SyncReport> {
        info!(
            "📊 Syncing {} bars for {} symbols (mode: {:?}, dry_run: {})",
            frequency,
            symbols.len(),
            options.mode,
            options.dry_run
        );
        self.run_batch("kline", frequency, symbols, Window::FromWatermark(options), options.dry_run)
            .await
    }

    /// Re-fetch a fixed window for every symbol, ignoring watermarks
    pub async fn sync_range(
        &self,
        task: &str,
        frequency: Frequency,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        dry_run: bool,
    ) -> Result<SyncReport> {
        if start > end {
            return Err(SyncError::InvalidParameter(format!(
                "window start {} is after end {}",
                start, end
            )));
        }
        info!(
            "🔁 {}: re-fetching {} bars {}..{} for {} symbols",
            task,
            frequency,
            start,
            end,
            symbols.len()
        );
        self.run_batch(task, frequency, symbols, Window::Fixed { start, end }, dry_run)
            .await
    }

    /// Re-fetch intraday bars for symbols that hit the daily limit recently
    pub async fn resync_limit_up(
        &self,
        days: i64,
        frequency: Frequency,
        pct_threshold: f64,
        dry_run: bool,
    ) -> Result<SyncReport> {
        if !frequency.is_intraday() {
            return Err(SyncError::InvalidParameter(format!(
                "limit-up resync needs an intraday frequency, got {}",
                frequency
            )));
        }

        let today = self.clock.today();
        let Some((scan_start, scan_end)) =
            trailing_window(days, self.settings.min_start(Frequency::Daily), today)
        else {
            return Err(SyncError::InvalidParameter(format!("limit-up window of {} days", days)));
        };

        let candidates = self
            .bars
            .find_symbols_by_pct_change(Frequency::Daily, scan_start, scan_end, pct_threshold)
            .await?;
        info!(
            "🚀 {} symbols closed >= {:.1}% between {} and {}",
            candidates.len(),
            pct_threshold,
            scan_start,
            scan_end
        );

        let Some((start, end)) = trailing_window(days, self.settings.min_start(frequency), today) else {
            let mut report = SyncReport::new("limit_up", Some(frequency), dry_run);
            report.finish();
            return Ok(report);
        };
        self.sync_range("limit_up", frequency, &candidates, start, end, dry_run)
            .await
    }

    /// Whether a frequency needs a catch-up run: nothing stored yet, a listed
    /// symbol without a watermark, or a watermark older than `expected`
    pub async fn needs_backfill(&self, frequency: Frequency, expected: NaiveDate) -> Result<bool> {
        if self.bars.count(Some(frequency)).await? == 0 {
            debug!("{} has no stored bars", frequency);
            return Ok(true);
        }

        for record in self.symbols.list().await? {
            if record.temporary || record.status != SymbolStatus::Listed {
                continue;
            }
            match record.watermark(frequency) {
                None => {
                    debug!("{} has no {} watermark", record.symbol, frequency);
                    return Ok(true);
                }
                Some(watermark) if watermark < expected => {
                    debug!(
                        "{} {} watermark {} is behind {}",
                        record.symbol, frequency, watermark, expected
                    );
                    return Ok(true);
                }
                Some(_) => {}
            }
        }
        Ok(false)
    }

    async fn run_batch(
        &self,
        task: &str,
        frequency: Frequency,
        symbols: &[String],
        window: Window,
        dry_run: bool,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::new(task, Some(frequency), dry_run);
        let today = self.clock.today();
        let aborted = AtomicBool::new(false);
        let aborted = &aborted;

        let mut results = stream::iter(symbols)
            .map(move |symbol| async move {
                if aborted.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                    return (symbol, None);
                }
                let outcome = self.sync_symbol(symbol, frequency, window, dry_run, today).await;
                if outcome.is_err() {
                    aborted.store(true, Ordering::SeqCst);
                }
                (symbol, Some(outcome))
            })
            .buffer_unordered(self.settings.workers.max(1));

        let mut fatal = None;
        while let Some((symbol, outcome)) = results.next().await {
            match outcome {
                Some(Ok(outcome)) => report.record(symbol, outcome),
                Some(Err(e)) => {
                    error!(code = e.error_code(), "🛑 {} {}: {}", symbol, frequency, e);
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

    async fn sync_symbol(
        &self,
        symbol: &str,
        frequency: Frequency,
        window: Window,
        dry_run: bool,
        today: NaiveDate,
    ) -> Result<ItemOutcome> {
        let (start, end) = match window {
            Window::Fixed { start, end } => (start, end),
            Window::FromWatermark(options) => {
                let watermark = match options.mode {
                    SyncMode::Full => None,
                    _ => self.current_watermark(symbol, frequency).await?,
                };
                let min_start = self.settings.min_start(frequency);
                match resolve_start_date(watermark, options.mode, options.lookback, min_start, today) {
                    Some(start) => (start, today),
                    None => {
                        debug!("{} {} is up to date", symbol, frequency);
                        return Ok(ItemOutcome::Skipped);
                    }
                }
            }
        };

        if dry_run {
            info!("📝 [dry run] {} {} {}..{}", symbol, frequency, start, end);
            return Ok(ItemOutcome::Planned {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        match self.fetch_and_store(symbol, frequency, start, end).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(code = e.error_code(), "❌ {} {} failed: {}", symbol, frequency, e);
                Ok(ItemOutcome::Failed(e))
            }
        }
    }

    /// Stored watermark, falling back to the newest bar on disk
    async fn current_watermark(&self, symbol: &str, frequency: Frequency) -> Result<Option<NaiveDate>> {
        match self.symbols.get_watermark(symbol, frequency).await? {
            Some(date) => Ok(Some(date)),
            None => self.bars.find_latest_bar_date(symbol, frequency).await,
        }
    }

    async fn fetch_and_store(
        &self,
        symbol: &str,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ItemOutcome> {
        let label = format!("{} {} {}..{}", symbol, frequency, start, end);
        let batch = self
            .retry
            .run(&label, move |_| async move {
                self.pacer.acquire().await;
                self.budget.consume(1).await?;
                self.source.query_range(symbol, frequency, start, end).await
            })
            .await?;

        let parsed = parse_bars(symbol, frequency, &batch, &self.settings.source_tag)?;
        let Some(latest) = parsed.bars.iter().map(|b| b.date).max() else {
            debug!("{} returned no rows", label);
            return Ok(ItemOutcome::Empty);
        };

        let written = self.bars.upsert_bars(&parsed.bars).await?;
        let watermark = self.symbols.update_watermark(symbol, frequency, latest).await?;
        debug!("{}: {} bars written, watermark {}", label, written, watermark);

        Ok(ItemOutcome::Synced {
            written,
            latest: Some(latest),
        })
    }
}

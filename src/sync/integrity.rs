/// Trailing-window re-fetch that repairs gaps and vendor revisions
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::sync::history::HistorySyncEngine;
use crate::sync::planner::trailing_window;
use crate::sync::report::SyncReport;
use crate::types::Frequency;
use crate::utils::Clock;

pub struct IntegrityScanner {
    engine: Arc<HistorySyncEngine>,
    clock: Arc<dyn Clock>,
}

impl IntegrityScanner {
    pub fn new(engine: Arc<HistorySyncEngine>, clock: Arc<dyn Clock>) -> Self {
        IntegrityScanner { engine, clock }
    }

    /// Window in days for a frequency; overrides win over configured defaults
    pub fn window_days(&self, frequency: Frequency, overrides: &BTreeMap<Frequency, i64>) -> i64 {
        overrides
            .get(&frequency)
            .copied()
            .or_else(|| self.engine.settings().integrity_window(frequency))
            .unwrap_or(0)
    }

    /// Re-run fetch and upsert over `[now - window, now]` for every frequency
    /// with a positive window. Watermarks only ever move forward, so this is
    /// safe to repeat.
    pub async fn scan(
        &self,
        symbols: &[String],
        frequencies: &[Frequency],
        overrides: &BTreeMap<Frequency, i64>,
        dry_run: bool,
    ) -> Result<Vec<SyncReport>> {
        let today = self.clock.today();
        let mut reports = Vec::new();

        for &frequency in frequencies {
            let days = self.window_days(frequency, overrides);
            let min_start = self.engine.settings().min_start(frequency);
            let Some((start, end)) = trailing_window(days, min_start, today) else {
                info!("⏭️  Integrity scan skips {} (window {} days)", frequency, days);
                continue;
            };

            info!("🔍 Integrity scan {} over {}..{} ({} days)", frequency, start, end, days);
            let report = self
                .engine
                .sync_range("integrity", frequency, symbols, start, end, dry_run)
                .await?;
            report.log_summary();
            reports.push(report);
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CallBudget;
    use crate::config::HistoryConfig;
    use crate::data::{BarRepository, BarStore, SymbolRepository, SymbolStore};
    use crate::sources::testing::{daily_row, ScriptedHistorySource};
    use crate::sync::retry::RetryPolicy;
    use crate::utils::ManualClock;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_scan_refetches_trailing_windows() {
        let clock = Arc::new(ManualClock::at_local(d(2024, 6, 15).and_hms_opt(20, 0, 0).unwrap()));
        let source = Arc::new(ScriptedHistorySource::new());
        let bars = BarStore::in_memory().shared();
        let symbols = SymbolStore::in_memory().shared();
        let budget = Arc::new(CallBudget::in_memory(100, clock.clone()));
        symbols
            .update_watermark("sh.600000", Frequency::Daily, d(2024, 6, 14))
            .await
            .unwrap();

        let settings = HistoryConfig {
            minute_start_date: d(2024, 6, 10),
            ..HistoryConfig::default()
        };
        let engine = HistorySyncEngine::new(
            source.clone(),
            bars.clone(),
            symbols.clone(),
            budget,
            settings,
            clock.clone(),
        )
        .with_retry(RetryPolicy::none());
        let scanner = IntegrityScanner::new(Arc::new(engine), clock);

        // Revised close for a day already covered by the watermark
        source.push_rows(
            "sh.600000",
            Frequency::Daily,
            vec![daily_row("sh.600000", "2024-06-03", 10.5, None)],
        );

        let mut overrides = BTreeMap::new();
        overrides.insert(Frequency::Monthly, 0);
        let reports = scanner
            .scan(
                &["sh.600000".to_string()],
                &[Frequency::Daily, Frequency::Monthly, Frequency::Minute5],
                &overrides,
                false,
            )
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        let calls = source.calls();
        assert_eq!(calls[0].1, Frequency::Daily);
        assert_eq!((calls[0].2, calls[0].3), (d(2024, 5, 16), d(2024, 6, 15)));
        // Minute window clamped to the minute start date
        assert_eq!((calls[1].2, calls[1].3), (d(2024, 6, 10), d(2024, 6, 15)));

        assert_eq!(bars.count(Some(Frequency::Daily)).await.unwrap(), 1);
        assert_eq!(
            symbols.get_watermark("sh.600000", Frequency::Daily).await.unwrap(),
            Some(d(2024, 6, 14))
        );
    }
}

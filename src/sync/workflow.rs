/// End-of-day workflow: basic refresh, kline sync, repairs, fundamentals
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{FinanceConfig, LimitUpConfig, WorkflowConfig};
use crate::error::Result;
use crate::sync::finance::FinanceSyncEngine;
use crate::sync::history::HistorySyncEngine;
use crate::sync::integrity::IntegrityScanner;
use crate::sync::report::SyncReport;
use crate::sync::universe::UniverseManager;
use crate::time::TradeCalendar;
use crate::types::Frequency;
use crate::utils::Clock;

/// Which steps a run will take, decided before any vendor call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowPlan {
    pub today: NaiveDate,
    pub refresh_basic: bool,
    pub frequencies: Vec<Frequency>,
    pub skipped_frequencies: Vec<Frequency>,
    pub weekly_backfill: bool,
    pub monthly_backfill: bool,
    pub limit_up_resync: bool,
    pub integrity_scan: bool,
    pub finance: bool,
}

pub struct DailyWorkflow {
    universe: UniverseManager,
    history: Arc<HistorySyncEngine>,
    integrity: IntegrityScanner,
    finance: Option<FinanceSyncEngine>,
    calendar: TradeCalendar,
    clock: Arc<dyn Clock>,
    settings: WorkflowConfig,
    finance_settings: FinanceConfig,
    limit_up: LimitUpConfig,
    reports_dir: Option<PathBuf>,
}

impl DailyWorkflow {
    pub fn new(
        universe: UniverseManager,
        history: Arc<HistorySyncEngine>,
        finance: Option<FinanceSyncEngine>,
        settings: WorkflowConfig,
        finance_settings: FinanceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let calendar = TradeCalendar::new(settings.holidays.iter().copied());
        let limit_up = history.settings().limit_up.clone();
        let integrity = IntegrityScanner::new(history.clone(), clock.clone());
        DailyWorkflow {
            universe,
            history,
            integrity,
            finance,
            calendar,
            clock,
            settings,
            finance_settings,
            limit_up,
            reports_dir: None,
        }
    }

    /// Save every report as JSON under `dir` after each step
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub async fn plan(&self) -> Result<WorkflowPlan> {
        let today = self.clock.today();

        let weekly_backfill = match self.calendar.expected_weekly_close(today) {
            Some(expected) => self.history.needs_backfill(Frequency::Weekly, expected).await?,
            None => false,
        };
        let monthly_backfill = match self.calendar.expected_monthly_close(today) {
            Some(expected) => self.history.needs_backfill(Frequency::Monthly, expected).await?,
            None => false,
        };

        let mut frequencies = Vec::new();
        let mut skipped_frequencies = Vec::new();
        if self.settings.kline {
            for &frequency in &self.history.settings().frequencies {
                let due = match frequency {
                    Frequency::Weekly => {
                        !self.settings.weekly_on_close
                            || self.calendar.should_update_weekly(today)
                            || weekly_backfill
                    }
                    Frequency::Monthly => {
                        !self.settings.monthly_on_close
                            || self.calendar.should_update_monthly(today)
                            || monthly_backfill
                    }
                    _ => true,
                };
                if due {
                    frequencies.push(frequency);
                } else {
                    skipped_frequencies.push(frequency);
                }
            }
        }

        Ok(WorkflowPlan {
            today,
            refresh_basic: self.settings.refresh_basic,
            frequencies,
            skipped_frequencies,
            weekly_backfill,
            monthly_backfill,
            limit_up_resync: self.settings.limit_up_resync,
            integrity_scan: self.settings.integrity_scan,
            finance: self.settings.finance && self.finance_settings.enabled && self.finance.is_some(),
        })
    }

    /// Run every enabled step in order. A fatal error stops the remaining steps.
    pub async fn run(&self, dry_run: bool) -> Result<Vec<SyncReport>> {
        let plan = self.plan().await?;
        info!(
            "🗓️  Daily workflow for {} (dry_run: {}): kline {:?}, skipped {:?}, weekly backfill {}, monthly backfill {}",
            plan.today,
            dry_run,
            plan.frequencies,
            plan.skipped_frequencies,
            plan.weekly_backfill,
            plan.monthly_backfill
        );

        let mut reports = Vec::new();

        if plan.refresh_basic {
            if dry_run {
                info!("📝 [dry run] would refresh basic info (flag delisted: {})", self.settings.flag_delisted);
            } else {
                let report = self.universe.refresh_basic_info(self.settings.flag_delisted).await?;
                self.finish_step(report, &mut reports).await;
            }
        }

        let symbols = if dry_run {
            self.universe.planned_symbols().await?
        } else {
            self.universe.target_symbols().await?
        };
        if symbols.is_empty() {
            warn!("⚠️  No symbols in the universe, kline steps have nothing to do");
        }

        for &frequency in &plan.frequencies {
            let options = self.history.default_options(frequency, dry_run);
            let report = self.history.sync_frequency(frequency, &symbols, options).await?;
            self.finish_step(report, &mut reports).await;
        }

        if plan.limit_up_resync {
            let report = self
                .history
                .resync_limit_up(
                    self.limit_up.days,
                    self.limit_up.frequency,
                    self.limit_up.pct_threshold,
                    dry_run,
                )
                .await?;
            self.finish_step(report, &mut reports).await;
        }

        if plan.integrity_scan {
            let scanned = self
                .integrity
                .scan(&symbols, &self.history.settings().frequencies, &BTreeMap::new(), dry_run)
                .await?;
            for report in scanned {
                self.save(&report).await;
                reports.push(report);
            }
        }

        if plan.finance {
            if let Some(finance) = &self.finance {
                let report = finance
                    .sync_financials(self.finance_settings.mode, self.finance_settings.history_years, dry_run)
                    .await?;
                self.finish_step(report, &mut reports).await;
            }
        }

        info!("🏁 Daily workflow finished with {} reports", reports.len());
        Ok(reports)
    }

    async fn finish_step(&self, report: SyncReport, reports: &mut Vec<SyncReport>) {
        report.log_summary();
        self.save(&report).await;
        reports.push(report);
    }

    async fn save(&self, report: &SyncReport) {
        if !self.settings.save_reports || report.dry_run {
            return;
        }
        if let Some(dir) = &self.reports_dir {
            if let Err(e) = report.save_to_dir(dir).await {
                warn!("⚠️  Failed to save {} report: {}", report.task, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CallBudget;
    use crate::config::HistoryConfig;
    use crate::data::{BarStore, FinanceStore, SymbolRepository, SymbolStore};
    use crate::error::SyncError;
    use crate::sources::testing::{daily_row, Scripted, ScriptedFinancials, ScriptedHistorySource};
    use crate::sync::retry::RetryPolicy;
    use crate::sync::schema::BASIC_FIELDS;
    use crate::types::{RawBatch, SymbolRecord};
    use crate::utils::ManualClock;

    struct Harness {
        source: Arc<ScriptedHistorySource>,
        financials: Arc<ScriptedFinancials>,
        symbols: Arc<SymbolStore>,
        workflow: DailyWorkflow,
    }

    /// Wednesday 2024-06-12 after the close: neither week nor month is closing
    fn harness(settings: WorkflowConfig) -> Harness {
        let clock = Arc::new(ManualClock::at_local(
            NaiveDate::from_ymd_opt(2024, 6, 12).unwrap().and_hms_opt(17, 0, 0).unwrap(),
        ));
        let source = Arc::new(ScriptedHistorySource::new());
        let financials = Arc::new(ScriptedFinancials::new());
        let bars = BarStore::in_memory().shared();
        let symbols = SymbolStore::in_memory().shared();
        let records = FinanceStore::in_memory().shared();
        let budget = Arc::new(CallBudget::in_memory(1_000, clock.clone()));

        let history_settings = HistoryConfig {
            frequencies: vec![Frequency::Daily, Frequency::Weekly],
            index_codes: vec!["sh.000001".to_string()],
            workers: 1,
            ..HistoryConfig::default()
        };
        let history = Arc::new(
            HistorySyncEngine::new(
                source.clone(),
                bars,
                symbols.clone(),
                budget.clone(),
                history_settings,
                clock.clone(),
            )
            .with_retry(RetryPolicy::none()),
        );
        let universe = UniverseManager::new(
            source.clone(),
            symbols.clone(),
            budget.clone(),
            vec!["sh.000001".to_string()],
            "baostock",
        )
        .with_retry(RetryPolicy::none());
        let finance = FinanceSyncEngine::new(financials.clone(), records, symbols.clone(), budget, clock.clone())
            .with_retry(RetryPolicy::none());

        let workflow = DailyWorkflow::new(
            universe,
            history,
            Some(finance),
            settings,
            FinanceConfig {
                history_years: 1,
                ..FinanceConfig::default()
            },
            clock,
        );
        Harness {
            source,
            financials,
            symbols,
            workflow,
        }
    }

    fn quiet_settings() -> WorkflowConfig {
        WorkflowConfig {
            integrity_scan: false,
            finance: false,
            save_reports: false,
            ..WorkflowConfig::default()
        }
    }

    #[tokio::test]
    async fn test_weekly_runs_when_backfill_needed() {
        let h = harness(quiet_settings());
        let plan = h.workflow.plan().await.unwrap();

        // Mid-week, but nothing weekly is stored yet
        assert!(plan.weekly_backfill);
        assert_eq!(plan.frequencies, vec![Frequency::Daily, Frequency::Weekly]);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_vendor_calls() {
        let h = harness(WorkflowConfig {
            save_reports: false,
            ..WorkflowConfig::default()
        });
        h.symbols.upsert_basic(&[SymbolRecord::new("sh.600000")]).await.unwrap();

        let reports = h.workflow.run(true).await.unwrap();

        assert!(!reports.is_empty());
        assert!(reports.iter().all(|r| r.dry_run));
        assert_eq!(h.source.call_count(), 0);
        assert_eq!(h.financials.call_count(), 0);
        // Placeholders are not written on a dry run
        assert!(h.symbols.get("sh.000001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_run_refreshes_then_syncs() {
        let h = harness(quiet_settings());
        h.source.push_basic(Scripted::Batch(RawBatch::new(
            BASIC_FIELDS,
            vec![vec![
                "sh.600000".into(),
                "浦发银行".into(),
                "1999-11-10".into(),
                String::new(),
                "1".into(),
                "1".into(),
            ]],
        )));
        h.source.push_rows(
            "sh.600000",
            Frequency::Daily,
            vec![daily_row("sh.600000", "2024-06-12", 7.1, Some(0.5))],
        );

        let reports = h.workflow.run(false).await.unwrap();
        let tasks: Vec<&str> = reports.iter().map(|r| r.task.as_str()).collect();
        assert_eq!(tasks, vec!["basic", "kline", "kline"]);

        // Index placeholder plus the listed stock, for both frequencies
        let synced: Vec<String> = h.source.calls().into_iter().map(|c| c.0).collect();
        assert_eq!(synced.iter().filter(|s| s.as_str() == "sh.000001").count(), 2);
        assert_eq!(
            h.symbols.get_watermark("sh.600000", Frequency::Daily).await.unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 12)
        );
    }

    #[tokio::test]
    async fn test_fatal_error_stops_remaining_steps() {
        let h = harness(WorkflowConfig {
            integrity_scan: false,
            save_reports: false,
            ..WorkflowConfig::default()
        });
        h.source.push_basic(Scripted::Batch(RawBatch::new(&["code"], vec![vec!["sh.600000".into()]])));

        let err = h.workflow.run(false).await.unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
        assert_eq!(h.source.call_count(), 0);
        assert_eq!(h.financials.call_count(), 0);
    }
}

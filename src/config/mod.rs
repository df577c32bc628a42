/// Runtime configuration sections
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::sync::retry::RetryPolicy;
use crate::types::{Frequency, LookbackSpan, SyncMode};
use crate::utils::LogConfig;

pub mod loader;

pub use loader::{load_config, parse_config, validate_config};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub storage: StorageConfig,
    pub budget: BudgetConfig,
    pub history: HistoryConfig,
    pub retry: RetryConfig,
    pub finance: FinanceConfig,
    pub realtime: RealtimeConfig,
    pub workflow: WorkflowConfig,
    pub logging: LogConfig,
}

/// File locations, all relative to `data_dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub bars_file: String,
    pub realtime_bars_file: String,
    pub symbols_file: String,
    pub finance_file: String,
    pub reports_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            bars_file: "bars.jsonl".to_string(),
            realtime_bars_file: "realtime_bars.jsonl".to_string(),
            symbols_file: "symbols.jsonl".to_string(),
            finance_file: "financials.jsonl".to_string(),
            reports_dir: "reports".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn bars_path(&self) -> PathBuf {
        self.data_dir.join(&self.bars_file)
    }

    pub fn realtime_bars_path(&self) -> PathBuf {
        self.data_dir.join(&self.realtime_bars_file)
    }

    pub fn symbols_path(&self) -> PathBuf {
        self.data_dir.join(&self.symbols_file)
    }

    pub fn finance_path(&self) -> PathBuf {
        self.data_dir.join(&self.finance_file)
    }

    pub fn reports_path(&self) -> PathBuf {
        self.data_dir.join(&self.reports_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_call_limit: u64,
    pub state_file: PathBuf,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_call_limit: 150_000,
            state_file: PathBuf::from("data/call_budget.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitUpConfig {
    pub days: i64,
    pub pct_threshold: f64,
    pub frequency: Frequency,
}

impl Default for LimitUpConfig {
    fn default() -> Self {
        Self {
            days: 7,
            pct_threshold: 9.5,
            frequency: Frequency::Minute5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub frequencies: Vec<Frequency>,
    pub mode: SyncMode,
    /// Lookback for daily/weekly/monthly symbols without a watermark; 0 means "from the minimum start"
    pub history_years: u32,
    /// Per frequency tag lookback, e.g. `"5" = { days = 30 }`; wins over `history_years`
    pub lookbacks: BTreeMap<String, LookbackSpan>,
    pub workers: usize,
    /// Earliest date for daily/weekly/monthly bars
    pub start_date: NaiveDate,
    /// Earliest date for minute bars
    pub minute_start_date: NaiveDate,
    /// Index codes always included in the universe
    pub index_codes: Vec<String>,
    /// Minimum spacing between vendor calls, 0 disables pacing
    pub request_interval_ms: u64,
    /// Trailing re-fetch window in days per frequency tag
    pub integrity_windows: BTreeMap<String, i64>,
    pub limit_up: LimitUpConfig,
    pub source_tag: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        let integrity_windows = [("d", 30), ("w", 400), ("m", 1500), ("5", 15)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            frequencies: vec![
                Frequency::Daily,
                Frequency::Weekly,
                Frequency::Monthly,
                Frequency::Minute5,
            ],
            mode: SyncMode::Incremental,
            history_years: 0,
            lookbacks: BTreeMap::new(),
            workers: 4,
            start_date: NaiveDate::from_ymd_opt(2014, 1, 1).unwrap_or_default(),
            minute_start_date: NaiveDate::from_ymd_opt(2019, 1, 2).unwrap_or_default(),
            index_codes: Vec::new(),
            request_interval_ms: 0,
            integrity_windows,
            limit_up: LimitUpConfig::default(),
            source_tag: "baostock".to_string(),
        }
    }
}

impl HistoryConfig {
    /// Earliest syncable date for a frequency
    pub fn min_start(&self, frequency: Frequency) -> NaiveDate {
        if frequency.is_intraday() {
            self.minute_start_date
        } else {
            self.start_date
        }
    }

    /// Lookback for a frequency without a watermark. Minute bars ignore
    /// `history_years` and start at `minute_start_date` unless listed in `lookbacks`.
    pub fn lookback(&self, frequency: Frequency) -> Option<LookbackSpan> {
        let span = match self.lookbacks.get(frequency.as_str()) {
            Some(span) => *span,
            None if frequency.is_intraday() => return None,
            None => LookbackSpan::Years(self.history_years),
        };
        Some(span).filter(|span| !span.is_zero())
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn integrity_window(&self, frequency: Frequency) -> Option<i64> {
        self.integrity_windows.get(frequency.as_str()).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinanceConfig {
    pub enabled: bool,
    pub history_years: u32,
    pub mode: SyncMode,
}

impl Default for FinanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_years: 10,
            mode: SyncMode::Incremental,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub enabled: bool,
    /// Six-digit exchange codes, e.g. "600519"
    pub symbols: Vec<String>,
    pub timeframes: Vec<Frequency>,
    pub poll_interval_secs: u64,
    pub source_tag: String,
    /// Also write completed bars into the history store
    pub mirror_to_history: bool,
    /// Keep a provisional daily bar from the quote snapshot
    pub daily_snapshot: bool,
    pub timezone: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            symbols: Vec::new(),
            timeframes: vec![Frequency::Minute5, Frequency::Minute15, Frequency::Minute60],
            poll_interval_secs: 5,
            source_tag: "akshare".to_string(),
            mirror_to_history: true,
            daily_snapshot: true,
            timezone: "Asia/Shanghai".to_string(),
        }
    }
}

impl RealtimeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub refresh_basic: bool,
    /// Flag stored symbols missing from the listing as delisted
    pub flag_delisted: bool,
    pub kline: bool,
    /// Weekly bars only when the trading week has closed
    pub weekly_on_close: bool,
    /// Monthly bars only when the trading month has closed
    pub monthly_on_close: bool,
    pub integrity_scan: bool,
    pub limit_up_resync: bool,
    pub finance: bool,
    pub holidays: Vec<NaiveDate>,
    pub save_reports: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            refresh_basic: true,
            flag_delisted: false,
            kline: true,
            weekly_on_close: true,
            monthly_on_close: true,
            integrity_scan: true,
            limit_up_resync: false,
            finance: true,
            holidays: Vec::new(),
            save_reports: true,
        }
    }
}

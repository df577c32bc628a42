/// Core type definitions for the sync engine
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Bar frequency as understood by the history vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "d")]
    Daily,
    #[serde(rename = "w")]
    Weekly,
    #[serde(rename = "m")]
    Monthly,
    #[serde(rename = "5")]
    Minute5,
    #[serde(rename = "15")]
    Minute15,
    #[serde(rename = "30")]
    Minute30,
    #[serde(rename = "60")]
    Minute60,
}

impl Frequency {
    pub const ALL: [Frequency; 7] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Minute5,
        Frequency::Minute15,
        Frequency::Minute30,
        Frequency::Minute60,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "d",
            Frequency::Weekly => "w",
            Frequency::Monthly => "m",
            Frequency::Minute5 => "5",
            Frequency::Minute15 => "15",
            Frequency::Minute30 => "30",
            Frequency::Minute60 => "60",
        }
    }

    /// Sub-daily frequencies carry an intraday time in their key
    pub fn is_intraday(&self) -> bool {
        self.minutes().is_some()
    }

    /// Bucket width in minutes for sub-daily frequencies
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Frequency::Minute5 => Some(5),
            Frequency::Minute15 => Some(15),
            Frequency::Minute30 => Some(30),
            Frequency::Minute60 => Some(60),
            _ => None,
        }
    }

    /// Bucket start for a market-local timestamp.
    ///
    /// Minute frequencies floor the minutes since midnight; daily floors to midnight.
    /// Weekly and monthly have no streaming bucket and also floor to midnight.
    pub fn bucket_start(&self, ts: NaiveDateTime) -> NaiveDateTime {
        match self.minutes() {
            Some(width) => {
                let total = ts.time().num_seconds_from_midnight() / 60;
                let floored = (total / width) * width;
                let time = NaiveTime::from_num_seconds_from_midnight_opt(floored * 60, 0)
                    .unwrap_or(NaiveTime::MIN);
                ts.date().and_time(time)
            }
            None => ts.date().and_time(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "d" | "daily" => Ok(Frequency::Daily),
            "w" | "weekly" => Ok(Frequency::Weekly),
            "m" | "monthly" => Ok(Frequency::Monthly),
            "5" | "5m" => Ok(Frequency::Minute5),
            "15" | "15m" => Ok(Frequency::Minute15),
            "30" | "30m" => Ok(Frequency::Minute30),
            "60" | "60m" => Ok(Frequency::Minute60),
            other => Err(SyncError::InvalidParameter(format!("Unknown frequency: {}", other))),
        }
    }
}

/// Optional vendor attributes carried by daily/weekly/monthly rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarExtras {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preclose: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct_chg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pe_ttm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ps_ttm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcf_ncf_ttm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pb_mrq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_st: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_flag: Option<String>,
}

/// OHLCV Bar data structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub frequency: Frequency,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub extras: BarExtras,
    pub source: String,
    /// Locally derived, superseded by any authoritative vendor bar
    #[serde(default)]
    pub provisional: bool,
}

impl Bar {
    pub fn key(&self) -> BarKey {
        BarKey {
            symbol: self.symbol.clone(),
            frequency: self.frequency,
            date: self.date,
            time: self.time,
        }
    }
}

/// Composite storage key of a bar
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarKey {
    pub symbol: String,
    pub frequency: Frequency,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

/// Listing status of a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    #[default]
    Listed,
    Delisted,
}

/// Security type reported by the basic-info listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityType {
    #[default]
    Stock,
    Index,
    Other,
}

/// Reference-data record for one symbol, including its sync watermarks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ipo_date: Option<NaiveDate>,
    #[serde(default)]
    pub out_date: Option<NaiveDate>,
    #[serde(default)]
    pub security_type: SecurityType,
    #[serde(default)]
    pub status: SymbolStatus,
    #[serde(default)]
    pub source: Option<String>,
    /// Created without a basic-info row (configured index or industry member)
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub industry_code: Option<String>,
    #[serde(default)]
    pub industry_name: Option<String>,
    /// Last synced date keyed by frequency tag
    #[serde(default)]
    pub watermarks: BTreeMap<String, NaiveDate>,
    #[serde(default)]
    pub last_finance_quarter: Option<QuarterMarker>,
    /// Last quarter with data per report type
    #[serde(default)]
    pub report_markers: BTreeMap<String, QuarterMarker>,
}

impl SymbolRecord {
    pub fn new(symbol: impl Into<String>) -> Self {
        SymbolRecord {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn placeholder(symbol: impl Into<String>, security_type: SecurityType) -> Self {
        SymbolRecord {
            symbol: symbol.into(),
            security_type,
            temporary: true,
            ..Default::default()
        }
    }

    pub fn watermark(&self, frequency: Frequency) -> Option<NaiveDate> {
        self.watermarks.get(frequency.as_str()).copied()
    }
}

/// Fiscal quarter marker, ordered by (year, quarter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuarterMarker {
    pub year: i32,
    pub quarter: u8,
}

impl QuarterMarker {
    pub fn new(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(SyncError::InvalidParameter(format!(
                "Quarter must be 1..=4, got {}",
                quarter
            )));
        }
        Ok(QuarterMarker { year, quarter })
    }

    /// Quarter containing a calendar date
    pub fn containing(date: NaiveDate) -> Self {
        QuarterMarker {
            year: date.year(),
            quarter: ((date.month() - 1) / 3 + 1) as u8,
        }
    }

    pub fn next(&self) -> Self {
        if self.quarter >= 4 {
            QuarterMarker { year: self.year + 1, quarter: 1 }
        } else {
            QuarterMarker { year: self.year, quarter: self.quarter + 1 }
        }
    }

    pub fn prev(&self) -> Self {
        if self.quarter <= 1 {
            QuarterMarker { year: self.year - 1, quarter: 4 }
        } else {
            QuarterMarker { year: self.year, quarter: self.quarter - 1 }
        }
    }
}

impl fmt::Display for QuarterMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for QuarterMarker {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SyncError::InvalidParameter(format!("Invalid quarter marker: {}", s));
        let (year, quarter) = s.trim().split_once(['Q', 'q']).ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let quarter: u8 = quarter.parse().map_err(|_| invalid())?;
        QuarterMarker::new(year, quarter)
    }
}

impl Serialize for QuarterMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for QuarterMarker {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Quarterly fundamentals report families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Profit,
    Balance,
    CashFlow,
    Dupont,
}

impl ReportType {
    pub const ALL: [ReportType; 4] = [
        ReportType::Profit,
        ReportType::Balance,
        ReportType::CashFlow,
        ReportType::Dupont,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Profit => "profit",
            ReportType::Balance => "balance",
            ReportType::CashFlow => "cash_flow",
            ReportType::Dupont => "dupont",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One quarterly report row for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub symbol: String,
    pub year: i32,
    pub quarter: u8,
    pub report_type: ReportType,
    #[serde(default)]
    pub pub_date: Option<NaiveDate>,
    #[serde(default)]
    pub stat_date: Option<NaiveDate>,
    /// Vendor fields, numbers normalized to floats and blanks to null
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl FinancialRecord {
    pub fn key(&self) -> FinancialKey {
        FinancialKey {
            symbol: self.symbol.clone(),
            year: self.year,
            quarter: self.quarter,
            report_type: self.report_type,
        }
    }

    pub fn marker(&self) -> QuarterMarker {
        QuarterMarker { year: self.year, quarter: self.quarter }
    }
}

/// Composite storage key of a financial record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FinancialKey {
    pub symbol: String,
    pub year: i32,
    pub quarter: u8,
    pub report_type: ReportType,
}

/// Live quote snapshot from the quote feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last_price: f64,
    /// Session-cumulative traded volume
    pub cumulative_volume: f64,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
}

/// Tabular vendor response: ordered field names plus string rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBatch {
    pub fields: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawBatch {
    pub fn new(fields: &[&str], rows: Vec<Vec<String>>) -> Self {
        RawBatch {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

/// How a sync run chooses its start date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Ignore watermarks and start at the minimum start date
    Full,
    /// Continue after the watermark; same rules as incremental
    Resume,
    #[default]
    Incremental,
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "resume" => Ok(SyncMode::Resume),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(SyncError::InvalidParameter(format!("Unknown sync mode: {}", other))),
        }
    }
}

/// Lookback window used when a symbol has no watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookbackSpan {
    Years(u32),
    Days(u32),
}

impl LookbackSpan {
    pub fn is_zero(&self) -> bool {
        matches!(self, LookbackSpan::Years(0) | LookbackSpan::Days(0))
    }

    /// Subtract the span from a date; year spans subtract calendar years
    pub fn before(&self, date: NaiveDate) -> NaiveDate {
        match *self {
            LookbackSpan::Years(n) => date
                .checked_sub_months(Months::new(n.saturating_mul(12)))
                .unwrap_or(NaiveDate::MIN),
            LookbackSpan::Days(n) => date
                .checked_sub_days(chrono::Days::new(n as u64))
                .unwrap_or(NaiveDate::MIN),
        }
    }
}

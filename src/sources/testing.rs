/// Scripted vendor doubles for tests
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{Result, SyncError};
use crate::sources::{FinancialsSource, HistoryDataSource, QuoteSource};
use crate::sync::schema::{expected_fields, financial_fields, DAILY_FIELDS, MINUTE_FIELDS};
use crate::types::{Frequency, Quote, RawBatch, ReportType};

/// One scripted vendor reply
#[derive(Debug, Clone)]
pub enum Scripted {
    Batch(RawBatch),
    Transient(String),
    Rejected(String),
}

impl Scripted {
    fn into_result(self) -> Result<RawBatch> {
        match self {
            Scripted::Batch(batch) => Ok(batch),
            Scripted::Transient(msg) => Err(SyncError::TransientFetch(msg)),
            Scripted::Rejected(msg) => Err(SyncError::VendorRejected(msg)),
        }
    }
}

pub type RangeCall = (String, Frequency, NaiveDate, NaiveDate);

/// Replies are consumed in order per (symbol, frequency); unscripted calls get an empty batch
#[derive(Default)]
pub struct ScriptedHistorySource {
    replies: Mutex<HashMap<(String, Frequency), VecDeque<Scripted>>>,
    basic: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RangeCall>>,
}

impl ScriptedHistorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, symbol: &str, frequency: Frequency, reply: Scripted) {
        self.replies
            .lock()
            .unwrap()
            .entry((symbol.to_string(), frequency))
            .or_default()
            .push_back(reply);
    }

    pub fn push_rows(&self, symbol: &str, frequency: Frequency, rows: Vec<Vec<String>>) {
        self.push(symbol, frequency, Scripted::Batch(RawBatch::new(expected_fields(frequency), rows)));
    }

    pub fn push_basic(&self, reply: Scripted) {
        self.basic.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<RangeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HistoryDataSource for ScriptedHistorySource {
    async fn query_range(
        &self,
        symbol: &str,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawBatch> {
        self.calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), frequency, start, end));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&(symbol.to_string(), frequency))
            .and_then(|q| q.pop_front());
        match reply {
            Some(reply) => reply.into_result(),
            None => Ok(RawBatch::new(expected_fields(frequency), Vec::new())),
        }
    }

    async fn query_basic(&self) -> Result<RawBatch> {
        match self.basic.lock().unwrap().pop_front() {
            Some(reply) => reply.into_result(),
            None => Ok(RawBatch::default()),
        }
    }
}

pub type FinanceCall = (String, i32, u8, ReportType);

#[derive(Default)]
pub struct ScriptedFinancials {
    replies: Mutex<HashMap<FinanceCall, VecDeque<Scripted>>>,
    calls: Mutex<Vec<FinanceCall>>,
}

impl ScriptedFinancials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, symbol: &str, year: i32, quarter: u8, report_type: ReportType, reply: Scripted) {
        self.replies
            .lock()
            .unwrap()
            .entry((symbol.to_string(), year, quarter, report_type))
            .or_default()
            .push_back(reply);
    }

    /// Single report row in the report type's field layout
    pub fn push_report(&self, symbol: &str, year: i32, quarter: u8, report_type: ReportType) {
        let fields = financial_fields(report_type);
        let mut row = vec![symbol.to_string(), String::new(), String::new()];
        row.resize(fields.len(), "0.12".to_string());
        let batch = RawBatch::new(fields, vec![row]);
        self.push(symbol, year, quarter, report_type, Scripted::Batch(batch));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FinancialsSource for ScriptedFinancials {
    async fn query(&self, symbol: &str, year: i32, quarter: u8, report_type: ReportType) -> Result<RawBatch> {
        let key = (symbol.to_string(), year, quarter, report_type);
        self.calls.lock().unwrap().push(key.clone());
        let reply = self.replies.lock().unwrap().get_mut(&key).and_then(|q| q.pop_front());
        match reply {
            Some(reply) => reply.into_result(),
            None => Ok(RawBatch::default()),
        }
    }
}

/// Each poll returns the next scripted snapshot, then empty
#[derive(Default)]
pub struct ScriptedQuotes {
    snapshots: Mutex<VecDeque<Vec<Quote>>>,
    polls: Mutex<usize>,
}

impl ScriptedQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, quotes: Vec<Quote>) {
        self.snapshots.lock().unwrap().push_back(quotes);
    }

    pub fn polls(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl QuoteSource for ScriptedQuotes {
    async fn poll(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        *self.polls.lock().unwrap() += 1;
        let snapshot = self.snapshots.lock().unwrap().pop_front().unwrap_or_default();
        Ok(snapshot.into_iter().filter(|q| symbols.contains(&q.symbol)).collect())
    }
}

/// Daily row in vendor field order
pub fn daily_row(code: &str, date: &str, close: f64, pct_chg: Option<f64>) -> Vec<String> {
    let values: Vec<String> = vec![
        date.to_string(),
        code.to_string(),
        format!("{}", close),
        format!("{}", close + 0.2),
        format!("{}", close - 0.2),
        format!("{}", close),
        format!("{}", close - 0.1),
        "120000".to_string(),
        "1250000.5".to_string(),
        "3".to_string(),
        "0.45".to_string(),
        "1".to_string(),
        pct_chg.map(|p| p.to_string()).unwrap_or_default(),
        "5.1".to_string(),
        "1.2".to_string(),
        "3.3".to_string(),
        "0.6".to_string(),
        "0".to_string(),
    ];
    debug_assert_eq!(values.len(), DAILY_FIELDS.len());
    values
}

/// Minute row; `hhmmss` is the bar time
pub fn minute_row(code: &str, date: &str, hhmmss: &str) -> Vec<String> {
    let compact = format!("{}{}000", date.replace('-', ""), hhmmss);
    let values: Vec<String> = vec![
        date.to_string(),
        compact,
        code.to_string(),
        "10.0".to_string(),
        "10.2".to_string(),
        "9.9".to_string(),
        "10.1".to_string(),
        "3000".to_string(),
        "30300".to_string(),
        "3".to_string(),
    ];
    debug_assert_eq!(values.len(), MINUTE_FIELDS.len());
    values
}

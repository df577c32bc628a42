/// Vendor field schemas and row parsing
use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::types::{
    Bar, BarExtras, FinancialRecord, Frequency, RawBatch, ReportType, SecurityType, SymbolRecord,
    SymbolStatus,
};

pub const DAILY_FIELDS: &[&str] = &[
    "date", "code", "open", "high", "low", "close", "preclose", "volume", "amount",
    "adjustflag", "turn", "tradestatus", "pctChg", "peTTM", "psTTM", "pcfNcfTTM", "pbMRQ", "isST",
];

/// Weekly and monthly rows
pub const PERIOD_FIELDS: &[&str] = &[
    "date", "code", "open", "high", "low", "close", "volume", "amount", "adjustflag", "turn",
    "pctChg",
];

pub const MINUTE_FIELDS: &[&str] = &[
    "date", "time", "code", "open", "high", "low", "close", "volume", "amount", "adjustflag",
];

pub const BASIC_FIELDS: &[&str] = &["code", "code_name", "ipoDate", "outDate", "type", "status"];

pub const PROFIT_FIELDS: &[&str] = &[
    "code", "pubDate", "statDate", "roeAvg", "npMargin", "gpMargin", "netProfit", "epsTTM",
    "MBRevenue", "totalShare", "liqaShare",
];

pub const BALANCE_FIELDS: &[&str] = &[
    "code", "pubDate", "statDate", "currentRatio", "quickRatio", "cashRatio", "YOYLiability",
    "liabilityToAsset", "assetToEquity",
];

pub const CASH_FLOW_FIELDS: &[&str] = &[
    "code", "pubDate", "statDate", "CAToAsset", "NCAToAsset", "tangibleAssetToAsset",
    "ebitToInterest", "CFOToOR", "CFOToNP", "CFOToGr",
];

pub const DUPONT_FIELDS: &[&str] = &[
    "code", "pubDate", "statDate", "dupontROE", "dupontAssetStoEquity", "dupontAssetTurn",
    "dupontPnitoni", "dupontNitogr", "dupontTaxBurden", "dupontIntburden", "dupontEbittogr",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn expected_fields(frequency: Frequency) -> &'static [&'static str] {
    match frequency {
        Frequency::Daily => DAILY_FIELDS,
        Frequency::Weekly | Frequency::Monthly => PERIOD_FIELDS,
        _ => MINUTE_FIELDS,
    }
}

pub fn financial_fields(report_type: ReportType) -> &'static [&'static str] {
    match report_type {
        ReportType::Profit => PROFIT_FIELDS,
        ReportType::Balance => BALANCE_FIELDS,
        ReportType::CashFlow => CASH_FLOW_FIELDS,
        ReportType::Dupont => DUPONT_FIELDS,
    }
}

/// Exact field-list check. Empty responses carry no schema and always pass.
pub fn check_fields(context: &str, expected: &[&str], batch: &RawBatch) -> Result<()> {
    if batch.rows.is_empty() {
        return Ok(());
    }
    let matches = batch.fields.len() == expected.len()
        && batch.fields.iter().zip(expected).all(|(a, e)| a == e);
    if matches {
        Ok(())
    } else {
        Err(SyncError::schema_mismatch(context, expected, &batch.fields))
    }
}

/// Parsed bars plus rows dropped for missing prices or malformed dates
#[derive(Debug, Default)]
pub struct ParsedBars {
    pub bars: Vec<Bar>,
    pub skipped: usize,
}

/// Convert a vendor batch into bars, sorted by key
pub fn parse_bars(symbol: &str, frequency: Frequency, batch: &RawBatch, source: &str) -> Result<ParsedBars> {
    let expected = expected_fields(frequency);
    check_fields(&format!("{} {}", symbol, frequency), expected, batch)?;

    let mut parsed = ParsedBars::default();
    for row in &batch.rows {
        match parse_bar_row(symbol, frequency, row, source) {
            Some(bar) => parsed.bars.push(bar),
            None => parsed.skipped += 1,
        }
    }
    parsed.bars.sort_by(|a, b| (a.date, a.time).cmp(&(b.date, b.time)));

    if parsed.skipped > 0 {
        debug!("{} {}: skipped {} unusable rows", symbol, frequency, parsed.skipped);
    }
    Ok(parsed)
}

fn parse_bar_row(symbol: &str, frequency: Frequency, row: &[String], source: &str) -> Option<Bar> {
    let fields = expected_fields(frequency);
    if row.len() != fields.len() {
        return None;
    }
    let get = |name: &str| fields.iter().position(|f| *f == name).map(|i| row[i].as_str());
    let num = |name: &str| get(name).and_then(opt_f64);
    let text = |name: &str| get(name).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let date = NaiveDate::parse_from_str(get("date")?.trim(), DATE_FORMAT).ok()?;
    let time = if frequency.is_intraday() {
        Some(parse_minute_time(get("time")?)?)
    } else {
        None
    };

    let extras = BarExtras {
        preclose: num("preclose"),
        turn: num("turn"),
        pct_chg: num("pctChg"),
        pe_ttm: num("peTTM"),
        ps_ttm: num("psTTM"),
        pcf_ncf_ttm: num("pcfNcfTTM"),
        pb_mrq: num("pbMRQ"),
        trade_status: text("tradestatus"),
        is_st: text("isST"),
        adjust_flag: text("adjustflag"),
    };

    Some(Bar {
        symbol: symbol.to_string(),
        frequency,
        date,
        time,
        open: num("open")?,
        high: num("high")?,
        low: num("low")?,
        close: num("close")?,
        volume: num("volume").unwrap_or(0.0),
        amount: num("amount"),
        extras,
        source: source.to_string(),
        provisional: false,
    })
}

/// Minute timestamps come as `yyyyMMddHHmmssSSS` or `HH:MM:SS`
pub fn parse_minute_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    if raw.len() == 17 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveTime::parse_from_str(&raw[8..14], "%H%M%S").ok();
    }
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn opt_f64(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn opt_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

/// Listed stocks (type 1) and indices (type 2) from the basic listing
pub fn parse_basic(batch: &RawBatch, source: &str) -> Result<Vec<SymbolRecord>> {
    check_fields("stock_basic", BASIC_FIELDS, batch)?;

    let mut records = Vec::new();
    for row in &batch.rows {
        if row.len() != BASIC_FIELDS.len() {
            continue;
        }
        let (code, name, ipo, out, kind, status) = (&row[0], &row[1], &row[2], &row[3], &row[4], &row[5]);
        if status.trim() != "1" {
            continue;
        }
        let security_type = match kind.trim() {
            "1" => SecurityType::Stock,
            "2" => SecurityType::Index,
            _ => continue,
        };
        records.push(SymbolRecord {
            name: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
            ipo_date: opt_date(ipo),
            out_date: opt_date(out),
            security_type,
            status: SymbolStatus::Listed,
            source: Some(source.to_string()),
            ..SymbolRecord::new(code.trim())
        });
    }
    Ok(records)
}

/// Fundamentals rows: numbers become floats, blanks become null
pub fn parse_financials(
    symbol: &str,
    year: i32,
    quarter: u8,
    report_type: ReportType,
    batch: &RawBatch,
) -> Result<Vec<FinancialRecord>> {
    check_fields(
        &format!("{} {}Q{} {}", symbol, year, quarter, report_type),
        financial_fields(report_type),
        batch,
    )?;

    let records = batch
        .rows
        .iter()
        .map(|row| {
            let mut fields = BTreeMap::new();
            for (name, value) in batch.fields.iter().zip(row) {
                let json = match opt_f64(value) {
                    Some(v) => serde_json::json!(v),
                    None if value.trim().is_empty() => serde_json::Value::Null,
                    None => serde_json::Value::String(value.clone()),
                };
                fields.insert(name.clone(), json);
            }
            let date_of = |name: &str| {
                batch
                    .column(name)
                    .and_then(|i| row.get(i))
                    .and_then(|v| opt_date(v))
            };
            FinancialRecord {
                symbol: symbol.to_string(),
                year,
                quarter,
                report_type,
                pub_date: date_of("pubDate"),
                stat_date: date_of("statDate"),
                fields,
            }
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::{daily_row, minute_row};

    #[test]
    fn test_parse_daily_rows() {
        let batch = RawBatch::new(
            DAILY_FIELDS,
            vec![
                daily_row("sh.600000", "2024-06-12", 10.5, Some(2.0)),
                daily_row("sh.600000", "2024-06-11", 10.3, None),
                daily_row("sh.600000", "not-a-date", 10.3, None),
            ],
        );

        let parsed = parse_bars("sh.600000", Frequency::Daily, &batch, "baostock").unwrap();
        assert_eq!(parsed.bars.len(), 2);
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.bars[0].date, NaiveDate::from_ymd_opt(2024, 6, 11).unwrap());
        assert_eq!(parsed.bars[1].extras.pct_chg, Some(2.0));
        assert_eq!(parsed.bars[0].extras.pct_chg, None);
    }

    #[test]
    fn test_schema_mismatch_is_fatal() {
        let mut fields: Vec<&str> = DAILY_FIELDS.to_vec();
        fields.swap(2, 3);
        let batch = RawBatch::new(&fields, vec![daily_row("sh.600000", "2024-06-12", 10.5, None)]);

        let err = parse_bars("sh.600000", Frequency::Daily, &batch, "baostock").unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
        assert!(err.is_fatal());

        // Empty responses are not validated
        let empty = RawBatch::new(&["foo"], vec![]);
        assert!(parse_bars("sh.600000", Frequency::Daily, &empty, "baostock").unwrap().bars.is_empty());
    }

    #[test]
    fn test_parse_minute_rows() {
        let batch = RawBatch::new(
            MINUTE_FIELDS,
            vec![minute_row("sh.600000", "2024-06-12", "093500"), minute_row("sh.600000", "2024-06-12", "094000")],
        );
        let parsed = parse_bars("sh.600000", Frequency::Minute5, &batch, "baostock").unwrap();
        assert_eq!(parsed.bars.len(), 2);
        assert_eq!(parsed.bars[0].time, NaiveTime::from_hms_opt(9, 35, 0));

        assert_eq!(parse_minute_time("20240612150000000"), NaiveTime::from_hms_opt(15, 0, 0));
        assert_eq!(parse_minute_time("09:30:00"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_minute_time("garbage"), None);
    }

    #[test]
    fn test_parse_basic_filters_status_and_type() {
        let row = |code: &str, kind: &str, status: &str| {
            vec![code.to_string(), "名称".to_string(), "2000-01-01".to_string(), String::new(), kind.to_string(), status.to_string()]
        };
        let batch = RawBatch::new(
            BASIC_FIELDS,
            vec![
                row("sh.600000", "1", "1"),
                row("sh.000001", "2", "1"),
                row("sh.600001", "1", "0"),
                row("sh.110001", "4", "1"),
            ],
        );
        let records = parse_basic(&batch, "baostock").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].security_type, SecurityType::Index);
        assert_eq!(records[0].ipo_date, NaiveDate::from_ymd_opt(2000, 1, 1));
        assert_eq!(records[0].out_date, None);
    }

    #[test]
    fn test_parse_financials_normalizes_values() {
        let mut row: Vec<String> = vec!["sh.600000".into(), "2024-04-27".into(), "2024-03-31".into()];
        row.extend(["".to_string(), "n/a".to_string()]);
        row.resize(PROFIT_FIELDS.len(), "1.5".to_string());
        let batch = RawBatch::new(PROFIT_FIELDS, vec![row]);

        let records = parse_financials("sh.600000", 2024, 1, ReportType::Profit, &batch).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["roeAvg"], serde_json::Value::Null);
        assert_eq!(records[0].fields["npMargin"], serde_json::json!("n/a"));
        assert_eq!(records[0].fields["liqaShare"], serde_json::json!(1.5));
        assert_eq!(records[0].stat_date, NaiveDate::from_ymd_opt(2024, 3, 31));
    }

    #[test]
    fn test_financial_field_drift_is_rejected() {
        let drifted = RawBatch::new(&["totally", "different"], vec![vec!["a".into(), "b".into()]]);
        let err = parse_financials("sh.600000", 2024, 1, ReportType::Profit, &drifted).unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));

        // Each report type has its own field set
        let row = vec!["0".to_string(); PROFIT_FIELDS.len()];
        let profit_as_dupont = RawBatch::new(PROFIT_FIELDS, vec![row]);
        assert!(parse_financials("sh.600000", 2024, 1, ReportType::Dupont, &profit_as_dupont).is_err());

        let empty = RawBatch::new(&["totally"], vec![]);
        assert!(parse_financials("sh.600000", 2024, 1, ReportType::Balance, &empty).unwrap().is_empty());
    }
}

/// Symbol universe: basic listing refresh, index placeholders, industry tags
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::budget::CallBudget;
use crate::data::SymbolRepository;
use crate::error::Result;
use crate::sources::HistoryDataSource;
use crate::sync::report::SyncReport;
use crate::sync::retry::RetryPolicy;
use crate::sync::schema::parse_basic;
use crate::types::{SecurityType, SymbolStatus};

/// Industry membership row from a classification vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryTag {
    /// Vendor component code, e.g. `600000.SH`
    pub component_code: String,
    /// Industry index code, e.g. `801780.SI`
    pub industry_code: String,
    pub industry_name: String,
}

/// Map a classification component code onto the history vendor's `sh.`/`sz.`/`bj.` form
pub fn normalize_component_code(raw: &str) -> Option<String> {
    let token = raw.trim().to_uppercase().replace(".SI", "").replace('.', "");
    if token.is_empty() {
        return None;
    }
    let prefix = if token.starts_with("60") || token.starts_with("68") || token.starts_with("56") || token.starts_with("66") {
        "sh"
    } else if token.starts_with("00") || token.starts_with("30") {
        "sz"
    } else if token.starts_with("43") || token.starts_with("83") || token.starts_with("87") {
        "bj"
    } else if token.len() >= 6 {
        "sz"
    } else {
        return None;
    };
    let digits = token.get(..6)?;
    Some(format!("{}.{}", prefix, digits))
}

pub struct UniverseManager {
    source: Arc<dyn HistoryDataSource>,
    symbols: Arc<dyn SymbolRepository>,
    budget: Arc<CallBudget>,
    retry: RetryPolicy,
    index_codes: Vec<String>,
    source_tag: String,
}

impl UniverseManager {
    pub fn new(
        source: Arc<dyn HistoryDataSource>,
        symbols: Arc<dyn SymbolRepository>,
        budget: Arc<CallBudget>,
        index_codes: Vec<String>,
        source_tag: impl Into<String>,
    ) -> Self {
        UniverseManager {
            source,
            symbols,
            budget,
            retry: RetryPolicy::default(),
            index_codes,
            source_tag: source_tag.into(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pull the full listing and upsert it. With `flag_missing`, listed symbols
    /// that disappeared from the listing are marked delisted.
    pub async fn refresh_basic_info(&self, flag_missing: bool) -> Result<SyncReport> {
        let mut report = SyncReport::new("basic", None, false);

        let batch = self
            .retry
            .run("query_basic", move |_| async move {
                self.budget.consume(1).await?;
                self.source.query_basic().await
            })
            .await?;
        let records = parse_basic(&batch, &self.source_tag)?;

        let changed = self.symbols.upsert_basic(&records).await?;
        report.total = records.len();
        report.succeeded = records.len();
        report.records_written = changed;
        info!(
            "📋 Basic info: {} listed symbols, {} new or changed",
            records.len(),
            changed
        );

        if flag_missing {
            if records.is_empty() {
                warn!("⚠️  Empty listing, not flagging any symbol as delisted");
            } else {
                let listed: HashSet<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
                let missing: Vec<String> = self
                    .symbols
                    .list()
                    .await?
                    .into_iter()
                    .filter(|r| !r.temporary && r.status == SymbolStatus::Listed)
                    .filter(|r| !listed.contains(r.symbol.as_str()))
                    .map(|r| r.symbol)
                    .collect();
                let flagged = self.symbols.mark_delisted(&missing).await?;
                if flagged > 0 {
                    info!("🗑️  Flagged {} symbols as delisted", flagged);
                }
            }
        }

        report.finish();
        Ok(report)
    }

    /// Listed symbols plus configured index codes (inserted as placeholders when unknown)
    pub async fn target_symbols(&self) -> Result<Vec<String>> {
        for code in &self.index_codes {
            if self.symbols.ensure_placeholder(code, SecurityType::Index).await? {
                debug!("Added index placeholder {}", code);
            }
        }

        let symbols: Vec<String> = self
            .symbols
            .list()
            .await?
            .into_iter()
            .filter(|r| r.status == SymbolStatus::Listed)
            .map(|r| r.symbol)
            .collect();
        Ok(symbols)
    }

    /// Same set as `target_symbols` without writing placeholders
    pub async fn planned_symbols(&self) -> Result<Vec<String>> {
        let mut symbols: Vec<String> = self
            .symbols
            .list()
            .await?
            .into_iter()
            .filter(|r| r.status == SymbolStatus::Listed)
            .map(|r| r.symbol)
            .collect();
        for code in &self.index_codes {
            if !symbols.contains(code) {
                symbols.push(code.clone());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    /// Store industry membership; returns how many tags were applied
    pub async fn apply_industry_tags(&self, tags: &[IndustryTag]) -> Result<usize> {
        let mut applied = 0;
        for tag in tags {
            let Some(symbol) = normalize_component_code(&tag.component_code) else {
                debug!("Skipping unrecognised component code {:?}", tag.component_code);
                continue;
            };
            let code = tag.industry_code.replace(".SI", "").trim().to_string();
            let name = tag.industry_name.trim().to_string();
            self.symbols
                .set_industry(
                    &symbol,
                    Some(code).filter(|c| !c.is_empty()),
                    Some(name).filter(|n| !n.is_empty()),
                )
                .await?;
            applied += 1;
        }
        info!("🏷️  Applied {} of {} industry tags", applied, tags.len());
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SymbolStore;
    use crate::error::SyncError;
    use crate::sources::testing::{Scripted, ScriptedHistorySource};
    use crate::sync::schema::BASIC_FIELDS;
    use crate::types::{Frequency, RawBatch, SymbolRecord};
    use crate::utils::ManualClock;
    use chrono::NaiveDate;

    fn basic_row(code: &str, kind: &str) -> Vec<String> {
        vec![
            code.to_string(),
            format!("{} name", code),
            "2001-05-10".to_string(),
            String::new(),
            kind.to_string(),
            "1".to_string(),
        ]
    }

    fn manager(source: Arc<ScriptedHistorySource>, symbols: Arc<SymbolStore>, limit: u64) -> UniverseManager {
        let clock = Arc::new(ManualClock::at_local(
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_hms_opt(8, 0, 0).unwrap(),
        ));
        let budget = Arc::new(CallBudget::in_memory(limit, clock));
        UniverseManager::new(source, symbols, budget, vec!["sh.000300".to_string()], "baostock")
            .with_retry(RetryPolicy::none())
    }

    #[test]
    fn test_normalize_component_code() {
        assert_eq!(normalize_component_code("600000.SH"), Some("sh.600000".into()));
        assert_eq!(normalize_component_code(" 688981.sh "), Some("sh.688981".into()));
        assert_eq!(normalize_component_code("000001.SZ"), Some("sz.000001".into()));
        assert_eq!(normalize_component_code("300750"), Some("sz.300750".into()));
        assert_eq!(normalize_component_code("830799.BJ"), Some("bj.830799".into()));
        assert_eq!(normalize_component_code("123456"), Some("sz.123456".into()));
        assert_eq!(normalize_component_code("12345"), None);
        assert_eq!(normalize_component_code(""), None);
    }

    #[tokio::test]
    async fn test_refresh_keeps_watermarks_and_flags_missing() {
        let source = Arc::new(ScriptedHistorySource::new());
        let symbols = SymbolStore::in_memory().shared();
        symbols.upsert_basic(&[SymbolRecord::new("sh.600001")]).await.unwrap();
        symbols
            .update_watermark("sh.600000", Frequency::Daily, NaiveDate::from_ymd_opt(2024, 6, 14).unwrap())
            .await
            .unwrap();

        source.push_basic(Scripted::Batch(RawBatch::new(
            BASIC_FIELDS,
            vec![basic_row("sh.600000", "1"), basic_row("sh.000001", "2"), basic_row("sh.110001", "4")],
        )));

        let universe = manager(source, symbols.clone(), 10);
        let report = universe.refresh_basic_info(true).await.unwrap();
        assert_eq!(report.total, 2);

        let refreshed = symbols.get("sh.600000").await.unwrap().unwrap();
        assert!(!refreshed.temporary);
        assert_eq!(refreshed.name.as_deref(), Some("sh.600000 name"));
        assert_eq!(refreshed.watermark(Frequency::Daily), NaiveDate::from_ymd_opt(2024, 6, 14));

        let gone = symbols.get("sh.600001").await.unwrap().unwrap();
        assert_eq!(gone.status, SymbolStatus::Delisted);
        assert_eq!(
            symbols.get("sh.000001").await.unwrap().unwrap().security_type,
            SecurityType::Index
        );
    }

    #[tokio::test]
    async fn test_refresh_rejects_changed_schema() {
        let source = Arc::new(ScriptedHistorySource::new());
        let symbols = SymbolStore::in_memory().shared();
        source.push_basic(Scripted::Batch(RawBatch::new(
            &["code", "code_name"],
            vec![vec!["sh.600000".into(), "x".into()]],
        )));

        let err = manager(source, symbols, 10).refresh_basic_info(false).await.unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_target_symbols_include_index_placeholders() {
        let source = Arc::new(ScriptedHistorySource::new());
        let symbols = SymbolStore::in_memory().shared();
        symbols.upsert_basic(&[SymbolRecord::new("sh.600000")]).await.unwrap();

        let universe = manager(source, symbols.clone(), 10);
        let targets = universe.target_symbols().await.unwrap();

        assert_eq!(targets, vec!["sh.000300".to_string(), "sh.600000".to_string()]);
        let index = symbols.get("sh.000300").await.unwrap().unwrap();
        assert!(index.temporary);
        assert_eq!(index.security_type, SecurityType::Index);
    }

    #[tokio::test]
    async fn test_apply_industry_tags() {
        let source = Arc::new(ScriptedHistorySource::new());
        let symbols = SymbolStore::in_memory().shared();
        let universe = manager(source, symbols.clone(), 10);

        let tags = vec![
            IndustryTag {
                component_code: "600000.SH".into(),
                industry_code: "801780.SI".into(),
                industry_name: "银行".into(),
            },
            IndustryTag {
                component_code: "???".into(),
                industry_code: "801780.SI".into(),
                industry_name: "银行".into(),
            },
        ];
        assert_eq!(universe.apply_industry_tags(&tags).await.unwrap(), 1);

        let record = symbols.get("sh.600000").await.unwrap().unwrap();
        assert_eq!(record.industry_code.as_deref(), Some("801780"));
        assert_eq!(record.industry_name.as_deref(), Some("银行"));
        assert!(record.temporary);
    }
}

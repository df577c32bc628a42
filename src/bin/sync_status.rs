/// Show call budget usage and watermark coverage per frequency
use std::collections::BTreeMap;
use std::sync::Arc;

use barsync::budget::CallBudget;
use barsync::config::load_config;
use barsync::data::{BarRepository, BarStore, SymbolRepository, SymbolStore};
use barsync::utils::{init_logging, Clock, MarketClock};
use barsync::{Frequency, SymbolStatus};
use chrono::NaiveDate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = load_config(&config_path)?;
    init_logging(&config.logging)?;

    let clock: Arc<dyn Clock> = Arc::new(MarketClock::from_name(&config.realtime.timezone)?);
    let today = clock.today();

    println!("📊 Sync Status ({})", today);
    println!("====================\n");

    let budget = CallBudget::open(
        config.budget.daily_call_limit,
        &config.budget.state_file,
        clock.clone(),
    )
    .await;
    let state = budget.snapshot().await;
    println!("💳 Call budget:");
    println!(
        "   Used today: {} / {} ({:.1}%)",
        state.count,
        budget.limit(),
        state.count as f64 / budget.limit().max(1) as f64 * 100.0
    );
    println!("   Remaining: {}\n", budget.remaining().await);

    let symbols = SymbolStore::open(config.storage.symbols_path()).await?;
    let records = symbols.list().await?;
    if records.is_empty() {
        println!("❌ No symbols stored yet.");
        println!("\n💡 Run the daily workflow to refresh basic info first.");
        return Ok(());
    }

    let listed: Vec<_> = records
        .iter()
        .filter(|r| r.status == SymbolStatus::Listed)
        .collect();
    let placeholders = records.iter().filter(|r| r.temporary).count();
    println!("📋 Symbols:");
    println!("   Listed: {}", listed.len());
    println!("   Delisted: {}", records.len() - listed.len());
    println!("   Placeholders: {}\n", placeholders);

    let bars = BarStore::open(config.storage.bars_path()).await?;
    println!("📈 Watermarks:");
    for frequency in Frequency::ALL {
        let with_watermark: Vec<NaiveDate> = listed
            .iter()
            .filter_map(|r| r.watermark(frequency))
            .collect();
        let stored = bars.count(Some(frequency)).await?;
        if with_watermark.is_empty() && stored == 0 {
            continue;
        }

        let mut by_date: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for date in &with_watermark {
            *by_date.entry(*date).or_default() += 1;
        }
        let oldest = by_date.keys().next().map(|d| d.to_string()).unwrap_or_else(|| "-".into());
        let newest = by_date.keys().last().map(|d| d.to_string()).unwrap_or_else(|| "-".into());
        let at_newest = by_date.values().last().copied().unwrap_or(0);

        println!(
            "   [{:>2}] {} bars | {}/{} symbols tracked | oldest {} | newest {} ({} symbols)",
            frequency.as_str(),
            stored,
            with_watermark.len(),
            listed.len(),
            oldest,
            newest,
            at_newest
        );
    }

    let finance_tracked = listed.iter().filter(|r| r.last_finance_quarter.is_some()).count();
    let latest_quarter = listed.iter().filter_map(|r| r.last_finance_quarter).max();
    println!("\n📑 Fundamentals:");
    println!("   Symbols with a quarter marker: {}", finance_tracked);
    if let Some(quarter) = latest_quarter {
        println!("   Latest quarter: {}", quarter);
    }

    Ok(())
}

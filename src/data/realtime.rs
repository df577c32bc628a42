/// Live quote polling into provisional bars
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RealtimeConfig;
use crate::data::bar_aggregator::{TimeframeAggregator, VolumeTracker};
use crate::data::{BarRepository, SymbolRepository};
use crate::error::Result;
use crate::sources::QuoteSource;
use crate::time::is_trading_time;
use crate::types::{Bar, Frequency, SecurityType, SymbolStatus};
use crate::utils::Clock;

/// History-vendor code for a six-digit exchange code (`600519` -> `sh.600519`)
pub fn to_history_code(code: &str) -> Option<String> {
    let code = code.trim();
    let digits = code.get(..6)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let prefix = match digits.as_bytes()[0] {
        b'6' => "sh",
        b'0' | b'3' => "sz",
        b'4' | b'8' => "bj",
        _ => return None,
    };
    Some(format!("{}.{}", prefix, digits))
}

/// What one poll produced
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollStats {
    pub outside_session: bool,
    pub quotes: usize,
    pub completed_bars: usize,
    pub mirrored_bars: usize,
    pub snapshots: usize,
}

#[derive(Default)]
struct CollectorState {
    aggregators: HashMap<(String, Frequency), TimeframeAggregator>,
    daily: HashMap<String, TimeframeAggregator>,
    volumes: VolumeTracker,
    symbols: Option<Vec<String>>,
}

pub struct RealtimeCollector {
    quotes: Arc<dyn QuoteSource>,
    bars: Arc<dyn BarRepository>,
    mirror: Option<Arc<dyn BarRepository>>,
    symbol_repo: Arc<dyn SymbolRepository>,
    clock: Arc<dyn Clock>,
    settings: RealtimeConfig,
    state: Mutex<CollectorState>,
}

impl RealtimeCollector {
    pub fn new(
        quotes: Arc<dyn QuoteSource>,
        bars: Arc<dyn BarRepository>,
        symbol_repo: Arc<dyn SymbolRepository>,
        settings: RealtimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        RealtimeCollector {
            quotes,
            bars,
            mirror: None,
            symbol_repo,
            clock,
            settings,
            state: Mutex::new(CollectorState::default()),
        }
    }

    /// Also write completed bars into the history store (when enabled in settings)
    pub fn with_mirror(mut self, history: Arc<dyn BarRepository>) -> Self {
        if self.settings.mirror_to_history {
            self.mirror = Some(history);
        }
        self
    }

    /// Poll once and feed every timeframe aggregator.
    ///
    /// Outside trading sessions this does nothing unless `ignore_session` is set.
    /// `force_flush` closes every open bar after the poll.
    pub async fn sync_once(&self, ignore_session: bool, force_flush: bool) -> Result<PollStats> {
        let now = self.clock.now_local();
        if !ignore_session && !is_trading_time(now) {
            debug!("Outside trading session at {}, skipping poll", now);
            return Ok(PollStats {
                outside_session: true,
                ..PollStats::default()
            });
        }

        let symbols = self.resolve_symbols().await?;
        let quotes = self.quotes.poll(&symbols).await?;
        if quotes.is_empty() {
            warn!("⚠️  Quote poll returned nothing for {} symbols", symbols.len());
        }

        let mut stats = PollStats {
            quotes: quotes.len(),
            ..PollStats::default()
        };
        let mut completed = Vec::new();
        let mut snapshots = Vec::new();
        {
            let mut state = self.state.lock().await;
            let state = &mut *state;
            for quote in &quotes {
                let increment = state.volumes.increment(&quote.symbol, quote.cumulative_volume);

                for &timeframe in &self.settings.timeframes {
                    let aggregator = state
                        .aggregators
                        .entry((quote.symbol.clone(), timeframe))
                        .or_insert_with(|| {
                            TimeframeAggregator::new(&quote.symbol, timeframe, &self.settings.source_tag)
                        });
                    if let Some(bar) = aggregator.update(now, quote.last_price, increment) {
                        completed.push(bar);
                    }
                }

                if self.settings.daily_snapshot {
                    let daily = state.daily.entry(quote.symbol.clone()).or_insert_with(|| {
                        TimeframeAggregator::new(&quote.symbol, Frequency::Daily, &self.settings.source_tag)
                    });
                    // A new day closes yesterday's snapshot; its last upsert already holds it
                    let _ = daily.update(now, quote.last_price, increment);
                    if let Some(mut bar) = daily.current_bar() {
                        if let Some(high) = quote.high.filter(|h| h.is_finite() && *h > 0.0) {
                            bar.high = bar.high.max(high);
                        }
                        if let Some(low) = quote.low.filter(|l| l.is_finite() && *l > 0.0) {
                            bar.low = bar.low.min(low);
                        }
                        if quote.cumulative_volume.is_finite() && quote.cumulative_volume >= 0.0 {
                            bar.volume = quote.cumulative_volume;
                        }
                        snapshots.push(bar);
                    }
                }
            }

            if force_flush {
                completed.extend(state.aggregators.values_mut().filter_map(|agg| agg.flush()));
            }
        }

        stats.completed_bars = self.bars.upsert_bars(&completed).await?;
        stats.snapshots = self.bars.upsert_bars(&snapshots).await?;
        stats.mirrored_bars = self.mirror_bars(&completed).await?;
        self.mirror_bars(&snapshots).await?;

        if stats.completed_bars > 0 {
            info!(
                "📈 {} quotes -> {} completed bars ({} mirrored)",
                stats.quotes, stats.completed_bars, stats.mirrored_bars
            );
        }
        Ok(stats)
    }

    /// Poll on the configured interval until cancelled, then flush open bars
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            "📡 Realtime collector started (every {}s, timeframes {:?})",
            self.settings.poll_interval_secs, self.settings.timeframes
        );
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 Realtime collector stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sync_once(false, false).await {
                        Ok(_) => {}
                        Err(e) if e.is_recoverable() => {
                            warn!(code = e.error_code(), "⚠️  Quote poll failed: {}", e);
                        }
                        Err(e) => {
                            error!(code = e.error_code(), "❌ Realtime collector failed: {}", e);
                            outcome = Err(e);
                            break;
                        }
                    }
                }
            }
        }

        let flushed = self.flush_all().await?;
        info!("✅ Flushed {} open bars", flushed);
        outcome
    }

    /// Close and persist every open bar
    pub async fn flush_all(&self) -> Result<usize> {
        let completed: Vec<Bar> = {
            let mut state = self.state.lock().await;
            state.aggregators.values_mut().filter_map(|agg| agg.flush()).collect()
        };
        let written = self.bars.upsert_bars(&completed).await?;
        self.mirror_bars(&completed).await?;
        Ok(written)
    }

    async fn mirror_bars(&self, bars: &[Bar]) -> Result<usize> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };
        let mirrored: Vec<Bar> = bars
            .iter()
            .filter_map(|bar| {
                let symbol = to_history_code(&bar.symbol)?;
                Some(Bar {
                    symbol,
                    ..bar.clone()
                })
            })
            .collect();
        mirror.upsert_bars(&mirrored).await
    }

    /// Configured codes, or listed stocks from the symbol store
    async fn resolve_symbols(&self) -> Result<Vec<String>> {
        if !self.settings.symbols.is_empty() {
            return Ok(self.settings.symbols.clone());
        }

        let mut state = self.state.lock().await;
        if let Some(symbols) = &state.symbols {
            return Ok(symbols.clone());
        }
        let symbols: Vec<String> = self
            .symbol_repo
            .list()
            .await?
            .into_iter()
            .filter(|r| r.security_type == SecurityType::Stock && r.status == SymbolStatus::Listed)
            .filter_map(|r| r.symbol.split_once('.').map(|(_, code)| code.to_string()))
            .collect();
        info!("📋 Realtime universe: {} symbols from the symbol store", symbols.len());
        state.symbols = Some(symbols.clone());
        Ok(symbols)
    }
}

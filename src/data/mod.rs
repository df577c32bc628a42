pub mod bar_aggregator;
pub mod bar_store;
pub mod finance_store;
pub mod journal;
pub mod realtime;
pub mod symbol_store;

pub use bar_aggregator::{AggregatorStats, TimeframeAggregator, VolumeTracker};
pub use bar_store::{BarRepository, BarStore};
pub use finance_store::{FinanceStore, FinancialRepository};
pub use journal::{write_json_atomic, Journal};
pub use realtime::{to_history_code, RealtimeCollector};
pub use symbol_store::{SymbolRepository, SymbolStore};

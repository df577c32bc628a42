pub mod calendar;
pub mod session;

pub use calendar::TradeCalendar;
pub use session::{is_trading_day, is_trading_time, trading_periods};

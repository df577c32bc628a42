/// Exchange trading sessions (Shanghai/Shenzhen continuous auction)
use chrono::{Datelike, NaiveDateTime, NaiveTime};

/// Continuous trading windows as [start, end) in market-local time
pub fn trading_periods() -> [(NaiveTime, NaiveTime); 2] {
    [
        (hm(9, 30), hm(11, 30)),
        (hm(13, 0), hm(15, 0)),
    ]
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Monday to Friday only (no exchange holiday calendar)
pub fn is_trading_day(local: NaiveDateTime) -> bool {
    local.weekday().num_days_from_monday() < 5
}

/// True inside a trading window on a weekday
pub fn is_trading_time(local: NaiveDateTime) -> bool {
    if !is_trading_day(local) {
        return false;
    }
    let t = local.time();
    trading_periods().iter().any(|(start, end)| t >= *start && t < *end)
}

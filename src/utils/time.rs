/// Market clock abstraction
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SyncError};

/// Source of "now" in the market timezone
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn timezone(&self) -> Tz;

    /// Wall-clock time in the market timezone
    fn now_local(&self) -> NaiveDateTime {
        self.now_utc().with_timezone(&self.timezone()).naive_local()
    }

    /// Calendar date in the market timezone
    fn today(&self) -> NaiveDate {
        self.now_local().date()
    }
}

/// System clock pinned to a market timezone
#[derive(Debug, Clone, Copy)]
pub struct MarketClock {
    tz: Tz,
}

impl MarketClock {
    pub fn new(tz: Tz) -> Self {
        MarketClock { tz }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let tz: Tz = name
            .parse()
            .map_err(|_| SyncError::ConfigError(format!("Unknown timezone: {}", name)))?;
        Ok(MarketClock { tz })
    }
}

impl Default for MarketClock {
    fn default() -> Self {
        MarketClock { tz: chrono_tz::Asia::Shanghai }
    }
}

impl Clock for MarketClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    tz: Tz,
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock {
            tz: chrono_tz::Asia::Shanghai,
            now: Mutex::new(now),
        }
    }

    /// Clock reading the given market-local wall time
    pub fn at_local(local: NaiveDateTime) -> Self {
        let tz = chrono_tz::Asia::Shanghai;
        let now = tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local));
        ManualClock { tz, now: Mutex::new(now) }
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        let now = self
            .tz
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local));
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_local_date() {
        let local = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap().and_hms_opt(0, 30, 0).unwrap();
        let clock = ManualClock::at_local(local);

        // 00:30 in Shanghai is still the previous day in UTC
        assert_eq!(clock.now_utc().date_naive(), NaiveDate::from_ymd_opt(2024, 6, 14).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 6, 15).unwrap());

        clock.advance(Duration::days(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 6, 16).unwrap());
    }

    #[test]
    fn test_market_clock_from_name() {
        assert!(MarketClock::from_name("Asia/Shanghai").is_ok());
        assert!(MarketClock::from_name("Mars/Olympus").is_err());
    }
}

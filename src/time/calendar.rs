/// Trading calendar: weekdays minus configured exchange holidays
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashSet;

/// How far back to search for trading days
const LOOKBACK_DAYS: i64 = 120;
/// How far ahead to search for the next trading day
const LOOKAHEAD_DAYS: i64 = 10;

#[derive(Debug, Clone, Default)]
pub struct TradeCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradeCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        TradeCalendar {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Check if a date is a trading day (not weekend, not holiday)
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        date.weekday().num_days_from_monday() < 5 && !self.holidays.contains(&date)
    }

    /// Latest trading day on or before `reference`
    pub fn latest_trading_day(&self, reference: NaiveDate) -> Option<NaiveDate> {
        (0..=LOOKBACK_DAYS)
            .map(|back| reference - Duration::days(back))
            .find(|d| self.is_trading_day(*d))
    }

    /// First trading day strictly after `date`
    pub fn next_trading_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        (1..=LOOKAHEAD_DAYS)
            .map(|ahead| date + Duration::days(ahead))
            .find(|d| self.is_trading_day(*d))
    }

    /// True when the latest trading day closes its ISO week
    pub fn should_update_weekly(&self, reference: NaiveDate) -> bool {
        match self.latest_and_next(reference) {
            Some((latest, next)) => next.iso_week() != latest.iso_week(),
            None => true,
        }
    }

    /// True when the latest trading day closes its month
    pub fn should_update_monthly(&self, reference: NaiveDate) -> bool {
        match self.latest_and_next(reference) {
            Some((latest, next)) => (next.year(), next.month()) != (latest.year(), latest.month()),
            None => true,
        }
    }

    /// Last trading day of the most recent completed week
    pub fn expected_weekly_close(&self, reference: NaiveDate) -> Option<NaiveDate> {
        self.expected_close(reference, |d| {
            let w = d.iso_week();
            (w.year(), w.week())
        })
    }

    /// Last trading day of the most recent completed month
    pub fn expected_monthly_close(&self, reference: NaiveDate) -> Option<NaiveDate> {
        self.expected_close(reference, |d| (d.year(), d.month()))
    }

    fn latest_and_next(&self, reference: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let latest = self.latest_trading_day(reference)?;
        let next = self.next_trading_day(latest)?;
        Some((latest, next))
    }

    fn expected_close<K: Ord + Copy>(
        &self,
        reference: NaiveDate,
        period_of: impl Fn(NaiveDate) -> K,
    ) -> Option<NaiveDate> {
        let open_dates: Vec<NaiveDate> = (0..=LOOKBACK_DAYS)
            .rev()
            .map(|back| reference - Duration::days(back))
            .filter(|d| self.is_trading_day(*d))
            .collect();
        let last = *open_dates.last()?;

        let mut periods: Vec<K> = open_dates.iter().map(|d| period_of(*d)).collect();
        periods.dedup();
        if periods.len() < 2 {
            return Some(last);
        }

        let target = periods[periods.len() - 2];
        open_dates
            .iter()
            .rev()
            .find(|d| period_of(**d) == target)
            .copied()
            .or(Some(last))
    }
}

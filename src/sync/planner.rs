/// Start-date and quarter planning for sync runs
use chrono::{Datelike, Days, NaiveDate};

use crate::types::{LookbackSpan, QuarterMarker, SyncMode};

/// First date to fetch, or `None` when there is nothing left to sync.
///
/// - `Full` ignores the watermark and starts at `min_start`.
/// - `Resume`/`Incremental` continue the day after the watermark; without one
///   they start `lookback` before `now` (never before `min_start`), or at
///   `min_start` when the lookback is zero or absent.
pub fn resolve_start_date(
    watermark: Option<NaiveDate>,
    mode: SyncMode,
    lookback: Option<LookbackSpan>,
    min_start: NaiveDate,
    now: NaiveDate,
) -> Option<NaiveDate> {
    let candidate = match (mode, watermark) {
        (SyncMode::Full, _) => min_start,
        (_, Some(last)) => last.checked_add_days(Days::new(1))?,
        (_, None) => match lookback {
            Some(span) if !span.is_zero() => span.before(now).max(min_start),
            _ => min_start,
        },
    };

    let start = candidate.max(min_start);
    if start > now {
        None
    } else {
        Some(start)
    }
}

/// Window `[max(now - days, min_start), now]` used by scans that ignore watermarks
pub fn trailing_window(days: i64, min_start: NaiveDate, now: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    if days <= 0 {
        return None;
    }
    let start = now
        .checked_sub_days(Days::new(days as u64))
        .unwrap_or(NaiveDate::MIN)
        .max(min_start);
    if start > now {
        None
    } else {
        Some((start, now))
    }
}

/// Quarter containing `today`
pub fn current_quarter(today: NaiveDate) -> QuarterMarker {
    QuarterMarker::containing(today)
}

/// First quarter to fetch for fundamentals.
///
/// Non-full runs continue after the marker; otherwise start at Q1 of the
/// earliest year in the lookback. Never earlier than `min_year` Q1.
pub fn resolve_start_quarter(marker: Option<QuarterMarker>, mode: SyncMode, min_year: i32) -> QuarterMarker {
    let floor = QuarterMarker { year: min_year, quarter: 1 };
    let candidate = match (mode, marker) {
        (SyncMode::Full, _) | (_, None) => floor,
        (_, Some(m)) => m.next(),
    };
    candidate.max(floor)
}

/// Earliest fundamentals year for a lookback of `years` (the current year counts as one)
pub fn finance_min_year(today: NaiveDate, years: u32) -> i32 {
    today.year() - years.max(1) as i32 + 1
}

/// Inclusive quarter sequence from `start` to `end`
pub fn quarter_range(start: QuarterMarker, end: QuarterMarker) -> impl Iterator<Item = QuarterMarker> {
    std::iter::successors(Some(start), |q| Some(q.next())).take_while(move |q| *q <= end)
}

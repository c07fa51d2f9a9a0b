use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};

/// `America/Cancun` is the fixed anchor for all day-boundary reasoning
/// (bill dates, due dates, penalty "as of" comparisons). Stored timestamps
/// stay UTC; only day-boundary math passes through this zone.
pub const CLIENT_TIMEZONE: Tz = chrono_tz::America::Cancun;

/// Convert a UTC instant to the client-local calendar date.
pub fn local_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&CLIENT_TIMEZONE).date_naive()
}

/// Anchor a calendar date to local noon, expressed as a UTC instant. Used for
/// `Transaction.date`, which spec.md §3 requires to be "anchored to client
/// timezone at noon" so day-arithmetic near a DST boundary never drifts.
pub fn anchor_at_noon(date: NaiveDate) -> DateTime<Utc> {
    let local_noon = CLIENT_TIMEZONE
        .with_ymd_and_hms(date.year(), date.month(), date.day(), 12, 0, 0)
        .single()
        .expect("noon is never ambiguous across a DST transition");
    local_noon.with_timezone(&Utc)
}

/// `[startDate, endDate]` inclusive bounds of a fiscal year starting on
/// `fiscal_start_month` (1-indexed). A July (`7`) start means FY 2026 runs
/// 2025-07-01 through 2026-06-30 inclusive.
pub fn fiscal_bounds(fiscal_year: i32, fiscal_start_month: u32) -> (NaiveDate, NaiveDate) {
    let start_year = if fiscal_start_month == 1 {
        fiscal_year
    } else {
        fiscal_year - 1
    };
    let start = NaiveDate::from_ymd_opt(start_year, fiscal_start_month, 1)
        .expect("fiscal_start_month must be 1..=12");
    let end_month_start = NaiveDate::from_ymd_opt(start_year + 1, fiscal_start_month, 1)
        .expect("fiscal_start_month must be 1..=12");
    let end = end_month_start - Duration::days(1);
    (start, end)
}

/// 0-based index of `date`'s month within the fiscal year starting on
/// `fiscal_start_month`.
pub fn fiscal_month_index(date: NaiveDate, fiscal_start_month: u32) -> u32 {
    let month = date.month();
    (month + 12 - fiscal_start_month) % 12
}

/// The fiscal year (as spec.md's `periodId` labels it) that `date` falls in,
/// given a fiscal start month.
pub fn fiscal_year_of(date: NaiveDate, fiscal_start_month: u32) -> i32 {
    if date.month() >= fiscal_start_month {
        date.year() + if fiscal_start_month == 1 { 0 } else { 1 }
    } else {
        date.year()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fiscal_bounds_july_start() {
        let (start, end) = fiscal_bounds(2026, 7);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 6, 30).unwrap());
    }

    #[test]
    fn fiscal_month_index_wraps() {
        assert_eq!(fiscal_month_index(NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(), 7), 0);
        assert_eq!(fiscal_month_index(NaiveDate::from_ymd_opt(2026, 6, 15).unwrap(), 7), 11);
        assert_eq!(fiscal_month_index(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(), 7), 6);
    }

    #[test]
    fn anchor_at_noon_is_stable() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let instant = anchor_at_noon(date);
        assert_eq!(local_date(instant), date);
    }
}

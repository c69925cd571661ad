//! US equity trading calendar.
//!
//! Pure date/time classification: trading days, NYSE holidays, early closes,
//! and intraday market phases. All civil-time logic runs in US Eastern.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    PreMarket,
    MarketOpen,
    AfterHours,
    Closed,
}

impl MarketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreMarket => "pre_market",
            Self::MarketOpen => "market_open",
            Self::AfterHours => "after_hours",
            Self::Closed => "closed",
        }
    }
}

const MARKET_OPEN: NaiveTime = match NaiveTime::from_hms_opt(9, 30, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const MARKET_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(16, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};
const EARLY_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(13, 0, 0) {
    Some(t) => t,
    None => unreachable!(),
};

pub fn is_trading_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_market_holiday(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Inclusive list of trading days between `from` and `to`.
pub fn trading_days_in_range(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut d = from;
    while d <= to {
        if is_trading_day(d) {
            days.push(d);
        }
        d += Duration::days(1);
    }
    days
}

pub fn count_trading_days_in_range(from: NaiveDate, to: NaiveDate) -> usize {
    trading_days_in_range(from, to).len()
}

pub fn first_trading_day_on_or_after(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !is_trading_day(d) {
        d += Duration::days(1);
    }
    d
}

pub fn next_trading_day(date: NaiveDate) -> NaiveDate {
    first_trading_day_on_or_after(date + Duration::days(1))
}

/// Last trading day on or before `date`.
pub fn last_trading_day_on_or_before(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !is_trading_day(d) {
        d -= Duration::days(1);
    }
    d
}

/// Market phase at `ts`. The regular session is [09:30, 16:00) Eastern,
/// early-close days end at 13:00. Non-trading days are `Closed` for the
/// whole day.
pub fn market_status(ts: DateTime<Utc>) -> MarketStatus {
    let eastern = ts.with_timezone(&New_York);
    let date = eastern.date_naive();
    if !is_trading_day(date) {
        return MarketStatus::Closed;
    }

    let close = if is_early_close_day(date) {
        EARLY_CLOSE
    } else {
        MARKET_CLOSE
    };

    let time = eastern.time();
    if time < MARKET_OPEN {
        MarketStatus::PreMarket
    } else if time < close {
        MarketStatus::MarketOpen
    } else {
        MarketStatus::AfterHours
    }
}

/// The most recent trading day whose session has fully completed as of `ts`.
///
/// After hours on a trading day that day counts as complete; before the
/// close (pre-market or in-session) it does not, so the previous trading
/// day is returned. Weekends and holidays walk back to the preceding
/// trading day.
pub fn last_complete_trading_day(ts: DateTime<Utc>) -> NaiveDate {
    let today = ts.with_timezone(&New_York).date_naive();
    match market_status(ts) {
        MarketStatus::AfterHours => today,
        MarketStatus::PreMarket | MarketStatus::MarketOpen => {
            last_trading_day_on_or_before(today - Duration::days(1))
        }
        MarketStatus::Closed => last_trading_day_on_or_before(today),
    }
}

/// Early close (13:00 ET): day after Thanksgiving, plus Christmas Eve and
/// July 3 when they land on a trading weekday.
pub fn is_early_close_day(date: NaiveDate) -> bool {
    let year = date.year();

    let thanksgiving = nth_weekday(year, 11, Weekday::Thu, 4);
    if date == thanksgiving + Duration::days(1) {
        return true;
    }

    let christmas_eve = NaiveDate::from_ymd_opt(year, 12, 24).unwrap();
    if date == christmas_eve && !is_weekend(date) && !is_market_holiday(date) {
        return true;
    }

    let july_3 = NaiveDate::from_ymd_opt(year, 7, 3).unwrap();
    if date == july_3 && !is_weekend(date) && !is_market_holiday(date) {
        return true;
    }

    false
}

fn is_market_holiday(date: NaiveDate) -> bool {
    let year = date.year();
    // Observed New Year's of the following year can land on Dec 31.
    holidays_for_year(year).contains(&date)
        || (date.month() == 12
            && observed(NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()) == Some(date))
}

fn holidays_for_year(year: i32) -> [NaiveDate; 10] {
    let ymd = |m, d| NaiveDate::from_ymd_opt(year, m, d).unwrap();
    let easter = easter_sunday(year);
    [
        observed(ymd(1, 1)).unwrap_or(ymd(1, 1)),
        nth_weekday(year, 1, Weekday::Mon, 3),  // MLK Day
        nth_weekday(year, 2, Weekday::Mon, 3),  // Presidents' Day
        easter - Duration::days(2),             // Good Friday
        last_weekday(year, 5, Weekday::Mon),    // Memorial Day
        observed(ymd(6, 19)).unwrap_or(ymd(6, 19)),
        observed(ymd(7, 4)).unwrap_or(ymd(7, 4)),
        nth_weekday(year, 9, Weekday::Mon, 1),  // Labor Day
        nth_weekday(year, 11, Weekday::Thu, 4), // Thanksgiving
        observed(ymd(12, 25)).unwrap_or(ymd(12, 25)),
    ]
}

/// Observation shift for fixed-date holidays: Saturday observes Friday,
/// Sunday observes Monday. Returns None only when arithmetic would leave
/// the calendar (never in practice).
fn observed(date: NaiveDate) -> Option<NaiveDate> {
    match date.weekday() {
        Weekday::Sat => Some(date - Duration::days(1)),
        Weekday::Sun => Some(date + Duration::days(1)),
        _ => Some(date),
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let offset = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first + Duration::days(i64::from(offset) + 7 * (i64::from(n) - 1))
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let last = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    } - Duration::days(1);
    let offset = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last - Duration::days(i64::from(offset))
}

/// Anonymous Gregorian computus.
fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekday_is_trading_day() {
        assert!(is_trading_day(date(2024, 12, 18)));
    }

    #[test]
    fn weekend_not_trading_day() {
        assert!(!is_trading_day(date(2024, 12, 21)));
        assert!(!is_trading_day(date(2024, 12, 22)));
    }

    #[test]
    fn fixed_holidays_not_trading_days() {
        assert!(!is_trading_day(date(2024, 12, 25))); // Christmas
        assert!(!is_trading_day(date(2024, 11, 28))); // Thanksgiving
        assert!(!is_trading_day(date(2025, 1, 20))); // MLK Day
        assert!(!is_trading_day(date(2025, 1, 1))); // New Year's
        assert!(!is_trading_day(date(2024, 7, 4))); // Independence Day
        assert!(!is_trading_day(date(2024, 6, 19))); // Juneteenth
        assert!(!is_trading_day(date(2024, 9, 2))); // Labor Day
        assert!(!is_trading_day(date(2024, 5, 27))); // Memorial Day
        assert!(!is_trading_day(date(2024, 2, 19))); // Presidents' Day
    }

    #[test]
    fn good_friday_not_trading_day() {
        // Easter 2024 is March 31, Good Friday March 29.
        assert!(!is_trading_day(date(2024, 3, 29)));
        // Easter 2025 is April 20, Good Friday April 18.
        assert!(!is_trading_day(date(2025, 4, 18)));
    }

    #[test]
    fn observed_holiday_shifts() {
        // July 4 2026 is a Saturday: observed Friday July 3.
        assert!(!is_trading_day(date(2026, 7, 3)));
        // June 19 2027 is a Saturday: observed Friday June 18.
        assert!(!is_trading_day(date(2027, 6, 18)));
        // Jan 1 2028 is a Saturday: observed Friday Dec 31 2027.
        assert!(!is_trading_day(date(2027, 12, 31)));
    }

    #[test]
    fn trading_days_simple_range() {
        // Mon Dec 16 .. Fri Dec 20 2024 = 5 trading days.
        let days = trading_days_in_range(date(2024, 12, 16), date(2024, 12, 20));
        assert_eq!(days.len(), 5);
    }

    #[test]
    fn trading_days_skip_weekend_and_holiday() {
        // Thu Dec 19 .. Mon Dec 23 2024: Thu, Fri, Mon.
        assert_eq!(
            trading_days_in_range(date(2024, 12, 19), date(2024, 12, 23)).len(),
            3
        );
        // Mon Dec 23 .. Thu Dec 26 2024: Christmas excluded.
        let days = trading_days_in_range(date(2024, 12, 23), date(2024, 12, 26));
        assert_eq!(days.len(), 3);
        assert!(!days.contains(&date(2024, 12, 25)));
    }

    #[test]
    fn trading_days_weekend_only_range_is_empty() {
        assert!(trading_days_in_range(date(2024, 12, 21), date(2024, 12, 22)).is_empty());
    }

    #[test]
    fn count_matches_list_length() {
        let (from, to) = (date(2024, 12, 1), date(2024, 12, 31));
        assert_eq!(
            count_trading_days_in_range(from, to),
            trading_days_in_range(from, to).len()
        );
    }

    #[test]
    fn market_status_phases() {
        // Tuesday Dec 3 2024 (EST = UTC-5).
        assert_eq!(market_status(utc(2024, 12, 3, 13, 0)), MarketStatus::PreMarket); // 08:00 ET
        assert_eq!(market_status(utc(2024, 12, 3, 14, 30)), MarketStatus::MarketOpen); // 09:30 ET
        assert_eq!(market_status(utc(2024, 12, 3, 17, 0)), MarketStatus::MarketOpen); // 12:00 ET
        assert_eq!(market_status(utc(2024, 12, 3, 22, 0)), MarketStatus::AfterHours); // 17:00 ET
    }

    #[test]
    fn market_close_boundary_is_after_hours() {
        // 16:00:00 ET exactly: the session interval is half-open.
        assert_eq!(market_status(utc(2024, 12, 3, 21, 0)), MarketStatus::AfterHours);
    }

    #[test]
    fn market_status_closed_days() {
        assert_eq!(market_status(utc(2024, 12, 7, 14, 0)), MarketStatus::Closed); // Saturday
        assert_eq!(market_status(utc(2025, 1, 1, 14, 30)), MarketStatus::Closed); // New Year's
        assert_eq!(market_status(utc(2024, 11, 28, 14, 30)), MarketStatus::Closed); // Thanksgiving
    }

    #[test]
    fn early_close_day_phases() {
        // Nov 29 2024 (day after Thanksgiving) closes 13:00 ET.
        assert_eq!(market_status(utc(2024, 11, 29, 17, 0)), MarketStatus::MarketOpen); // 12:00 ET
        assert_eq!(market_status(utc(2024, 11, 29, 19, 0)), MarketStatus::AfterHours); // 14:00 ET
    }

    #[test]
    fn christmas_eve_is_early_close() {
        // Dec 24 2024 is a Tuesday.
        assert!(is_early_close_day(date(2024, 12, 24)));
        assert_eq!(market_status(utc(2024, 12, 24, 19, 0)), MarketStatus::AfterHours); // 14:00 ET
    }

    #[test]
    fn last_complete_after_hours_is_today() {
        assert_eq!(
            last_complete_trading_day(utc(2024, 12, 3, 22, 0)),
            date(2024, 12, 3)
        );
    }

    #[test]
    fn last_complete_pre_market_is_previous_day() {
        assert_eq!(
            last_complete_trading_day(utc(2024, 12, 3, 13, 0)),
            date(2024, 12, 2)
        );
    }

    #[test]
    fn last_complete_during_session_is_previous_day() {
        assert_eq!(
            last_complete_trading_day(utc(2024, 12, 3, 16, 0)),
            date(2024, 12, 2)
        );
    }

    #[test]
    fn last_complete_weekend_is_friday() {
        assert_eq!(
            last_complete_trading_day(utc(2024, 12, 7, 16, 0)),
            date(2024, 12, 6)
        );
        // Monday pre-market also resolves to Friday.
        assert_eq!(
            last_complete_trading_day(utc(2024, 12, 9, 13, 0)),
            date(2024, 12, 6)
        );
    }

    #[test]
    fn next_trading_day_skips_weekend_and_holiday() {
        assert_eq!(next_trading_day(date(2024, 12, 2)), date(2024, 12, 3));
        assert_eq!(next_trading_day(date(2024, 12, 6)), date(2024, 12, 9));
        assert_eq!(next_trading_day(date(2024, 12, 31)), date(2025, 1, 2));
    }

    #[test]
    fn first_trading_day_on_or_after_cases() {
        assert_eq!(first_trading_day_on_or_after(date(2024, 12, 2)), date(2024, 12, 2));
        assert_eq!(first_trading_day_on_or_after(date(2024, 12, 7)), date(2024, 12, 9));
        assert_eq!(first_trading_day_on_or_after(date(2024, 12, 25)), date(2024, 12, 26));
        assert_eq!(first_trading_day_on_or_after(date(2024, 11, 28)), date(2024, 11, 29));
    }

    #[test]
    fn round_trip_properties() {
        let mut d = date(2024, 1, 1);
        for _ in 0..200 {
            let first = first_trading_day_on_or_after(d);
            assert!(first >= d);
            assert!(is_trading_day(first));

            let next = next_trading_day(d);
            assert!(next > d);
            assert!(is_trading_day(next));

            d += Duration::days(1);
        }
    }
}

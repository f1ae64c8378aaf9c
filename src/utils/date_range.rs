use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_KO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:최근|지난)\s*(\d+)\s*(개월|달|년|주|일)(?:간)?").expect("valid regex")
});
static RELATIVE_EN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:last|past)\s+(\d+)\s+(day|week|month|year)s?").expect("valid regex")
});
static EXPLICIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})\s*(?:to|~)\s*(\d{4}-\d{2}-\d{2})").expect("valid regex")
});

/// Resolves phrases like "최근 3개월", "작년" or "2024-01-01 ~ 2024-03-31"
/// into an inclusive date range relative to `today`.
pub fn parse_natural_date(text: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = EXPLICIT.captures(&text) {
        let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
        return (start <= end).then_some((start, end));
    }

    if let Some(caps) = RELATIVE_KO.captures(&text) {
        let num: i64 = caps[1].parse().ok()?;
        let per_unit = match &caps[2] {
            "년" => 365,
            "주" => 7,
            "일" => 1,
            _ => 30,
        };
        return lookback(today, num, per_unit);
    }
    if let Some(caps) = RELATIVE_EN.captures(&text) {
        let num: i64 = caps[1].parse().ok()?;
        let per_unit = match &caps[2] {
            "year" => 365,
            "week" => 7,
            "day" => 1,
            _ => 30,
        };
        return lookback(today, num, per_unit);
    }

    if text.contains("올해") || text.contains("이번 년도") || text.contains("금년") || text.contains("this year") {
        return Some((NaiveDate::from_ymd_opt(today.year(), 1, 1)?, today));
    }
    if text.contains("작년") || text.contains("last year") {
        let year = today.year() - 1;
        return Some((
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        ));
    }
    if text.contains("이번 달") || text.contains("this month") {
        return Some((today.with_day(1)?, today));
    }
    if text.contains("지난 달") || text.contains("last month") {
        let last_of_prev = today.with_day(1)? - Duration::days(1);
        return Some((last_of_prev.with_day(1)?, last_of_prev));
    }
    if text.contains("어제") || text.contains("yesterday") {
        let day = today - Duration::days(1);
        return Some((day, day));
    }
    if text.contains("오늘") || text.contains("today") {
        return Some((today, today));
    }
    None
}

/// `count` units of `unit_days` back from `today`. None when the start falls
/// outside the calendar.
fn lookback(today: NaiveDate, count: i64, unit_days: i64) -> Option<(NaiveDate, NaiveDate)> {
    let days = count.checked_mul(unit_days)?;
    let start = today.checked_sub_signed(Duration::try_days(days)?)?;
    Some((start, today))
}

/// Unix-second bounds covering the whole of both days (UTC).
pub fn to_timestamp_bounds(range: (NaiveDate, NaiveDate)) -> Option<(i64, i64)> {
    let start = range.0.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    let end = range.1.and_hms_opt(23, 59, 59)?.and_utc().timestamp();
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn relative_korean_ranges() {
        let today = day(2025, 7, 5);
        assert_eq!(parse_natural_date("최근 1년", today), Some((day(2024, 7, 5), today)));
        assert_eq!(parse_natural_date("지난 3개월간", today), Some((today - Duration::days(90), today)));
        assert_eq!(parse_natural_date("최근 2주", today), Some((day(2025, 6, 21), today)));
        assert_eq!(parse_natural_date("최근 10일", today), Some((day(2025, 6, 25), today)));
    }

    #[test]
    fn oversized_lookbacks_are_rejected() {
        let today = day(2025, 7, 5);
        assert_eq!(parse_natural_date("최근 100000000년", today), None);
        assert_eq!(parse_natural_date("last 9223372036854775807 days", today), None);
        assert_eq!(parse_natural_date("최근 99999999999999999999일", today), None);
        assert_eq!(parse_natural_date("지난 0일", today), Some((today, today)));
    }

    #[test]
    fn calendar_phrases() {
        let today = day(2025, 3, 15);
        assert_eq!(parse_natural_date("올해", today), Some((day(2025, 1, 1), today)));
        assert_eq!(parse_natural_date("작년 데이터", today), Some((day(2024, 1, 1), day(2024, 12, 31))));
        assert_eq!(parse_natural_date("이번 달", today), Some((day(2025, 3, 1), today)));
        assert_eq!(parse_natural_date("지난 달", today), Some((day(2025, 2, 1), day(2025, 2, 28))));
        assert_eq!(parse_natural_date("어제", today), Some((day(2025, 3, 14), day(2025, 3, 14))));
        assert_eq!(parse_natural_date("last 2 weeks", today), Some((day(2025, 3, 1), today)));
    }

    #[test]
    fn explicit_and_unknown() {
        let today = day(2025, 3, 15);
        assert_eq!(
            parse_natural_date("2024-01-01 ~ 2024-03-31", today),
            Some((day(2024, 1, 1), day(2024, 3, 31)))
        );
        assert_eq!(
            parse_natural_date("2024-01-01 to 2024-02-01", today),
            Some((day(2024, 1, 1), day(2024, 2, 1)))
        );
        assert_eq!(parse_natural_date("2024-05-01 ~ 2024-01-01", today), None);
        assert_eq!(parse_natural_date("언젠가", today), None);
        assert_eq!(parse_natural_date("", today), None);
    }

    #[test]
    fn timestamp_bounds_cover_whole_days() {
        let (start, end) = to_timestamp_bounds((day(1970, 1, 1), day(1970, 1, 2))).unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, 2 * 86_400 - 1);
    }
}

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::models::AttendanceStatus;

/// `late` when the local check-in time is past shift start plus grace.
pub fn check_in_status(
    check_in: DateTime<Utc>,
    offset: FixedOffset,
    shift_start: NaiveTime,
    grace_minutes: i64,
) -> AttendanceStatus {
    let local = check_in.with_timezone(&offset).time();
    let (deadline, wrapped) = shift_start.overflowing_add_signed(Duration::minutes(grace_minutes));
    if wrapped == 0 && local > deadline {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Business-local calendar day of an instant.
pub fn work_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Hours between check-in and check-out, to two decimals.
pub fn hours_between(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> Decimal {
    let minutes = (check_out - check_in).num_minutes().max(0);
    (Decimal::from(minutes) / Decimal::from(60)).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    #[rstest]
    #[case("2026-10-19T08:55:00Z", AttendanceStatus::Present)]
    #[case("2026-10-19T09:15:00Z", AttendanceStatus::Present)]
    #[case("2026-10-19T09:16:00Z", AttendanceStatus::Late)]
    fn lateness_uses_grace(#[case] when: &str, #[case] expected: AttendanceStatus) {
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(check_in_status(at(when), utc, nine(), 15), expected);
    }

    #[test]
    fn lateness_is_judged_on_local_time() {
        let jakarta = FixedOffset::east_opt(7 * 3600).unwrap();
        // 02:30 UTC is 09:30 in UTC+7
        assert_eq!(
            check_in_status(at("2026-10-19T02:30:00Z"), jakarta, nine(), 15),
            AttendanceStatus::Late
        );
        assert_eq!(
            work_date(at("2026-10-18T18:00:00Z"), jakarta),
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
        );
    }

    #[test]
    fn hours_are_rounded_and_never_negative() {
        assert_eq!(
            hours_between(at("2026-10-19T09:00:00Z"), at("2026-10-19T17:20:00Z")),
            Decimal::from_str("8.33").unwrap()
        );
        assert_eq!(
            hours_between(at("2026-10-19T17:00:00Z"), at("2026-10-19T09:00:00Z")),
            Decimal::ZERO
        );
    }
}

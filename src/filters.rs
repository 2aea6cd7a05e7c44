// Query-string helpers shared by the list endpoints. Admin forms submit empty
// strings for unset filters, so everything arrives as text first.

use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;

pub fn parse_optional_uuid(raw: Option<&str>, field: &str) -> Result<Option<Uuid>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| AppError::bad_request(format!("{} is not a valid id", field))),
    }
}

pub fn parse_optional_date(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::bad_request(format!("{} must be YYYY-MM-DD", field))),
    }
}

pub fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parses one of the text enums (`status=in_transit`, `channel=retail`, ...).
pub fn parse_optional_enum<T>(raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = AppError>,
{
    non_empty(raw).map(|s| s.parse()).transpose()
}

/// Both ends default to today when missing; a reversed range is rejected.
pub fn date_range(
    from: Option<&str>,
    to: Option<&str>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), AppError> {
    let from = parse_optional_date(from, "date_from")?;
    let to = parse_optional_date(to, "date_to")?;
    let (from, to) = match (from, to) {
        (Some(f), Some(t)) => (f, t),
        (Some(f), None) => (f, today.max(f)),
        (None, Some(t)) => (t.min(today), t),
        (None, None) => (today, today),
    };
    if from > to {
        return Err(AppError::bad_request("date_from must not be after date_to"));
    }
    Ok((from, to))
}

/// UTC instants covering the business-local days `from..=to`; the end is exclusive.
pub fn local_day_bounds(
    from: NaiveDate,
    to: NaiveDate,
    offset: FixedOffset,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = from.and_time(NaiveTime::default());
    let end = (to + Duration::days(1)).and_time(NaiveTime::default());
    let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
    ((start - shift).and_utc(), (end - shift).and_utc())
}

/// Today's date on the shop's wall clock.
pub fn local_today(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    const DEFAULT_PER_PAGE: i64 = 50;
    const MAX_PER_PAGE: i64 = 200;

    pub fn limit(&self) -> i64 {
        self.per_page
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .clamp(1, Self::MAX_PER_PAGE)
    }

    /// Rows to skip. Pages past the end of `i64` stop at the largest offset.
    pub fn offset(&self) -> i64 {
        (self.page.unwrap_or(1).max(1) - 1).saturating_mul(self.limit())
    }
}

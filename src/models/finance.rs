use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

text_enum! {
    PeriodType {
        Weekly => "weekly",
        Monthly => "monthly",
    }
}

impl PeriodType {
    /// First and last day of the period containing `anchor`.
    /// Weeks run Monday to Sunday.
    pub fn bounds(self, anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            PeriodType::Weekly => {
                let start =
                    anchor - Duration::days(i64::from(anchor.weekday().num_days_from_monday()));
                (start, start + Duration::days(6))
            }
            PeriodType::Monthly => {
                let start = anchor.with_day(1).unwrap_or(anchor);
                let next_month = if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
                };
                let end = next_month
                    .and_then(|d| d.pred_opt())
                    .unwrap_or(start);
                (start, end)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FinancePeriod {
    pub id: Uuid,
    pub period_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub planned_revenue: Decimal,
    pub planned_expenses: Decimal,
    pub planned_orders: i32,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[rstest]
    #[case(d(2026, 10, 19), d(2026, 10, 19), d(2026, 10, 25))] // Monday
    #[case(d(2026, 10, 25), d(2026, 10, 19), d(2026, 10, 25))] // Sunday
    #[case(d(2026, 12, 31), d(2026, 12, 28), d(2027, 1, 3))]
    fn weekly_bounds(#[case] anchor: NaiveDate, #[case] start: NaiveDate, #[case] end: NaiveDate) {
        assert_eq!(PeriodType::Weekly.bounds(anchor), (start, end));
    }

    #[rstest]
    #[case(d(2026, 10, 19), d(2026, 10, 1), d(2026, 10, 31))]
    #[case(d(2028, 2, 10), d(2028, 2, 1), d(2028, 2, 29))]
    #[case(d(2026, 12, 5), d(2026, 12, 1), d(2026, 12, 31))]
    fn monthly_bounds(#[case] anchor: NaiveDate, #[case] start: NaiveDate, #[case] end: NaiveDate) {
        assert_eq!(PeriodType::Monthly.bounds(anchor), (start, end));
    }
}

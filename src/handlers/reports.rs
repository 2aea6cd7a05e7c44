use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tower_cookies::Cookies;

use crate::{
    database::AppState,
    error::AppResult,
    filters::{date_range, local_day_bounds, local_today, parse_optional_enum},
    middleware::authorize,
    models::Channel,
};

#[derive(Deserialize)]
pub struct ReportFilters {
    date_from: Option<String>,
    date_to: Option<String>,
    channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SalesReportRow {
    pub day: NaiveDate,
    pub channel: String,
    pub order_count: i64,
    pub net_revenue: Decimal,
}

#[derive(Debug, Serialize)]
pub struct SalesReport {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub total_orders: i64,
    pub total_revenue: Decimal,
    pub rows: Vec<SalesReportRow>,
}

impl SalesReport {
    pub fn new(date_from: NaiveDate, date_to: NaiveDate, rows: Vec<SalesReportRow>) -> Self {
        let total_orders = rows.iter().map(|r| r.order_count).sum();
        let total_revenue = rows.iter().map(|r| r.net_revenue).sum();
        Self {
            date_from,
            date_to,
            total_orders,
            total_revenue,
            rows,
        }
    }
}

/// Orders and net revenue per business-local day and channel. Cancelled
/// orders are left out and retail returns are netted off.
pub async fn sales_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<ReportFilters>,
) -> AppResult<Json<SalesReport>> {
    authorize(&cookies, &state, "reports:read").await?;

    let offset = state.config.business_offset;
    let (from, to) = date_range(
        filters.date_from.as_deref(),
        filters.date_to.as_deref(),
        local_today(offset),
    )?;
    let channel = parse_optional_enum::<Channel>(filters.channel.as_deref())?;
    let (start, end) = local_day_bounds(from, to, offset);

    let mut query = QueryBuilder::<Postgres>::new("SELECT ((created_at + ");
    query
        .push_bind(offset.local_minus_utc())
        .push(
            r#"::float8 * INTERVAL '1 second') AT TIME ZONE 'UTC')::date AS day,
               channel,
               COUNT(*) AS order_count,
               COALESCE(SUM(total - returned_amount), 0) AS net_revenue
            FROM orders
            WHERE status <> 'cancelled' AND created_at >= "#,
        )
        .push_bind(start)
        .push(" AND created_at < ")
        .push_bind(end);
    if let Some(channel) = channel {
        query.push(" AND channel = ").push_bind(channel.as_str());
    }
    query.push(" GROUP BY day, channel ORDER BY day, channel");

    let rows = query
        .build_query_as::<SalesReportRow>()
        .fetch_all(&state.db)
        .await?;

    Ok(Json(SalesReport::new(from, to, rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn totals_sum_every_row() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let rows = vec![
            SalesReportRow {
                day,
                channel: "retail".into(),
                order_count: 12,
                net_revenue: Decimal::from_str("340.50").unwrap(),
            },
            SalesReportRow {
                day,
                channel: "delivery".into(),
                order_count: 3,
                net_revenue: Decimal::from_str("120.00").unwrap(),
            },
        ];

        let report = SalesReport::new(day, day, rows);
        assert_eq!(report.total_orders, 15);
        assert_eq!(report.total_revenue, Decimal::from_str("460.50").unwrap());
        assert_eq!(report.rows.len(), 2);
    }

    #[test]
    fn empty_range_reports_zero() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let report = SalesReport::new(day, day, Vec::new());
        assert_eq!(report.total_orders, 0);
        assert_eq!(report.total_revenue, Decimal::ZERO);
    }
}

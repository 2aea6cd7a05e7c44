use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::{AppState, Database},
    error::{AppError, AppResult},
    filters::{date_range, local_day_bounds, local_today, parse_optional_enum},
    middleware::authorize,
    models::{FinancePeriod, PeriodType},
    services::finance::{
        compare, ChannelBreakdown, CostAggregates, FinanceActuals, PlanReport, SalesAggregates,
    },
};

#[derive(Deserialize)]
pub struct PeriodFilters {
    period_type: Option<String>,
}

#[derive(Deserialize)]
pub struct RangeQuery {
    date_from: Option<String>,
    date_to: Option<String>,
}

#[derive(Deserialize)]
pub struct CreatePeriodRequest {
    period_type: PeriodType,
    anchor_date: NaiveDate,
    #[serde(flatten)]
    plan: PlanFields,
}

#[derive(Debug, Deserialize)]
pub struct PlanFields {
    #[serde(default)]
    planned_revenue: Decimal,
    #[serde(default)]
    planned_expenses: Decimal,
    #[serde(default)]
    planned_orders: i32,
    notes: Option<String>,
}

impl PlanFields {
    fn validate(&self) -> Result<(), AppError> {
        if self.planned_revenue < Decimal::ZERO
            || self.planned_expenses < Decimal::ZERO
            || self.planned_orders < 0
        {
            return Err(AppError::validation("planned figures cannot be negative"));
        }
        Ok(())
    }
}

/// Everything that happened over the business-local days `from..=to`.
pub async fn load_actuals(
    db: &Database,
    offset: FixedOffset,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<FinanceActuals> {
    let (start, end) = local_day_bounds(from, to, offset);

    let sales = sqlx::query_as::<_, SalesAggregates>(
        r#"
        SELECT COUNT(*) AS order_count,
               COALESCE(SUM(subtotal), 0) AS gross_sales,
               COALESCE(SUM(discount), 0) AS discounts,
               COALESCE(SUM(shipping_fee), 0) AS shipping_income,
               COALESCE(SUM(total), 0) AS billed,
               COALESCE(SUM(returned_amount), 0) AS returns
        FROM orders
        WHERE status <> 'cancelled' AND created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(db)
    .await?;

    let cogs = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(cost_price), 0)
        FROM inventory_items
        WHERE status = 'sold' AND sold_at >= $1 AND sold_at < $2
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(db)
    .await?;

    let (shipping_costs, shortage_refunds) = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT COALESCE(SUM(shipping_cost), 0), COALESCE(SUM(refund_amount), 0)
        FROM deliveries
        WHERE status <> 'cancelled' AND created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(db)
    .await?;

    let operating_expenses = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM expenses WHERE expense_date BETWEEN $1 AND $2",
    )
    .bind(from)
    .bind(to)
    .fetch_one(db)
    .await?;

    let payroll_cost = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(net_pay), 0) FROM payroll WHERE period_end BETWEEN $1 AND $2",
    )
    .bind(from)
    .bind(to)
    .fetch_one(db)
    .await?;

    let by_channel = sqlx::query_as::<_, ChannelBreakdown>(
        r#"
        SELECT channel, COUNT(*) AS order_count,
               COALESCE(SUM(total - returned_amount), 0) AS revenue
        FROM orders
        WHERE status <> 'cancelled' AND created_at >= $1 AND created_at < $2
        GROUP BY channel
        ORDER BY channel
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(db)
    .await?;

    Ok(FinanceActuals::derive(
        from,
        to,
        sales,
        CostAggregates {
            cogs,
            shipping_costs,
            shortage_refunds,
            operating_expenses,
            payroll_cost,
        },
        by_channel,
    ))
}

async fn fetch_period(db: &Database, period_id: Uuid) -> AppResult<FinancePeriod> {
    sqlx::query_as::<_, FinancePeriod>("SELECT * FROM finance_periods WHERE id = $1")
        .bind(period_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("finance period"))
}

pub async fn list_periods(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<PeriodFilters>,
) -> AppResult<Json<Vec<FinancePeriod>>> {
    authorize(&cookies, &state, "finance:read").await?;

    let period_type = parse_optional_enum::<PeriodType>(filters.period_type.as_deref())?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM finance_periods");
    if let Some(period_type) = period_type {
        query.push(" WHERE period_type = ").push_bind(period_type.as_str());
    }
    query.push(" ORDER BY start_date DESC, period_type");

    let periods = query
        .build_query_as::<FinancePeriod>()
        .fetch_all(&state.db)
        .await?;
    Ok(Json(periods))
}

pub async fn get_period(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(period_id): Path<Uuid>,
) -> AppResult<Json<FinancePeriod>> {
    authorize(&cookies, &state, "finance:read").await?;
    Ok(Json(fetch_period(&state.db, period_id).await?))
}

pub async fn create_period(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<CreatePeriodRequest>,
) -> AppResult<(StatusCode, Json<FinancePeriod>)> {
    let user = authorize(&cookies, &state, "finance:write").await?;
    req.plan.validate()?;

    let (start_date, end_date) = req.period_type.bounds(req.anchor_date);

    let period = sqlx::query_as::<_, FinancePeriod>(
        r#"
        INSERT INTO finance_periods (period_type, start_date, end_date, planned_revenue,
                                     planned_expenses, planned_orders, notes, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(req.period_type.as_str())
    .bind(start_date)
    .bind(end_date)
    .bind(req.plan.planned_revenue.round_dp(2))
    .bind(req.plan.planned_expenses.round_dp(2))
    .bind(req.plan.planned_orders)
    .bind(&req.plan.notes)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(period)))
}

pub async fn update_period(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(period_id): Path<Uuid>,
    Json(plan): Json<PlanFields>,
) -> AppResult<Json<FinancePeriod>> {
    authorize(&cookies, &state, "finance:write").await?;
    plan.validate()?;

    let period = sqlx::query_as::<_, FinancePeriod>(
        r#"
        UPDATE finance_periods
        SET planned_revenue = $2, planned_expenses = $3, planned_orders = $4, notes = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(period_id)
    .bind(plan.planned_revenue.round_dp(2))
    .bind(plan.planned_expenses.round_dp(2))
    .bind(plan.planned_orders)
    .bind(&plan.notes)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("finance period"))?;

    Ok(Json(period))
}

pub async fn delete_period(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(period_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&cookies, &state, "finance:write").await?;

    let result = sqlx::query("DELETE FROM finance_periods WHERE id = $1")
        .bind(period_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("finance period"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn period_report(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(period_id): Path<Uuid>,
) -> AppResult<Json<PlanReport>> {
    authorize(&cookies, &state, "finance:read").await?;

    let period = fetch_period(&state.db, period_id).await?;
    let actuals = load_actuals(
        &state.db,
        state.config.business_offset,
        period.start_date,
        period.end_date,
    )
    .await?;

    Ok(Json(compare(period, actuals)))
}

pub async fn actuals(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(range): Query<RangeQuery>,
) -> AppResult<Json<FinanceActuals>> {
    authorize(&cookies, &state, "finance:read").await?;

    let offset = state.config.business_offset;
    let (from, to) = date_range(
        range.date_from.as_deref(),
        range.date_to.as_deref(),
        local_today(offset),
    )?;

    Ok(Json(load_actuals(&state.db, offset, from, to).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_defaults_to_zero_and_rejects_negatives() {
        let plan: PlanFields = serde_json::from_str(r#"{"notes":"quiet month"}"#).unwrap();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.planned_orders, 0);

        let plan: PlanFields = serde_json::from_str(r#"{"planned_revenue":"-1"}"#).unwrap();
        assert!(matches!(plan.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn period_request_accepts_plan_fields_inline() {
        let req: CreatePeriodRequest = serde_json::from_str(
            r#"{"period_type":"weekly","anchor_date":"2026-10-22","planned_revenue":"1500.00","planned_orders":40}"#,
        )
        .unwrap();
        assert_eq!(req.period_type, PeriodType::Weekly);
        assert_eq!(req.plan.planned_orders, 40);
        assert_eq!(
            req.period_type.bounds(req.anchor_date).0,
            NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
        );
    }
}

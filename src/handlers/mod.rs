pub mod attendance;
pub mod auth;
pub mod customers;
pub mod deliveries;
pub mod employees;
pub mod expenses;
pub mod finance;
pub mod inventory;
pub mod orders;
pub mod payroll;
pub mod products;
pub mod reports;
pub mod sales;
pub mod team;

use axum::{extract::State, response::Json};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tower_cookies::Cookies;

use crate::{
    database::AppState,
    error::{AppError, AppResult},
    filters::{local_day_bounds, local_today},
    handlers::inventory::{fetch_low_stock, LowStockProduct},
    middleware::get_current_user,
};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn health_db(State(state): State<AppState>) -> AppResult<Json<Value>> {
    sqlx::query("SELECT 1").execute(&state.db).await?;
    Ok(Json(json!({ "status": "ok", "database": "reachable" })))
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub date: NaiveDate,
    pub orders_today: i64,
    pub net_sales_today: Decimal,
    pub pending_orders: i64,
    pub open_deliveries: i64,
    pub checked_in_today: i64,
    pub low_stock: Vec<LowStockProduct>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Dashboard>> {
    // Any signed-in user may see the summary.
    get_current_user(&cookies, &state)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let db = &state.db;
    let today = local_today(state.config.business_offset);
    let (start, end) = local_day_bounds(today, today, state.config.business_offset);

    let (orders_today, net_sales_today) = sqlx::query_as::<_, (i64, Decimal)>(
        r#"
        SELECT COUNT(*), COALESCE(SUM(total - returned_amount), 0)
        FROM orders
        WHERE status <> 'cancelled' AND created_at >= $1 AND created_at < $2
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(db)
    .await?;

    let pending_orders =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE status = 'pending'")
            .fetch_one(db)
            .await?;

    let open_deliveries = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM deliveries WHERE status IN ('pending', 'in_transit', 'failed')",
    )
    .fetch_one(db)
    .await?;

    let checked_in_today = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM attendance WHERE work_date = $1 AND check_in IS NOT NULL",
    )
    .bind(today)
    .fetch_one(db)
    .await?;

    let low_stock = fetch_low_stock(db).await?;

    Ok(Json(Dashboard {
        date: today,
        orders_today,
        net_sales_today,
        pending_orders,
        open_deliveries,
        checked_in_today,
        low_stock,
    }))
}

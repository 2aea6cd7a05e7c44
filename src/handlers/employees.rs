use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::AppState,
    error::{AppError, AppResult},
    filters::non_empty,
    middleware::authorize,
    models::{Employee, PayType},
};

#[derive(Deserialize)]
pub struct EmployeeFilters {
    include_inactive: Option<bool>,
    search: Option<String>,
}

#[derive(Deserialize)]
pub struct EmployeeForm {
    full_name: String,
    phone: Option<String>,
    position: Option<String>,
    pay_type: PayType,
    pay_rate: Decimal,
    hired_at: Option<NaiveDate>,
    is_active: Option<bool>,
}

impl EmployeeForm {
    fn validate(&self) -> Result<(), AppError> {
        if self.full_name.trim().is_empty() {
            return Err(AppError::validation("full_name is required"));
        }
        if self.pay_rate < Decimal::ZERO {
            return Err(AppError::validation("pay_rate cannot be negative"));
        }
        Ok(())
    }
}

pub async fn list_employees(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<EmployeeFilters>,
) -> AppResult<Json<Vec<Employee>>> {
    authorize(&cookies, &state, "attendance:read").await?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM employees WHERE TRUE");
    if !filters.include_inactive.unwrap_or(false) {
        query.push(" AND is_active = true");
    }
    if let Some(search) = non_empty(filters.search.as_deref()) {
        query.push(" AND full_name ILIKE ").push_bind(format!("%{}%", search));
    }
    query.push(" ORDER BY full_name");

    let employees = query.build_query_as::<Employee>().fetch_all(&state.db).await?;
    Ok(Json(employees))
}

pub async fn get_employee(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(employee_id): Path<Uuid>,
) -> AppResult<Json<Employee>> {
    authorize(&cookies, &state, "attendance:read").await?;

    let employee = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
        .bind(employee_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("employee"))?;

    Ok(Json(employee))
}

pub async fn create_employee(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<EmployeeForm>,
) -> AppResult<(StatusCode, Json<Employee>)> {
    authorize(&cookies, &state, "attendance:write").await?;
    form.validate()?;

    let employee = sqlx::query_as::<_, Employee>(
        r#"
        INSERT INTO employees (full_name, phone, position, pay_type, pay_rate, hired_at, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(form.full_name.trim())
    .bind(non_empty(form.phone.as_deref()))
    .bind(non_empty(form.position.as_deref()))
    .bind(form.pay_type.as_str())
    .bind(form.pay_rate.round_dp(2))
    .bind(form.hired_at)
    .bind(form.is_active.unwrap_or(true))
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(employee)))
}

pub async fn update_employee(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(employee_id): Path<Uuid>,
    Json(form): Json<EmployeeForm>,
) -> AppResult<Json<Employee>> {
    authorize(&cookies, &state, "attendance:write").await?;
    form.validate()?;

    let employee = sqlx::query_as::<_, Employee>(
        r#"
        UPDATE employees
        SET full_name = $2, phone = $3, position = $4, pay_type = $5, pay_rate = $6,
            hired_at = $7, is_active = COALESCE($8, is_active), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(employee_id)
    .bind(form.full_name.trim())
    .bind(non_empty(form.phone.as_deref()))
    .bind(non_empty(form.position.as_deref()))
    .bind(form.pay_type.as_str())
    .bind(form.pay_rate.round_dp(2))
    .bind(form.hired_at)
    .bind(form.is_active)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("employee"))?;

    Ok(Json(employee))
}

/// Attendance and payslips keep referring to the employee, so this only deactivates.
pub async fn delete_employee(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(employee_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&cookies, &state, "attendance:write").await?;

    let result = sqlx::query(
        "UPDATE employees SET is_active = false, updated_at = NOW() WHERE id = $1",
    )
    .bind(employee_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("employee"));
    }
    Ok(StatusCode::NO_CONTENT)
}

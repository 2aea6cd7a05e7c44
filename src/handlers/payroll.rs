use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::AppState,
    error::{AppError, AppResult},
    filters::{parse_optional_date, parse_optional_enum, parse_optional_uuid, Pagination},
    middleware::authorize,
    models::{Attendance, Employee, PayType, PayrollStatus, Payslip},
    services::payroll::{compute_pay, net_pay, AttendanceSummary},
};

#[derive(Deserialize)]
pub struct GenerateRequest {
    period_start: NaiveDate,
    period_end: NaiveDate,
    employee_ids: Option<Vec<Uuid>>,
}

#[derive(Serialize)]
pub struct GenerateResult {
    pub generated: Vec<Payslip>,
    /// Employees whose payslip for the period was already paid.
    pub skipped_paid: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct PayrollFilters {
    employee_id: Option<String>,
    status: Option<String>,
    period_from: Option<String>,
    period_to: Option<String>,
}

#[derive(Deserialize)]
pub struct AdjustmentRequest {
    #[serde(default)]
    bonus: Decimal,
    #[serde(default)]
    deductions: Decimal,
}

impl AdjustmentRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.bonus < Decimal::ZERO || self.deductions < Decimal::ZERO {
            return Err(AppError::validation("bonus and deductions cannot be negative"));
        }
        Ok(())
    }
}

pub fn validate_period(start: NaiveDate, end: NaiveDate) -> Result<(), AppError> {
    if end < start {
        return Err(AppError::validation("period_end cannot be before period_start"));
    }
    Ok(())
}

async fn lock_draft(conn: &mut PgConnection, payslip_id: Uuid) -> AppResult<Payslip> {
    let payslip = sqlx::query_as::<_, Payslip>("SELECT * FROM payroll WHERE id = $1 FOR UPDATE")
        .bind(payslip_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("payslip"))?;

    if payslip.status != PayrollStatus::Draft.as_str() {
        return Err(AppError::conflict("payslip has already been paid"));
    }
    Ok(payslip)
}

/// Creates or refreshes draft payslips. Bonus and deductions typed into an
/// existing draft survive the refresh.
pub async fn generate_payroll(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<GenerateRequest>,
) -> AppResult<Json<GenerateResult>> {
    let user = authorize(&cookies, &state, "payroll:write").await?;
    validate_period(req.period_start, req.period_end)?;

    let mut tx = state.db.begin().await?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM employees WHERE is_active = true");
    if let Some(ids) = &req.employee_ids {
        query.push(" AND id = ANY(").push_bind(ids).push(")");
    }
    query.push(" ORDER BY full_name");
    let employees = query.build_query_as::<Employee>().fetch_all(&mut *tx).await?;

    let employee_ids: Vec<Uuid> = employees.iter().map(|e| e.id).collect();

    let records = sqlx::query_as::<_, Attendance>(
        r#"
        SELECT * FROM attendance
        WHERE employee_id = ANY($1) AND work_date BETWEEN $2 AND $3
        "#,
    )
    .bind(&employee_ids)
    .bind(req.period_start)
    .bind(req.period_end)
    .fetch_all(&mut *tx)
    .await?;

    let mut by_employee: HashMap<Uuid, Vec<Attendance>> = HashMap::new();
    for record in records {
        by_employee.entry(record.employee_id).or_default().push(record);
    }

    let existing = sqlx::query_as::<_, Payslip>(
        r#"
        SELECT * FROM payroll
        WHERE employee_id = ANY($1) AND period_start = $2 AND period_end = $3
        FOR UPDATE
        "#,
    )
    .bind(&employee_ids)
    .bind(req.period_start)
    .bind(req.period_end)
    .fetch_all(&mut *tx)
    .await?;
    let existing: HashMap<Uuid, Payslip> =
        existing.into_iter().map(|p| (p.employee_id, p)).collect();

    let mut result = GenerateResult {
        generated: Vec::with_capacity(employees.len()),
        skipped_paid: Vec::new(),
    };

    for employee in &employees {
        let (bonus, deductions) = match existing.get(&employee.id) {
            Some(payslip) if payslip.status == PayrollStatus::Paid.as_str() => {
                result.skipped_paid.push(employee.id);
                continue;
            }
            Some(payslip) => (payslip.bonus, payslip.deductions),
            None => (Decimal::ZERO, Decimal::ZERO),
        };

        let pay_type: PayType = employee.pay_type.parse()?;
        let summary = AttendanceSummary::from_records(
            by_employee.get(&employee.id).map(Vec::as_slice).unwrap_or(&[]),
        );
        let pay = compute_pay(
            &summary,
            pay_type,
            employee.pay_rate,
            bonus,
            deductions,
            state.config.late_penalty,
        );

        let payslip = sqlx::query_as::<_, Payslip>(
            r#"
            INSERT INTO payroll (employee_id, period_start, period_end, days_present, days_late,
                                 hours_worked, base_pay, bonus, deductions, late_penalty, net_pay)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (employee_id, period_start, period_end) DO UPDATE
            SET days_present = EXCLUDED.days_present,
                days_late = EXCLUDED.days_late,
                hours_worked = EXCLUDED.hours_worked,
                base_pay = EXCLUDED.base_pay,
                late_penalty = EXCLUDED.late_penalty,
                net_pay = EXCLUDED.net_pay,
                updated_at = NOW()
            WHERE payroll.status = 'draft'
            RETURNING *
            "#,
        )
        .bind(employee.id)
        .bind(req.period_start)
        .bind(req.period_end)
        .bind(summary.days_present)
        .bind(summary.days_late)
        .bind(summary.hours_worked)
        .bind(pay.base_pay)
        .bind(pay.bonus)
        .bind(pay.deductions)
        .bind(pay.late_penalty)
        .bind(pay.net_pay)
        .fetch_optional(&mut *tx)
        .await?;

        match payslip {
            Some(payslip) => result.generated.push(payslip),
            None => result.skipped_paid.push(employee.id),
        }
    }

    tx.commit().await?;

    log::info!(
        "{} generated {} payslip(s) for {}..{}",
        user.email,
        result.generated.len(),
        req.period_start,
        req.period_end
    );

    Ok(Json(result))
}

pub async fn list_payroll(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<PayrollFilters>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Payslip>>> {
    authorize(&cookies, &state, "payroll:read").await?;

    let employee_id = parse_optional_uuid(filters.employee_id.as_deref(), "employee_id")?;
    let status = parse_optional_enum::<PayrollStatus>(filters.status.as_deref())?;
    let period_from = parse_optional_date(filters.period_from.as_deref(), "period_from")?;
    let period_to = parse_optional_date(filters.period_to.as_deref(), "period_to")?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM payroll WHERE TRUE");
    if let Some(id) = employee_id {
        query.push(" AND employee_id = ").push_bind(id);
    }
    if let Some(status) = status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(date) = period_from {
        query.push(" AND period_start >= ").push_bind(date);
    }
    if let Some(date) = period_to {
        query.push(" AND period_end <= ").push_bind(date);
    }
    query
        .push(" ORDER BY period_start DESC, created_at DESC LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let payslips = query.build_query_as::<Payslip>().fetch_all(&state.db).await?;
    Ok(Json(payslips))
}

pub async fn update_payslip(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(payslip_id): Path<Uuid>,
    Json(req): Json<AdjustmentRequest>,
) -> AppResult<Json<Payslip>> {
    authorize(&cookies, &state, "payroll:write").await?;
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let payslip = lock_draft(&mut tx, payslip_id).await?;

    let bonus = req.bonus.round_dp(2);
    let deductions = req.deductions.round_dp(2);
    let net = net_pay(payslip.base_pay, bonus, deductions, payslip.late_penalty);

    let payslip = sqlx::query_as::<_, Payslip>(
        r#"
        UPDATE payroll
        SET bonus = $2, deductions = $3, net_pay = $4, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(payslip.id)
    .bind(bonus)
    .bind(deductions)
    .bind(net)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(payslip))
}

pub async fn pay_payslip(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(payslip_id): Path<Uuid>,
) -> AppResult<Json<Payslip>> {
    let user = authorize(&cookies, &state, "payroll:write").await?;

    let mut tx = state.db.begin().await?;
    lock_draft(&mut tx, payslip_id).await?;

    let payslip = sqlx::query_as::<_, Payslip>(
        r#"
        UPDATE payroll
        SET status = 'paid', paid_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(payslip_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    log::info!("{} paid payslip {} ({})", user.email, payslip.id, payslip.net_pay);

    Ok(Json(payslip))
}

pub async fn delete_payslip(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(payslip_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&cookies, &state, "payroll:write").await?;

    let mut tx = state.db.begin().await?;
    lock_draft(&mut tx, payslip_id).await?;

    sqlx::query("DELETE FROM payroll WHERE id = $1")
        .bind(payslip_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_period_is_rejected() {
        let start = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 10, 31).unwrap();
        assert!(validate_period(start, end).is_ok());
        assert!(validate_period(start, start).is_ok());
        assert!(matches!(validate_period(end, start), Err(AppError::Validation(_))));
    }

    #[test]
    fn adjustments_default_to_zero() {
        let req: AdjustmentRequest = serde_json::from_str(r#"{"bonus":"100.00"}"#).unwrap();
        assert_eq!(req.deductions, Decimal::ZERO);
        assert!(req.validate().is_ok());

        let req: AdjustmentRequest = serde_json::from_str(r#"{"deductions":"-5"}"#).unwrap();
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }
}

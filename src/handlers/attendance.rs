use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::{AppState, Database},
    error::{AppError, AppResult},
    filters::{non_empty, parse_optional_date, parse_optional_uuid, Pagination},
    middleware::authorize,
    models::{Attendance, AttendanceStatus, Employee},
    services::attendance::{check_in_status, hours_between, work_date},
};

#[derive(Deserialize)]
pub struct ClockRequest {
    employee_id: Uuid,
}

#[derive(Deserialize)]
pub struct ManualRecord {
    employee_id: Uuid,
    work_date: NaiveDate,
    status: AttendanceStatus,
    check_in: Option<DateTime<Utc>>,
    check_out: Option<DateTime<Utc>>,
    notes: Option<String>,
}

#[derive(Deserialize)]
pub struct AttendanceFilters {
    employee_id: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
}

/// Hours credited for a hand-entered record. Absence and leave carry no
/// times; worked days need a check-in, and a check-out that follows it.
pub fn manual_hours(
    status: AttendanceStatus,
    check_in: Option<DateTime<Utc>>,
    check_out: Option<DateTime<Utc>>,
) -> Result<Decimal, AppError> {
    if !status.counts_as_worked() {
        if check_in.is_some() || check_out.is_some() {
            return Err(AppError::validation(format!(
                "{} records cannot carry check-in times",
                status
            )));
        }
        return Ok(Decimal::ZERO);
    }

    match (check_in, check_out) {
        (None, _) => Err(AppError::validation(format!("{} records need a check_in", status))),
        (Some(_), None) => Ok(Decimal::ZERO),
        (Some(start), Some(end)) if end < start => {
            Err(AppError::validation("check_out cannot be before check_in"))
        }
        (Some(start), Some(end)) => Ok(hours_between(start, end)),
    }
}

async fn active_employee(db: &Database, employee_id: Uuid) -> AppResult<Employee> {
    let employee = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
        .bind(employee_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("employee"))?;

    if !employee.is_active {
        return Err(AppError::validation(format!(
            "{} is no longer active",
            employee.full_name
        )));
    }
    Ok(employee)
}

pub async fn check_in(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<ClockRequest>,
) -> AppResult<(StatusCode, Json<Attendance>)> {
    authorize(&cookies, &state, "attendance:write").await?;
    let employee = active_employee(&state.db, req.employee_id).await?;

    let config = &state.config;
    let now = Utc::now();
    let today = work_date(now, config.business_offset);
    let status = check_in_status(
        now,
        config.business_offset,
        config.shift_start,
        config.late_grace_minutes,
    );

    let record = sqlx::query_as::<_, Attendance>(
        r#"
        INSERT INTO attendance (employee_id, work_date, check_in, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (employee_id, work_date) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(employee.id)
    .bind(today)
    .bind(now)
    .bind(status.as_str())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| {
        AppError::conflict(format!(
            "{} already has an attendance record for {}",
            employee.full_name, today
        ))
    })?;

    if status == AttendanceStatus::Late {
        log::info!("{} checked in late on {}", employee.full_name, today);
    }

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn check_out(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<ClockRequest>,
) -> AppResult<Json<Attendance>> {
    authorize(&cookies, &state, "attendance:write").await?;

    let mut tx = state.db.begin().await?;

    // The latest open shift, which may have started the previous day.
    let open = sqlx::query_as::<_, Attendance>(
        r#"
        SELECT * FROM attendance
        WHERE employee_id = $1 AND check_in IS NOT NULL AND check_out IS NULL
        ORDER BY work_date DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(req.employee_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::conflict("no open check-in for this employee"))?;

    let now = Utc::now();
    let hours = open
        .check_in
        .map(|start| hours_between(start, now))
        .unwrap_or(Decimal::ZERO);

    let record = sqlx::query_as::<_, Attendance>(
        r#"
        UPDATE attendance
        SET check_out = $2, hours_worked = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(open.id)
    .bind(now)
    .bind(hours)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(record))
}

/// Creates or overwrites the record for one employee and day.
pub async fn record_attendance(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<ManualRecord>,
) -> AppResult<Json<Attendance>> {
    let user = authorize(&cookies, &state, "attendance:write").await?;
    let employee = active_employee(&state.db, req.employee_id).await?;
    let hours = manual_hours(req.status, req.check_in, req.check_out)?;

    let record = sqlx::query_as::<_, Attendance>(
        r#"
        INSERT INTO attendance (employee_id, work_date, check_in, check_out, status, hours_worked, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (employee_id, work_date) DO UPDATE
        SET check_in = EXCLUDED.check_in,
            check_out = EXCLUDED.check_out,
            status = EXCLUDED.status,
            hours_worked = EXCLUDED.hours_worked,
            notes = EXCLUDED.notes,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(employee.id)
    .bind(req.work_date)
    .bind(req.check_in)
    .bind(req.check_out)
    .bind(req.status.as_str())
    .bind(hours)
    .bind(non_empty(req.notes.as_deref()))
    .fetch_one(&state.db)
    .await?;

    log::info!(
        "{} recorded {} for {} on {}",
        user.email,
        req.status,
        employee.full_name,
        req.work_date
    );

    Ok(Json(record))
}

pub async fn list_attendance(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<AttendanceFilters>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Attendance>>> {
    authorize(&cookies, &state, "attendance:read").await?;

    let employee_id = parse_optional_uuid(filters.employee_id.as_deref(), "employee_id")?;
    let date_from = parse_optional_date(filters.date_from.as_deref(), "date_from")?;
    let date_to = parse_optional_date(filters.date_to.as_deref(), "date_to")?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM attendance WHERE TRUE");
    if let Some(id) = employee_id {
        query.push(" AND employee_id = ").push_bind(id);
    }
    if let Some(date) = date_from {
        query.push(" AND work_date >= ").push_bind(date);
    }
    if let Some(date) = date_to {
        query.push(" AND work_date <= ").push_bind(date);
    }
    query
        .push(" ORDER BY work_date DESC, check_in DESC LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let records = query.build_query_as::<Attendance>().fetch_all(&state.db).await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn at(hour: u32, minute: u32) -> Option<DateTime<Utc>> {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .map(|t| t.and_utc())
    }

    #[test]
    fn worked_days_get_hours_from_their_times() {
        assert_eq!(
            manual_hours(AttendanceStatus::Late, at(9, 30), at(17, 0)).unwrap(),
            Decimal::from_str("7.5").unwrap()
        );
        assert_eq!(
            manual_hours(AttendanceStatus::Present, at(9, 0), None).unwrap(),
            Decimal::ZERO
        );
    }

    #[rstest]
    #[case(AttendanceStatus::Absent, at(9, 0), None)]
    #[case(AttendanceStatus::Leave, None, at(17, 0))]
    #[case(AttendanceStatus::Present, None, None)]
    #[case(AttendanceStatus::Present, at(17, 0), at(9, 0))]
    fn inconsistent_records_are_rejected(
        #[case] status: AttendanceStatus,
        #[case] check_in: Option<DateTime<Utc>>,
        #[case] check_out: Option<DateTime<Utc>>,
    ) {
        assert!(matches!(
            manual_hours(status, check_in, check_out),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn absence_carries_no_hours() {
        assert_eq!(
            manual_hours(AttendanceStatus::Leave, None, None).unwrap(),
            Decimal::ZERO
        );
    }
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use sqlx::{postgres::PgExecutor, Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::AppState,
    error::{AppError, AppResult},
    filters::{non_empty, parse_optional_enum, Pagination},
    middleware::authorize,
    models::{Customer, CustomerType},
};

#[derive(Deserialize)]
pub struct CustomerFilters {
    search: Option<String>,
    customer_type: Option<String>,
}

#[derive(Deserialize)]
pub struct CustomerForm {
    name: String,
    phone: Option<String>,
    email: Option<String>,
    customer_type: Option<CustomerType>,
    address: Option<String>,
    notes: Option<String>,
}

pub(crate) async fn fetch_customer<'c, E>(executor: E, customer_id: Uuid) -> AppResult<Customer>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
        .bind(customer_id)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("customer"))
}

pub async fn list_customers(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<CustomerFilters>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Customer>>> {
    authorize(&cookies, &state, "customers:read").await?;

    let customer_type = parse_optional_enum::<CustomerType>(filters.customer_type.as_deref())?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM customers WHERE TRUE");
    if let Some(search) = non_empty(filters.search.as_deref()) {
        let pattern = format!("%{}%", search);
        query
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR phone ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(customer_type) = customer_type {
        query.push(" AND customer_type = ").push_bind(customer_type.as_str());
    }
    query
        .push(" ORDER BY name LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let customers = query.build_query_as::<Customer>().fetch_all(&state.db).await?;
    Ok(Json(customers))
}

pub async fn get_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
) -> AppResult<Json<Customer>> {
    authorize(&cookies, &state, "customers:read").await?;

    Ok(Json(fetch_customer(&state.db, customer_id).await?))
}

pub async fn create_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<CustomerForm>,
) -> AppResult<(StatusCode, Json<Customer>)> {
    authorize(&cookies, &state, "customers:write").await?;
    if form.name.trim().is_empty() {
        return Err(AppError::validation("customer name is required"));
    }

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (name, phone, email, customer_type, address, notes)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(form.name.trim())
    .bind(non_empty(form.phone.as_deref()))
    .bind(non_empty(form.email.as_deref()))
    .bind(form.customer_type.unwrap_or(CustomerType::Retail).as_str())
    .bind(non_empty(form.address.as_deref()))
    .bind(non_empty(form.notes.as_deref()))
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn update_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
    Json(form): Json<CustomerForm>,
) -> AppResult<Json<Customer>> {
    authorize(&cookies, &state, "customers:write").await?;
    if form.name.trim().is_empty() {
        return Err(AppError::validation("customer name is required"));
    }

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        UPDATE customers
        SET name = $2, phone = $3, email = $4,
            customer_type = COALESCE($5, customer_type),
            address = $6, notes = $7, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(customer_id)
    .bind(form.name.trim())
    .bind(non_empty(form.phone.as_deref()))
    .bind(non_empty(form.email.as_deref()))
    .bind(form.customer_type.map(|t| t.as_str()))
    .bind(non_empty(form.address.as_deref()))
    .bind(non_empty(form.notes.as_deref()))
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("customer"))?;

    Ok(Json(customer))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(customer_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&cookies, &state, "customers:write").await?;

    let order_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE customer_id = $1")
            .bind(customer_id)
            .fetch_one(&state.db)
            .await?;
    if order_count > 0 {
        return Err(AppError::conflict(format!(
            "customer has {} order(s) and cannot be deleted",
            order_count
        )));
    }

    let result = sqlx::query("DELETE FROM customers WHERE id = $1")
        .bind(customer_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("customer"));
    }
    Ok(StatusCode::NO_CONTENT)
}

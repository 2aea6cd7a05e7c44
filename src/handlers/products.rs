use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::AppState,
    error::{AppError, AppResult},
    filters::non_empty,
    middleware::authorize,
    models::Product,
    services::pricing::MAX_AMOUNT,
};

#[derive(Deserialize)]
pub struct ProductFilters {
    search: Option<String>,
    category: Option<String>,
    include_inactive: Option<bool>,
}

#[derive(Deserialize)]
pub struct ProductForm {
    sku: String,
    name: String,
    category: Option<String>,
    unit_price: Decimal,
    wholesale_price: Option<Decimal>,
    #[serde(default)]
    cost_price: Decimal,
    #[serde(default)]
    reorder_point: i32,
    is_active: Option<bool>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct LocationStock {
    pub location: String,
    pub available: i64,
}

#[derive(Debug, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub stock: Vec<LocationStock>,
    pub available_total: i64,
}

impl ProductForm {
    fn validate(&self) -> Result<(), AppError> {
        if self.sku.trim().is_empty() || self.name.trim().is_empty() {
            return Err(AppError::validation("sku and name are required"));
        }
        if self.unit_price < Decimal::ZERO
            || self.cost_price < Decimal::ZERO
            || self.wholesale_price.is_some_and(|p| p < Decimal::ZERO)
        {
            return Err(AppError::validation("prices cannot be negative"));
        }
        if self.unit_price > MAX_AMOUNT
            || self.cost_price > MAX_AMOUNT
            || self.wholesale_price.is_some_and(|p| p > MAX_AMOUNT)
        {
            return Err(AppError::validation("price is too large"));
        }
        if self.reorder_point < 0 {
            return Err(AppError::validation("reorder_point cannot be negative"));
        }
        Ok(())
    }
}

pub async fn list_products(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<ProductFilters>,
) -> AppResult<Json<Vec<Product>>> {
    authorize(&cookies, &state, "products:read").await?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM products WHERE TRUE");
    if !filters.include_inactive.unwrap_or(false) {
        query.push(" AND is_active = true");
    }
    if let Some(search) = non_empty(filters.search.as_deref()) {
        let pattern = format!("%{}%", search);
        query
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR sku ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category) = non_empty(filters.category.as_deref()) {
        query.push(" AND category = ").push_bind(category);
    }
    query.push(" ORDER BY name");

    let products = query.build_query_as::<Product>().fetch_all(&state.db).await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ProductDetail>> {
    authorize(&cookies, &state, "products:read").await?;

    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("product"))?;

    let stock = sqlx::query_as::<_, LocationStock>(
        r#"
        SELECT location, COUNT(*) AS available
        FROM inventory_items
        WHERE product_id = $1 AND status = 'available'
        GROUP BY location
        ORDER BY location
        "#,
    )
    .bind(product_id)
    .fetch_all(&state.db)
    .await?;

    let available_total = stock.iter().map(|s| s.available).sum();

    Ok(Json(ProductDetail {
        product,
        stock,
        available_total,
    }))
}

pub async fn create_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<ProductForm>,
) -> AppResult<(StatusCode, Json<Product>)> {
    authorize(&cookies, &state, "products:write").await?;
    form.validate()?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (sku, name, category, unit_price, wholesale_price, cost_price, reorder_point, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(form.sku.trim())
    .bind(form.name.trim())
    .bind(non_empty(form.category.as_deref()))
    .bind(form.unit_price.round_dp(2))
    .bind(form.wholesale_price.map(|p| p.round_dp(2)))
    .bind(form.cost_price.round_dp(2))
    .bind(form.reorder_point)
    .bind(form.is_active.unwrap_or(true))
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
    Json(form): Json<ProductForm>,
) -> AppResult<Json<Product>> {
    authorize(&cookies, &state, "products:write").await?;
    form.validate()?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products
        SET sku = $2, name = $3, category = $4, unit_price = $5, wholesale_price = $6,
            cost_price = $7, reorder_point = $8, is_active = COALESCE($9, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(product_id)
    .bind(form.sku.trim())
    .bind(form.name.trim())
    .bind(non_empty(form.category.as_deref()))
    .bind(form.unit_price.round_dp(2))
    .bind(form.wholesale_price.map(|p| p.round_dp(2)))
    .bind(form.cost_price.round_dp(2))
    .bind(form.reorder_point)
    .bind(form.is_active)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("product"))?;

    Ok(Json(product))
}

/// Products are never removed; units and order lines keep pointing at them.
pub async fn delete_product(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(product_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    authorize(&cookies, &state, "products:write").await?;

    let result = sqlx::query(
        "UPDATE products SET is_active = false, updated_at = NOW() WHERE id = $1",
    )
    .bind(product_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("product"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn form() -> ProductForm {
        ProductForm {
            sku: "CUP-12OZ".into(),
            name: "Paper cup 12oz".into(),
            category: Some("packaging".into()),
            unit_price: Decimal::new(150, 2),
            wholesale_price: Some(Decimal::new(100, 2)),
            cost_price: Decimal::new(60, 2),
            reorder_point: 100,
            is_active: None,
        }
    }

    #[test]
    fn well_formed_product_passes() {
        assert!(form().validate().is_ok());
    }

    #[rstest]
    #[case::blank_sku(ProductForm { sku: "  ".into(), ..form() })]
    #[case::negative_price(ProductForm { unit_price: Decimal::new(-1, 0), ..form() })]
    #[case::negative_wholesale(ProductForm { wholesale_price: Some(Decimal::new(-1, 0)), ..form() })]
    #[case::price_too_large(ProductForm { unit_price: Decimal::MAX, ..form() })]
    #[case::negative_reorder(ProductForm { reorder_point: -5, ..form() })]
    fn invalid_products_are_rejected(#[case] form: ProductForm) {
        assert!(matches!(form.validate(), Err(AppError::Validation(_))));
    }
}

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::{AppState, Database},
    error::{AppError, AppResult},
    filters::{parse_optional_enum, parse_optional_uuid, Pagination},
    middleware::authorize,
    models::{InventoryItem, InventoryItemView, InventoryStatus, Location, Product},
};

pub const MAX_RECEIVE_QUANTITY: i32 = 1000;

pub(crate) const ITEM_VIEW_SELECT: &str = r#"
    SELECT i.id, i.barcode, i.product_id, p.name AS product_name, p.sku,
           i.location, i.status, i.cost_price, i.order_id, i.delivery_id,
           i.received_at, i.sold_at
    FROM inventory_items i
    JOIN products p ON p.id = i.product_id
"#;

#[derive(Deserialize)]
pub struct InventoryFilters {
    product_id: Option<String>,
    location: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
pub struct ReceiveRequest {
    product_id: Uuid,
    location: Location,
    cost_price: Option<Decimal>,
    barcodes: Option<Vec<String>>,
    quantity: Option<i32>,
}

#[derive(Deserialize)]
pub struct StatusChange {
    status: InventoryStatus,
}

#[derive(Deserialize)]
pub struct TransferRequest {
    barcodes: Vec<String>,
    to_location: Location,
}

#[derive(Debug, Serialize, FromRow)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub sku: String,
    pub product_name: String,
    pub location: String,
    pub available: i64,
    pub sold: i64,
    pub damaged: i64,
    pub returned: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct LowStockProduct {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub reorder_point: i32,
    pub available: i64,
}

#[derive(Debug, Serialize)]
pub struct InventorySummary {
    pub levels: Vec<StockLevel>,
    pub low_stock: Vec<LowStockProduct>,
}

/// Trims the scanned barcodes and rejects an empty list, blank entries and
/// repeats. Order is preserved.
pub fn clean_barcodes(raw: Vec<String>) -> Result<Vec<String>, AppError> {
    if raw.is_empty() {
        return Err(AppError::validation("at least one barcode is required"));
    }

    let mut seen = HashSet::with_capacity(raw.len());
    let mut cleaned = Vec::with_capacity(raw.len());
    for barcode in raw {
        let barcode = barcode.trim().to_string();
        if barcode.is_empty() {
            return Err(AppError::validation("barcodes cannot be blank"));
        }
        if !seen.insert(barcode.clone()) {
            return Err(AppError::validation(format!("barcode {} is listed twice", barcode)));
        }
        cleaned.push(barcode);
    }
    Ok(cleaned)
}

/// `<SKU>-<10 hex>` barcode for a unit received without one.
pub fn generate_barcode(sku: &str) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(10).collect();
    format!("{}-{}", sku, suffix.to_uppercase())
}

/// Barcodes for a receipt: the scanned ones, or `quantity` generated ones.
pub fn barcodes_to_receive(
    sku: &str,
    barcodes: Option<Vec<String>>,
    quantity: Option<i32>,
) -> Result<Vec<String>, AppError> {
    match (barcodes, quantity) {
        (Some(_), Some(_)) => Err(AppError::validation(
            "send either barcodes or a quantity, not both",
        )),
        (Some(barcodes), None) => clean_barcodes(barcodes),
        (None, Some(quantity)) if (1..=MAX_RECEIVE_QUANTITY).contains(&quantity) => {
            Ok((0..quantity).map(|_| generate_barcode(sku)).collect())
        }
        (None, Some(_)) => Err(AppError::validation(format!(
            "quantity must be between 1 and {}",
            MAX_RECEIVE_QUANTITY
        ))),
        (None, None) => Err(AppError::validation("barcodes or a quantity is required")),
    }
}

/// Barcodes that block a transfer: unknown, not available, or already there.
pub fn transfer_blockers(
    requested: &[String],
    units: &[InventoryItem],
    to: Location,
) -> Vec<String> {
    requested
        .iter()
        .filter(|barcode| {
            match units.iter().find(|u| &u.barcode == *barcode) {
                None => true,
                Some(unit) => {
                    unit.status != InventoryStatus::Available.as_str()
                        || unit.location == to.as_str()
                }
            }
        })
        .cloned()
        .collect()
}

pub async fn receive_stock(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<ReceiveRequest>,
) -> AppResult<(StatusCode, Json<Vec<InventoryItem>>)> {
    let user = authorize(&cookies, &state, "inventory:write").await?;

    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(req.product_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("product"))?;
    if !product.is_active {
        return Err(AppError::validation(format!("product {} is inactive", product.sku)));
    }

    let cost_price = req.cost_price.unwrap_or(product.cost_price).round_dp(2);
    if cost_price < Decimal::ZERO {
        return Err(AppError::validation("cost_price cannot be negative"));
    }

    let barcodes = barcodes_to_receive(&product.sku, req.barcodes, req.quantity)?;

    let mut tx = state.db.begin().await?;

    let taken = sqlx::query_scalar::<_, String>(
        "SELECT barcode FROM inventory_items WHERE barcode = ANY($1) ORDER BY barcode",
    )
    .bind(&barcodes)
    .fetch_all(&mut *tx)
    .await?;
    if !taken.is_empty() {
        return Err(AppError::conflict(format!(
            "barcodes already in stock: {}",
            taken.join(", ")
        )));
    }

    let items = sqlx::query_as::<_, InventoryItem>(
        r#"
        INSERT INTO inventory_items (barcode, product_id, location, cost_price)
        SELECT code, $2, $3, $4 FROM UNNEST($1::text[]) AS code
        RETURNING *
        "#,
    )
    .bind(&barcodes)
    .bind(product.id)
    .bind(req.location.as_str())
    .bind(cost_price)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    log::info!(
        "{} received {} unit(s) of {} into {}",
        user.email,
        items.len(),
        product.sku,
        req.location
    );

    Ok((StatusCode::CREATED, Json(items)))
}

pub async fn list_inventory(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<InventoryFilters>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<InventoryItemView>>> {
    authorize(&cookies, &state, "inventory:read").await?;

    let product_id = parse_optional_uuid(filters.product_id.as_deref(), "product_id")?;
    let location = parse_optional_enum::<Location>(filters.location.as_deref())?;
    let status = parse_optional_enum::<InventoryStatus>(filters.status.as_deref())?;

    let mut query = QueryBuilder::<Postgres>::new(ITEM_VIEW_SELECT);
    query.push(" WHERE TRUE");
    if let Some(id) = product_id {
        query.push(" AND i.product_id = ").push_bind(id);
    }
    if let Some(location) = location {
        query.push(" AND i.location = ").push_bind(location.as_str());
    }
    if let Some(status) = status {
        query.push(" AND i.status = ").push_bind(status.as_str());
    }
    query
        .push(" ORDER BY i.received_at DESC, i.barcode LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let items = query
        .build_query_as::<InventoryItemView>()
        .fetch_all(&state.db)
        .await?;

    Ok(Json(items))
}

pub async fn lookup_barcode(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(barcode): Path<String>,
) -> AppResult<Json<InventoryItemView>> {
    authorize(&cookies, &state, "inventory:read").await?;

    let item = sqlx::query_as::<_, InventoryItemView>(&format!("{} WHERE i.barcode = $1", ITEM_VIEW_SELECT))
        .bind(barcode.trim())
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("inventory item"))?;

    Ok(Json(item))
}

pub async fn change_status(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(barcode): Path<String>,
    Json(change): Json<StatusChange>,
) -> AppResult<Json<InventoryItem>> {
    let user = authorize(&cookies, &state, "inventory:write").await?;
    let next = change.status;

    if next == InventoryStatus::Sold {
        return Err(AppError::validation(
            "units are sold through sales and deliveries",
        ));
    }

    let mut tx = state.db.begin().await?;

    let item = sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_items WHERE barcode = $1 FOR UPDATE",
    )
    .bind(barcode.trim())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("inventory item"))?;

    let current = item.status()?;
    if !current.can_transition_to(next) {
        log::warn!(
            "{} tried to move unit {} from {} to {}",
            user.email,
            item.barcode,
            current,
            next
        );
        return Err(AppError::conflict(format!(
            "unit {} is {} and cannot become {}",
            item.barcode, current, next
        )));
    }

    let updated = sqlx::query_as::<_, InventoryItem>(
        r#"
        UPDATE inventory_items
        SET status = $2,
            order_id = CASE WHEN $3 THEN order_id END,
            delivery_id = CASE WHEN $3 THEN delivery_id END,
            sold_at = CASE WHEN $3 THEN sold_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item.id)
    .bind(next.as_str())
    .bind(next.keeps_order_link())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(updated))
}

pub async fn transfer_stock(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<TransferRequest>,
) -> AppResult<Json<Value>> {
    let user = authorize(&cookies, &state, "inventory:write").await?;
    let barcodes = clean_barcodes(req.barcodes)?;

    let mut tx = state.db.begin().await?;

    let units = sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_items WHERE barcode = ANY($1) FOR UPDATE",
    )
    .bind(&barcodes)
    .fetch_all(&mut *tx)
    .await?;

    let blockers = transfer_blockers(&barcodes, &units, req.to_location);
    if !blockers.is_empty() {
        return Err(AppError::conflict(format!(
            "cannot transfer to {}: {}",
            req.to_location,
            blockers.join(", ")
        )));
    }

    let moved = sqlx::query(
        "UPDATE inventory_items SET location = $2, updated_at = NOW() WHERE barcode = ANY($1)",
    )
    .bind(&barcodes)
    .bind(req.to_location.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    log::info!("{} moved {} unit(s) to {}", user.email, moved, req.to_location);

    Ok(Json(json!({ "moved": moved, "to_location": req.to_location })))
}

pub async fn inventory_summary(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<InventorySummary>> {
    authorize(&cookies, &state, "inventory:read").await?;

    let levels = sqlx::query_as::<_, StockLevel>(
        r#"
        SELECT p.id AS product_id, p.sku, p.name AS product_name, i.location,
               COUNT(*) FILTER (WHERE i.status = 'available') AS available,
               COUNT(*) FILTER (WHERE i.status = 'sold') AS sold,
               COUNT(*) FILTER (WHERE i.status = 'damaged') AS damaged,
               COUNT(*) FILTER (WHERE i.status = 'returned') AS returned
        FROM inventory_items i
        JOIN products p ON p.id = i.product_id
        GROUP BY p.id, p.sku, p.name, i.location
        ORDER BY p.name, i.location
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let low_stock = fetch_low_stock(&state.db).await?;

    Ok(Json(InventorySummary { levels, low_stock }))
}

/// Active products whose available units, across both locations, are below
/// their reorder point.
pub async fn fetch_low_stock(db: &Database) -> AppResult<Vec<LowStockProduct>> {
    let products = sqlx::query_as::<_, LowStockProduct>(
        r#"
        SELECT p.id, p.sku, p.name, p.reorder_point, COUNT(i.id) AS available
        FROM products p
        LEFT JOIN inventory_items i ON i.product_id = p.id AND i.status = 'available'
        WHERE p.is_active = true
        GROUP BY p.id, p.sku, p.name, p.reorder_point
        HAVING COUNT(i.id) < p.reorder_point
        ORDER BY p.name
        "#,
    )
    .fetch_all(db)
    .await?;

    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    fn unit(barcode: &str, location: Location, status: InventoryStatus) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            barcode: barcode.into(),
            product_id: Uuid::new_v4(),
            location: location.as_str().into(),
            status: status.as_str().into(),
            cost_price: Decimal::new(900, 2),
            order_id: None,
            delivery_id: None,
            received_at: Utc::now(),
            sold_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn barcodes_are_trimmed_and_deduplicated() {
        let cleaned = clean_barcodes(vec![" A1 ".into(), "B2".into()]).unwrap();
        assert_eq!(cleaned, vec!["A1".to_string(), "B2".to_string()]);

        assert!(clean_barcodes(Vec::new()).is_err());
        assert!(clean_barcodes(vec!["A1".into(), " ".into()]).is_err());
        assert!(clean_barcodes(vec!["A1".into(), "A1 ".into()]).is_err());
    }

    #[test]
    fn generated_barcodes_carry_the_sku() {
        let barcodes = barcodes_to_receive("BEAN-1KG", None, Some(3)).unwrap();
        assert_eq!(barcodes.len(), 3);
        for barcode in &barcodes {
            assert!(barcode.starts_with("BEAN-1KG-"));
            assert_eq!(barcode.len(), "BEAN-1KG-".len() + 10);
        }
        assert_eq!(barcodes.iter().collect::<HashSet<_>>().len(), 3);
    }

    #[rstest]
    #[case(Some(vec!["A1".to_string()]), Some(2))]
    #[case(None, None)]
    #[case(None, Some(0))]
    #[case(None, Some(MAX_RECEIVE_QUANTITY + 1))]
    fn receipt_shape_is_validated(#[case] barcodes: Option<Vec<String>>, #[case] quantity: Option<i32>) {
        assert!(matches!(
            barcodes_to_receive("SKU", barcodes, quantity),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn transfer_blocks_unknown_unavailable_and_same_location_units() {
        let units = vec![
            unit("OK", Location::Store, InventoryStatus::Available),
            unit("SOLD", Location::Store, InventoryStatus::Sold),
            unit("THERE", Location::Warehouse, InventoryStatus::Available),
        ];
        let requested: Vec<String> = ["OK", "SOLD", "THERE", "GHOST"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let blockers = transfer_blockers(&requested, &units, Location::Warehouse);
        assert_eq!(blockers, vec!["SOLD", "THERE", "GHOST"]);

        assert!(transfer_blockers(&requested[..1], &units, Location::Warehouse).is_empty());
    }
}

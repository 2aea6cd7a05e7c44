use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::{AppState, Database},
    error::{AppError, AppResult},
    filters::{non_empty, Pagination},
    handlers::{
        customers::fetch_customer,
        inventory::clean_barcodes,
        orders::{
            fetch_order_items, insert_items, lock_order, order_message, query_orders, OrderDetail,
            OrderFilters, PricedLine,
        },
    },
    middleware::authorize,
    models::{Channel, InventoryItem, InventoryStatus, Location, Order, OrderItemView, OrderStatus, Product},
    services::pricing::{generate_number, OrderTotals},
    utils::{click_to_chat_url, with_retry},
};

#[derive(Debug, Clone, Deserialize)]
pub struct SaleRequest {
    pub location: Location,
    pub barcodes: Vec<String>,
    pub payment_method: String,
    pub customer_id: Option<Uuid>,
    pub discount: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReturnRequest {
    pub barcodes: Vec<String>,
    #[serde(default)]
    pub restock: bool,
}

#[derive(Debug, Serialize)]
pub struct ReturnReceipt {
    pub order: Order,
    pub returned_units: usize,
    pub refund: Decimal,
    pub restocked: bool,
}

/// Scanned barcodes that cannot be sold from `location`.
pub fn sale_blockers(requested: &[String], units: &[InventoryItem], location: Location) -> Vec<String> {
    requested
        .iter()
        .filter(|barcode| match units.iter().find(|u| &u.barcode == *barcode) {
            None => true,
            Some(unit) => {
                unit.status != InventoryStatus::Available.as_str() || unit.location != location.as_str()
            }
        })
        .cloned()
        .collect()
}

/// Barcodes that are not currently `sold` on `order_id`.
pub fn return_blockers(requested: &[String], units: &[InventoryItem], order_id: Uuid) -> Vec<String> {
    requested
        .iter()
        .filter(|barcode| match units.iter().find(|u| &u.barcode == *barcode) {
            None => true,
            Some(unit) => {
                unit.status != InventoryStatus::Sold.as_str() || unit.order_id != Some(order_id)
            }
        })
        .cloned()
        .collect()
}

/// One line per product, in the order the products were first scanned,
/// priced at the retail price.
pub fn group_units(units_in_scan_order: &[&InventoryItem], products: &[Product]) -> Result<Vec<PricedLine>, AppError> {
    let mut lines: Vec<PricedLine> = Vec::new();
    for unit in units_in_scan_order {
        match lines.iter_mut().find(|l| l.product_id == unit.product_id) {
            Some(line) => line.quantity += 1,
            None => {
                let product = products
                    .iter()
                    .find(|p| p.id == unit.product_id)
                    .ok_or(AppError::NotFound("product"))?;
                lines.push(PricedLine {
                    product_id: product.id,
                    quantity: 1,
                    unit_price: product.price_for(Channel::Retail),
                });
            }
        }
    }
    Ok(lines)
}

/// What the customer gets back for the returned units: each at the price
/// its product was sold for on the order.
pub fn refund_for(units: &[&InventoryItem], items: &[OrderItemView]) -> Decimal {
    units
        .iter()
        .filter_map(|unit| items.iter().find(|i| i.product_id == unit.product_id))
        .map(|item| item.unit_price)
        .sum::<Decimal>()
        .round_dp(2)
}

async fn sale_tx(
    db: &Database,
    req: &SaleRequest,
    barcodes: &[String],
    user_id: Uuid,
) -> AppResult<OrderDetail> {
    let mut tx = db.begin().await?;

    let units = sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_items WHERE barcode = ANY($1) FOR UPDATE",
    )
    .bind(barcodes)
    .fetch_all(&mut *tx)
    .await?;

    let blockers = sale_blockers(barcodes, &units, req.location);
    if !blockers.is_empty() {
        return Err(AppError::conflict(format!(
            "not available at the {}: {}",
            req.location,
            blockers.join(", ")
        )));
    }

    let scanned: Vec<&InventoryItem> = barcodes
        .iter()
        .filter_map(|b| units.iter().find(|u| &u.barcode == b))
        .collect();
    let product_ids: Vec<Uuid> = scanned.iter().map(|u| u.product_id).collect();
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1)")
        .bind(&product_ids)
        .fetch_all(&mut *tx)
        .await?;

    let lines = group_units(&scanned, &products)?;
    let totals = OrderTotals::compute(
        lines.iter().map(|l| (l.quantity, l.unit_price)),
        req.discount.unwrap_or(Decimal::ZERO),
        Decimal::ZERO,
    )?;

    let customer = match req.customer_id {
        Some(id) => Some(fetch_customer(&mut *tx, id).await?),
        None => None,
    };

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (order_number, channel, status, customer_id, customer_name,
                            customer_phone, location, payment_method, subtotal, discount,
                            shipping_fee, total, notes, created_by)
        VALUES ($1, 'retail', 'completed', $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(generate_number(Channel::Retail.number_prefix(), Utc::now()))
    .bind(req.customer_id)
    .bind(customer.as_ref().map(|c| c.name.clone()))
    .bind(customer.as_ref().and_then(|c| c.phone.clone()))
    .bind(req.location.as_str())
    .bind(req.payment_method.trim())
    .bind(totals.subtotal)
    .bind(totals.discount)
    .bind(totals.total)
    .bind(non_empty(req.notes.as_deref()))
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    insert_items(&mut tx, order.id, &lines).await?;

    let unit_ids: Vec<Uuid> = scanned.iter().map(|u| u.id).collect();
    let sold = sqlx::query(
        r#"
        UPDATE inventory_items
        SET status = 'sold', order_id = $2, sold_at = NOW(), updated_at = NOW()
        WHERE id = ANY($1) AND status = 'available'
        "#,
    )
    .bind(&unit_ids)
    .bind(order.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if sold < unit_ids.len() as u64 {
        return Err(AppError::ConcurrentUpdate);
    }

    let items = fetch_order_items(&mut *tx, order.id).await?;

    tx.commit().await?;

    let whatsapp_url = order
        .customer_phone
        .as_deref()
        .and_then(|phone| click_to_chat_url(phone, &order_message(&order)));

    Ok(OrderDetail {
        order,
        items,
        delivery: None,
        whatsapp_url,
    })
}

pub async fn create_sale(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<SaleRequest>,
) -> AppResult<(StatusCode, Json<OrderDetail>)> {
    let user = authorize(&cookies, &state, "sales:write").await?;
    let user_id = user.id;

    if req.payment_method.trim().is_empty() {
        return Err(AppError::validation("payment_method is required"));
    }
    let barcodes = clean_barcodes(req.barcodes.clone())?;

    let db = state.db.clone();
    let detail = with_retry(&state.config.retry, "retail sale", || {
        let db = db.clone();
        let req = req.clone();
        let barcodes = barcodes.clone();
        async move { sale_tx(&db, &req, &barcodes, user_id).await }
    })
    .await?;

    log::info!(
        "{} sold {} unit(s) on {} for {}",
        user.email,
        barcodes.len(),
        detail.order.order_number,
        detail.order.total
    );

    Ok((StatusCode::CREATED, Json(detail)))
}

async fn return_tx(
    db: &Database,
    order_id: Uuid,
    barcodes: &[String],
    restock: bool,
) -> AppResult<ReturnReceipt> {
    let mut tx = db.begin().await?;

    let order = lock_order(&mut tx, order_id).await?;
    if order.status()? != OrderStatus::Completed {
        return Err(AppError::conflict(format!(
            "order {} is {}; only completed orders take returns",
            order.order_number, order.status
        )));
    }

    let units = sqlx::query_as::<_, InventoryItem>(
        "SELECT * FROM inventory_items WHERE barcode = ANY($1) FOR UPDATE",
    )
    .bind(barcodes)
    .fetch_all(&mut *tx)
    .await?;

    let blockers = return_blockers(barcodes, &units, order_id);
    if !blockers.is_empty() {
        return Err(AppError::conflict(format!(
            "not sold on order {}: {}",
            order.order_number,
            blockers.join(", ")
        )));
    }

    let returned: Vec<&InventoryItem> = units.iter().collect();
    let items = fetch_order_items(&mut *tx, order_id).await?;
    let refund = refund_for(&returned, &items);

    let unit_ids: Vec<Uuid> = returned.iter().map(|u| u.id).collect();
    sqlx::query(
        "UPDATE inventory_items SET status = 'returned', updated_at = NOW() WHERE id = ANY($1)",
    )
    .bind(&unit_ids)
    .execute(&mut *tx)
    .await?;

    if restock {
        sqlx::query(
            r#"
            UPDATE inventory_items
            SET status = 'available', order_id = NULL, delivery_id = NULL, sold_at = NULL, updated_at = NOW()
            WHERE id = ANY($1) AND status = 'returned'
            "#,
        )
        .bind(&unit_ids)
        .execute(&mut *tx)
        .await?;
    }

    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET returned_amount = LEAST(total, returned_amount + $2), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(refund)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ReturnReceipt {
        order,
        returned_units: unit_ids.len(),
        refund,
        restocked: restock,
    })
}

pub async fn create_return(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReturnRequest>,
) -> AppResult<Json<ReturnReceipt>> {
    let user = authorize(&cookies, &state, "sales:write").await?;
    let barcodes = clean_barcodes(req.barcodes)?;
    let restock = req.restock;

    let db = state.db.clone();
    let receipt = with_retry(&state.config.retry, "sale return", || {
        let db = db.clone();
        let barcodes = barcodes.clone();
        async move { return_tx(&db, order_id, &barcodes, restock).await }
    })
    .await?;

    log::info!(
        "{} took back {} unit(s) on {} (refund {})",
        user.email,
        receipt.returned_units,
        receipt.order.order_number,
        receipt.refund
    );

    Ok(Json(receipt))
}

pub async fn list_sales(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<OrderFilters>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Order>>> {
    authorize(&cookies, &state, "sales:read").await?;
    Ok(Json(query_orders(&state, &filters, &page, Some(Channel::Retail)).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(price: i64) -> Product {
        Product {
            id: Uuid::new_v4(),
            sku: "MUG".into(),
            name: "Ceramic mug".into(),
            category: None,
            unit_price: Decimal::new(price, 2),
            wholesale_price: Some(Decimal::new(price / 2, 2)),
            cost_price: Decimal::ZERO,
            reorder_point: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn unit(barcode: &str, product_id: Uuid, location: Location, status: InventoryStatus) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            barcode: barcode.into(),
            product_id,
            location: location.as_str().into(),
            status: status.as_str().into(),
            cost_price: Decimal::ZERO,
            order_id: None,
            delivery_id: None,
            received_at: Utc::now(),
            sold_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn codes(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sale_rejects_units_that_are_elsewhere_or_gone() {
        let id = Uuid::new_v4();
        let units = vec![
            unit("S1", id, Location::Store, InventoryStatus::Available),
            unit("W1", id, Location::Warehouse, InventoryStatus::Available),
            unit("D1", id, Location::Store, InventoryStatus::Damaged),
        ];

        let blockers = sale_blockers(&codes(&["S1", "W1", "D1", "X9"]), &units, Location::Store);
        assert_eq!(blockers, vec!["W1", "D1", "X9"]);
    }

    #[test]
    fn units_are_grouped_per_product_at_retail_price() {
        let mug = product(5000);
        let cup = product(1200);
        let units = [
            unit("M1", mug.id, Location::Store, InventoryStatus::Available),
            unit("C1", cup.id, Location::Store, InventoryStatus::Available),
            unit("M2", mug.id, Location::Store, InventoryStatus::Available),
        ];
        let scanned: Vec<&InventoryItem> = units.iter().collect();

        let lines = group_units(&scanned, &[mug.clone(), cup.clone()]).unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!((lines[0].product_id, lines[0].quantity), (mug.id, 2));
        assert_eq!(lines[0].unit_price, Decimal::new(5000, 2));
        assert_eq!((lines[1].product_id, lines[1].quantity), (cup.id, 1));
    }

    #[test]
    fn returns_require_units_sold_on_the_order() {
        let order_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        let mut mine = unit("A", id, Location::Store, InventoryStatus::Sold);
        mine.order_id = Some(order_id);
        let mut other = unit("B", id, Location::Store, InventoryStatus::Sold);
        other.order_id = Some(Uuid::new_v4());
        let shelf = unit("C", id, Location::Store, InventoryStatus::Available);

        let blockers = return_blockers(&codes(&["A", "B", "C"]), &[mine, other, shelf], order_id);
        assert_eq!(blockers, vec!["B", "C"]);
    }

    #[test]
    fn refund_uses_the_price_on_the_order() {
        let product_id = Uuid::new_v4();
        let items = vec![OrderItemView {
            id: Uuid::new_v4(),
            product_id,
            product_name: "Ceramic mug".into(),
            sku: "MUG".into(),
            quantity: 3,
            unit_price: Decimal::new(4500, 2),
            line_total: Decimal::new(13500, 2),
        }];
        let a = unit("A", product_id, Location::Store, InventoryStatus::Sold);
        let b = unit("B", product_id, Location::Store, InventoryStatus::Sold);

        assert_eq!(refund_for(&[&a, &b], &items), Decimal::new(9000, 2));
    }
}

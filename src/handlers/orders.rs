use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgExecutor, PgConnection, Postgres, QueryBuilder};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::{AppState, Database},
    error::{AppError, AppResult},
    filters::{
        local_day_bounds, non_empty, parse_optional_date, parse_optional_enum,
        parse_optional_uuid, Pagination,
    },
    handlers::{customers::fetch_customer, deliveries::release_delivery_units},
    middleware::authorize,
    models::{
        Channel, Delivery, DeliveryStatus, Location, Order, OrderItemView, OrderStatus,
        Product,
    },
    services::pricing::{generate_number, line_total, merge_lines, LineRequest, OrderTotals},
    utils::{click_to_chat_url, with_retry},
};

#[derive(Deserialize)]
pub struct OrderFilters {
    pub channel: Option<String>,
    pub status: Option<String>,
    pub customer_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    channel: Channel,
    customer_id: Option<Uuid>,
    customer_name: Option<String>,
    customer_phone: Option<String>,
    location: Option<Location>,
    payment_method: Option<String>,
    discount: Option<Decimal>,
    shipping_fee: Option<Decimal>,
    notes: Option<String>,
    items: Vec<LineRequest>,
}

#[derive(Deserialize)]
pub struct ReplaceItemsRequest {
    items: Vec<LineRequest>,
    discount: Option<Decimal>,
    shipping_fee: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItemView>,
    pub delivery: Option<Delivery>,
    pub whatsapp_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Resolves the price of each requested line. Every product must exist and be
/// active; an explicit price overrides the channel price.
pub fn price_lines(
    channel: Channel,
    lines: Vec<LineRequest>,
    products: &[Product],
) -> Result<Vec<PricedLine>, AppError> {
    let lines = merge_lines(lines)?;
    lines
        .into_iter()
        .map(|line| {
            let product = products
                .iter()
                .find(|p| p.id == line.product_id)
                .ok_or(AppError::NotFound("product"))?;
            if !product.is_active {
                return Err(AppError::validation(format!(
                    "product {} is inactive",
                    product.sku
                )));
            }
            Ok(PricedLine {
                product_id: product.id,
                quantity: line.quantity,
                unit_price: line
                    .unit_price
                    .unwrap_or_else(|| product.price_for(channel))
                    .round_dp(2),
            })
        })
        .collect()
}

pub fn order_message(order: &Order) -> String {
    let name = order.customer_name.as_deref().unwrap_or("there");
    format!(
        "Hi {}, your order {} ({}) totals {}. Status: {}.",
        name, order.order_number, order.channel, order.total, order.status
    )
}

pub(crate) async fn fetch_order_items<'c, E>(executor: E, order_id: Uuid) -> AppResult<Vec<OrderItemView>>
where
    E: PgExecutor<'c>,
{
    let items = sqlx::query_as::<_, OrderItemView>(
        r#"
        SELECT oi.id, oi.product_id, p.name AS product_name, p.sku,
               oi.quantity, oi.unit_price, oi.line_total
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = $1
        ORDER BY oi.line_no
        "#,
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;

    Ok(items)
}

pub(crate) async fn lock_order(conn: &mut PgConnection, order_id: Uuid) -> AppResult<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("order"))
}

async fn load_priced_lines(
    conn: &mut PgConnection,
    channel: Channel,
    lines: Vec<LineRequest>,
) -> AppResult<Vec<PricedLine>> {
    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(conn)
        .await?;
    price_lines(channel, lines, &products)
}

pub(crate) async fn insert_items(conn: &mut PgConnection, order_id: Uuid, lines: &[PricedLine]) -> AppResult<()> {
    for (line_no, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, line_no, quantity, unit_price, line_total)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order_id)
        .bind(line.product_id)
        .bind(line_no as i32)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line_total(line.quantity, line.unit_price)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn create_order(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<OrderDetail>)> {
    let user = authorize(&cookies, &state, "orders:write").await?;

    if !req.channel.ships() {
        return Err(AppError::validation(
            "retail orders are created through the sales counter",
        ));
    }

    let mut tx = state.db.begin().await?;

    let customer = match req.customer_id {
        Some(id) => Some(fetch_customer(&mut *tx, id).await?),
        None => None,
    };

    let lines = load_priced_lines(&mut tx, req.channel, req.items).await?;
    let totals = OrderTotals::compute(
        lines.iter().map(|l| (l.quantity, l.unit_price)),
        req.discount.unwrap_or(Decimal::ZERO),
        req.shipping_fee.unwrap_or(Decimal::ZERO),
    )?;

    let customer_name = non_empty(req.customer_name.as_deref())
        .or_else(|| customer.as_ref().map(|c| c.name.clone()));
    let customer_phone = non_empty(req.customer_phone.as_deref())
        .or_else(|| customer.as_ref().and_then(|c| c.phone.clone()));

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (order_number, channel, status, customer_id, customer_name,
                            customer_phone, location, payment_method, subtotal, discount,
                            shipping_fee, total, notes, created_by)
        VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(generate_number(req.channel.number_prefix(), Utc::now()))
    .bind(req.channel.as_str())
    .bind(req.customer_id)
    .bind(customer_name)
    .bind(customer_phone)
    .bind(req.location.unwrap_or(Location::Warehouse).as_str())
    .bind(non_empty(req.payment_method.as_deref()))
    .bind(totals.subtotal)
    .bind(totals.discount)
    .bind(totals.shipping_fee)
    .bind(totals.total)
    .bind(non_empty(req.notes.as_deref()))
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    insert_items(&mut tx, order.id, &lines).await?;
    let items = fetch_order_items(&mut *tx, order.id).await?;

    tx.commit().await?;

    log::info!("{} created {} order {}", user.email, order.channel, order.order_number);

    let whatsapp_url = order
        .customer_phone
        .as_deref()
        .and_then(|phone| click_to_chat_url(phone, &order_message(&order)));

    Ok((
        StatusCode::CREATED,
        Json(OrderDetail {
            order,
            items,
            delivery: None,
            whatsapp_url,
        }),
    ))
}

/// Orders matching the filters, newest first. Shared with the sales list.
pub(crate) async fn query_orders(
    state: &AppState,
    filters: &OrderFilters,
    page: &Pagination,
    channel_override: Option<Channel>,
) -> AppResult<Vec<Order>> {
    let channel = match channel_override {
        Some(channel) => Some(channel),
        None => parse_optional_enum::<Channel>(filters.channel.as_deref())?,
    };
    let status = parse_optional_enum::<OrderStatus>(filters.status.as_deref())?;
    let customer_id = parse_optional_uuid(filters.customer_id.as_deref(), "customer_id")?;
    let date_from = parse_optional_date(filters.date_from.as_deref(), "date_from")?;
    let date_to = parse_optional_date(filters.date_to.as_deref(), "date_to")?;
    let offset = state.config.business_offset;

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM orders WHERE TRUE");
    if let Some(channel) = channel {
        query.push(" AND channel = ").push_bind(channel.as_str());
    }
    if let Some(status) = status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(id) = customer_id {
        query.push(" AND customer_id = ").push_bind(id);
    }
    if let Some(from) = date_from {
        query
            .push(" AND created_at >= ")
            .push_bind(local_day_bounds(from, from, offset).0);
    }
    if let Some(to) = date_to {
        query
            .push(" AND created_at < ")
            .push_bind(local_day_bounds(to, to, offset).1);
    }
    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit())
        .push(" OFFSET ")
        .push_bind(page.offset());

    let orders = query.build_query_as::<Order>().fetch_all(&state.db).await?;
    Ok(orders)
}

pub async fn list_orders(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(filters): Query<OrderFilters>,
    Query(page): Query<Pagination>,
) -> AppResult<Json<Vec<Order>>> {
    authorize(&cookies, &state, "orders:read").await?;
    Ok(Json(query_orders(&state, &filters, &page, None).await?))
}

pub(crate) async fn load_order_detail(db: &Database, order_id: Uuid) -> AppResult<OrderDetail> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("order"))?;

    let items = fetch_order_items(db, order_id).await?;

    // The live delivery if there is one, otherwise the latest cancelled one.
    let delivery = sqlx::query_as::<_, Delivery>(
        r#"
        SELECT * FROM deliveries
        WHERE order_id = $1
        ORDER BY (status <> 'cancelled') DESC, created_at DESC
        LIMIT 1
        "#,
    )
    .bind(order_id)
    .fetch_optional(db)
    .await?;

    let whatsapp_url = order
        .customer_phone
        .as_deref()
        .and_then(|phone| click_to_chat_url(phone, &order_message(&order)));

    Ok(OrderDetail {
        order,
        items,
        delivery,
        whatsapp_url,
    })
}

pub async fn get_order(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderDetail>> {
    authorize(&cookies, &state, "orders:read").await?;
    Ok(Json(load_order_detail(&state.db, order_id).await?))
}

pub async fn replace_items(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ReplaceItemsRequest>,
) -> AppResult<Json<OrderDetail>> {
    authorize(&cookies, &state, "orders:write").await?;

    let mut tx = state.db.begin().await?;

    let order = lock_order(&mut tx, order_id).await?;
    if order.status()? != OrderStatus::Pending {
        return Err(AppError::conflict(format!(
            "order {} is {}; only pending orders can be edited",
            order.order_number, order.status
        )));
    }
    let channel = order.channel()?;
    if !channel.ships() {
        return Err(AppError::conflict("retail orders cannot be edited"));
    }

    let lines = load_priced_lines(&mut tx, channel, req.items).await?;
    let totals = OrderTotals::compute(
        lines.iter().map(|l| (l.quantity, l.unit_price)),
        req.discount.unwrap_or(order.discount),
        req.shipping_fee.unwrap_or(order.shipping_fee),
    )?;

    sqlx::query("DELETE FROM order_items WHERE order_id = $1")
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
    insert_items(&mut tx, order_id, &lines).await?;

    sqlx::query(
        r#"
        UPDATE orders
        SET subtotal = $2, discount = $3, shipping_fee = $4, total = $5, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(totals.subtotal)
    .bind(totals.discount)
    .bind(totals.shipping_fee)
    .bind(totals.total)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(load_order_detail(&state.db, order_id).await?))
}

async fn cancel_order_tx(db: &Database, order_id: Uuid) -> AppResult<(Order, u64)> {
    let mut tx = db.begin().await?;

    let order = lock_order(&mut tx, order_id).await?;
    order.ensure_transition(OrderStatus::Cancelled)?;

    let active = sqlx::query_as::<_, Delivery>(
        "SELECT * FROM deliveries WHERE order_id = $1 AND status <> 'cancelled' FOR UPDATE",
    )
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await?;

    let mut released = 0;
    if let Some(delivery) = active {
        if delivery.status()? == DeliveryStatus::Delivered {
            return Err(AppError::conflict(format!(
                "delivery {} was already delivered",
                delivery.delivery_number
            )));
        }
        released = release_delivery_units(&mut tx, delivery.id).await?;
        sqlx::query("UPDATE deliveries SET status = 'cancelled', updated_at = NOW() WHERE id = $1")
            .bind(delivery.id)
            .execute(&mut *tx)
            .await?;
    }

    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = 'cancelled', updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((order, released))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    let user = authorize(&cookies, &state, "orders:write").await?;

    let db = state.db.clone();
    let (order, released) = with_retry(&state.config.retry, "cancel order", || {
        let db = db.clone();
        async move { cancel_order_tx(&db, order_id).await }
    })
    .await?;

    log::info!(
        "{} cancelled order {} ({} unit(s) released)",
        user.email,
        order.order_number,
        released
    );

    Ok(Json(order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pricing::MAX_AMOUNT;

    fn product(price: i64, wholesale: Option<i64>, active: bool) -> Product {
        Product {
            id: Uuid::new_v4(),
            sku: format!("SKU-{}", price),
            name: "Oat milk 1L".into(),
            category: None,
            unit_price: Decimal::new(price, 2),
            wholesale_price: wholesale.map(|w| Decimal::new(w, 2)),
            cost_price: Decimal::ZERO,
            reorder_point: 0,
            is_active: active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request(product_id: Uuid, quantity: i32, unit_price: Option<Decimal>) -> LineRequest {
        LineRequest {
            product_id,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn wholesale_lines_use_wholesale_price_unless_overridden() {
        let milk = product(4500, Some(3900), true);
        let cups = product(150, None, true);

        let lines = price_lines(
            Channel::Wholesale,
            vec![
                request(milk.id, 10, None),
                request(cups.id, 100, None),
                request(milk.id, 2, None),
            ],
            &[milk.clone(), cups.clone()],
        )
        .unwrap();

        assert_eq!(
            lines,
            vec![
                PricedLine { product_id: milk.id, quantity: 12, unit_price: Decimal::new(3900, 2) },
                PricedLine { product_id: cups.id, quantity: 100, unit_price: Decimal::new(150, 2) },
            ]
        );

        let overridden = price_lines(
            Channel::Delivery,
            vec![request(milk.id, 1, Some(Decimal::new(4000, 2)))],
            &[milk],
        )
        .unwrap();
        assert_eq!(overridden[0].unit_price, Decimal::new(4000, 2));
    }

    #[test]
    fn unknown_and_inactive_products_are_rejected() {
        let retired = product(100, None, false);

        assert!(matches!(
            price_lines(Channel::Delivery, vec![request(Uuid::new_v4(), 1, None)], &[]),
            Err(AppError::NotFound("product"))
        ));
        assert!(matches!(
            price_lines(Channel::Delivery, vec![request(retired.id, 1, None)], &[retired]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn oversized_price_is_a_validation_error() {
        let milk = product(4500, Some(3900), true);

        assert!(matches!(
            price_lines(
                Channel::Wholesale,
                vec![request(milk.id, 2, Some(Decimal::MAX))],
                &[milk.clone()],
            ),
            Err(AppError::Validation(_))
        ));

        let lines = price_lines(
            Channel::Wholesale,
            vec![request(milk.id, 2, Some(MAX_AMOUNT))],
            &[milk],
        )
        .unwrap();
        assert!(matches!(
            OrderTotals::compute(
                lines.iter().map(|l| (l.quantity, l.unit_price)),
                Decimal::ZERO,
                Decimal::ZERO,
            ),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn message_falls_back_to_a_greeting() {
        let order = Order {
            id: Uuid::new_v4(),
            order_number: "DLV-20261019-ABC123".into(),
            channel: "delivery".into(),
            status: "processing".into(),
            customer_id: None,
            customer_name: None,
            customer_phone: Some("+62 811 000 111".into()),
            location: "store".into(),
            payment_method: None,
            subtotal: Decimal::new(5000, 2),
            discount: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            total: Decimal::new(5000, 2),
            returned_amount: Decimal::ZERO,
            notes: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(
            order_message(&order),
            "Hi there, your order DLV-20261019-ABC123 (delivery) totals 50.00. Status: processing."
        );
    }
}

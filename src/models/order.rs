use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;

text_enum! {
    /// How an order reached the shop.
    Channel {
        Retail => "retail",
        Wholesale => "wholesale",
        Delivery => "delivery",
    }
}

impl Channel {
    pub fn number_prefix(self) -> &'static str {
        match self {
            Channel::Retail => "RTL",
            Channel::Wholesale => "WHS",
            Channel::Delivery => "DLV",
        }
    }

    /// Retail orders are settled at the counter; the others ship through a delivery.
    pub fn ships(self) -> bool {
        !matches!(self, Channel::Retail)
    }
}

text_enum! {
    OrderStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub channel: String,
    pub status: String,
    pub customer_id: Option<Uuid>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub location: String,
    pub payment_method: Option<String>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping_fee: Decimal,
    pub total: Decimal,
    pub returned_amount: Decimal,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn channel(&self) -> Result<Channel, AppError> {
        self.channel.parse()
    }

    pub fn status(&self) -> Result<OrderStatus, AppError> {
        self.status.parse()
    }

    /// Fails with 409 unless the order may move to `next`.
    pub fn ensure_transition(&self, next: OrderStatus) -> Result<(), AppError> {
        let current = self.status()?;
        if current.can_transition_to(next) {
            Ok(())
        } else {
            Err(AppError::conflict(format!(
                "order {} is {} and cannot become {}",
                self.order_number, current, next
            )))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use OrderStatus::*;

    #[rstest]
    #[case(Pending, Processing, true)]
    #[case(Pending, Completed, true)]
    #[case(Processing, Pending, true)]
    #[case(Processing, Completed, true)]
    #[case(Completed, Cancelled, false)]
    #[case(Cancelled, Pending, false)]
    #[case(Completed, Processing, false)]
    fn transitions(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_retail_is_settled_at_the_counter() {
        assert!(!Channel::Retail.ships());
        assert!(Channel::Wholesale.ships());
        assert!(Channel::Delivery.ships());
    }
}

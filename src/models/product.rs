use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Channel;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub unit_price: Decimal,
    pub wholesale_price: Option<Decimal>,
    pub cost_price: Decimal,
    pub reorder_point: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// List price for an order placed through `channel`.
    pub fn price_for(&self, channel: Channel) -> Decimal {
        match channel {
            Channel::Wholesale => self.wholesale_price.unwrap_or(self.unit_price),
            Channel::Retail | Channel::Delivery => self.unit_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn product(wholesale: Option<i64>) -> Product {
        Product {
            id: Uuid::new_v4(),
            sku: "BEAN-1KG".into(),
            name: "House blend 1kg".into(),
            category: Some("coffee".into()),
            unit_price: Decimal::new(15000, 2),
            wholesale_price: wholesale.map(|w| Decimal::new(w, 2)),
            cost_price: Decimal::new(9000, 2),
            reorder_point: 5,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(Channel::Retail, Some(12000), Decimal::new(15000, 2))]
    #[case(Channel::Delivery, Some(12000), Decimal::new(15000, 2))]
    #[case(Channel::Wholesale, Some(12000), Decimal::new(12000, 2))]
    #[case(Channel::Wholesale, None, Decimal::new(15000, 2))]
    fn channel_pricing(#[case] channel: Channel, #[case] wholesale: Option<i64>, #[case] expected: Decimal) {
        assert_eq!(product(wholesale).price_for(channel), expected);
    }
}

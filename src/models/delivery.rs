use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;

text_enum! {
    DeliveryStatus {
        Pending => "pending",
        InTransit => "in_transit",
        Delivered => "delivered",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl DeliveryStatus {
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, InTransit)
                | (Pending, Cancelled)
                | (InTransit, Delivered)
                | (InTransit, Failed)
                | (Failed, InTransit)
                | (Failed, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Delivery {
    pub id: Uuid,
    pub delivery_number: String,
    pub order_id: Uuid,
    pub status: String,
    pub courier: Option<String>,
    pub tracking_number: Option<String>,
    pub recipient_address: Option<String>,
    pub shipping_cost: Decimal,
    pub refund_amount: Decimal,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn status(&self) -> Result<DeliveryStatus, AppError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeliveryItem {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use DeliveryStatus::*;

    #[rstest]
    #[case(Pending, InTransit, true)]
    #[case(Pending, Delivered, false)]
    #[case(InTransit, Delivered, true)]
    #[case(InTransit, Cancelled, false)]
    #[case(Failed, InTransit, true)]
    #[case(Failed, Cancelled, true)]
    #[case(Delivered, Cancelled, false)]
    #[case(Cancelled, Pending, false)]
    fn transitions(#[case] from: DeliveryStatus, #[case] to: DeliveryStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn wire_names_use_snake_case() {
        assert_eq!(InTransit.as_str(), "in_transit");
        assert_eq!(serde_json::to_string(&InTransit).unwrap(), "\"in_transit\"");
        assert_eq!("in_transit".parse::<DeliveryStatus>().unwrap(), InTransit);
    }
}

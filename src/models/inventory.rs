use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

text_enum! {
    /// The two places stock can sit.
    Location {
        Store => "store",
        Warehouse => "warehouse",
    }
}

text_enum! {
    InventoryStatus {
        Available => "available",
        Sold => "sold",
        Damaged => "damaged",
        Returned => "returned",
    }
}

impl InventoryStatus {
    pub fn can_transition_to(self, next: InventoryStatus) -> bool {
        use InventoryStatus::*;
        matches!(
            (self, next),
            (Available, Sold)
                | (Available, Damaged)
                | (Sold, Returned)
                | (Returned, Available)
                | (Returned, Damaged)
        )
    }

    /// Units in these states stay attached to the order that sold them.
    pub fn keeps_order_link(self) -> bool {
        matches!(self, InventoryStatus::Sold | InventoryStatus::Returned)
    }
}

/// One physical unit, identified by its barcode.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub id: Uuid,
    pub barcode: String,
    pub product_id: Uuid,
    pub location: String,
    pub status: String,
    pub cost_price: Decimal,
    pub order_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
    pub sold_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn status(&self) -> Result<InventoryStatus, crate::error::AppError> {
        self.status.parse()
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct InventoryItemView {
    pub id: Uuid,
    pub barcode: String,
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub location: String,
    pub status: String,
    pub cost_price: Decimal,
    pub order_id: Option<Uuid>,
    pub delivery_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
    pub sold_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use InventoryStatus::*;

    #[rstest]
    #[case(Available, Sold, true)]
    #[case(Available, Damaged, true)]
    #[case(Available, Returned, false)]
    #[case(Sold, Returned, true)]
    #[case(Sold, Available, false)]
    #[case(Sold, Damaged, false)]
    #[case(Returned, Available, true)]
    #[case(Returned, Damaged, true)]
    #[case(Returned, Sold, false)]
    #[case(Damaged, Available, false)]
    #[case(Damaged, Returned, false)]
    fn transitions(#[case] from: InventoryStatus, #[case] to: InventoryStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for status in InventoryStatus::ALL {
            assert!(!status.can_transition_to(*status));
        }
    }

    #[test]
    fn text_round_trip_and_rejection() {
        assert_eq!("warehouse".parse::<Location>().unwrap(), Location::Warehouse);
        assert_eq!(Location::Store.to_string(), "store");
        assert!("basement".parse::<Location>().is_err());
    }
}

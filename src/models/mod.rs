/// Declares an enum stored as a `TEXT` column, with its wire/database spelling.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            #[allow(dead_code)]
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::error::AppError::validation(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod customer;
pub mod delivery;
pub mod employee;
pub mod expense;
pub mod finance;
pub mod inventory;
pub mod order;
pub mod product;
pub mod rbac;
pub mod user;

pub use customer::{Customer, CustomerType};
pub use delivery::{Delivery, DeliveryItem, DeliveryStatus};
pub use employee::{Attendance, AttendanceStatus, Employee, PayType, Payslip, PayrollStatus};
pub use expense::Expense;
pub use finance::{FinancePeriod, PeriodType};
pub use inventory::{InventoryItem, InventoryItemView, InventoryStatus, Location};
pub use order::{Channel, Order, OrderItemView, OrderStatus};
pub use product::Product;
pub use rbac::{all_permission_keys, get_all_permissions, Permission, Role, RoleDisplay, UserWithRoles};
pub use user::{User, UserResponse};

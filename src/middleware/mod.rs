pub mod permission;

pub use permission::{authorize, get_current_user, get_user_permissions};

pub mod auth;
pub mod retry;
pub mod whatsapp;

pub use auth::{create_token, hash_password, verify_password, verify_token};
pub use retry::{with_retry, RetryPolicy};
pub use whatsapp::click_to_chat_url;

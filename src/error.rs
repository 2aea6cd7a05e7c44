use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::fulfillment::Shortage;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthorized,
    #[error("missing permission {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("insufficient stock for {} product(s)", .0.len())]
    InsufficientStock(Vec<Shortage>),
    #[error("inventory changed while the request was running")]
    ConcurrentUpdate,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

// Postgres SQLSTATE codes
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether re-running the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConcurrentUpdate => true,
            Self::Database(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => matches!(
                    db.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ),
                _ => false,
            },
            _ => false,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::InsufficientStock(_) => (StatusCode::CONFLICT, "insufficient_stock"),
            Self::ConcurrentUpdate => (StatusCode::CONFLICT, "concurrent_update"),
            Self::Database(sqlx::Error::RowNotFound) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Database(sqlx::Error::Database(db))
                if matches!(
                    db.code().as_deref(),
                    Some(UNIQUE_VIOLATION) | Some(FOREIGN_KEY_VIOLATION)
                ) =>
            {
                (StatusCode::CONFLICT, "conflict")
            }
            Self::Database(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Database(sqlx::Error::RowNotFound) => "record not found".to_string(),
            Self::Database(sqlx::Error::Database(db)) if status == StatusCode::CONFLICT => {
                db.message().to_string()
            }
            Self::Database(err) => {
                log::error!("database error: {}", err);
                "internal server error".to_string()
            }
            Self::Internal(msg) => {
                log::error!("internal error: {}", msg);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = match self {
            Self::InsufficientStock(shortages) => json!({
                "error": code,
                "message": message,
                "shortages": shortages,
            }),
            _ => json!({ "error": code, "message": message }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rstest::rstest;
    use uuid::Uuid;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[rstest]
    #[case(AppError::Unauthorized, StatusCode::UNAUTHORIZED)]
    #[case(AppError::Forbidden("orders:write".into()), StatusCode::FORBIDDEN)]
    #[case(AppError::NotFound("order"), StatusCode::NOT_FOUND)]
    #[case(AppError::bad_request("nope"), StatusCode::BAD_REQUEST)]
    #[case(AppError::validation("nope"), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(AppError::ConcurrentUpdate, StatusCode::CONFLICT)]
    #[case(AppError::Database(sqlx::Error::RowNotFound), StatusCode::NOT_FOUND)]
    #[case(AppError::Database(sqlx::Error::PoolTimedOut), StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_to_status(#[case] err: AppError, #[case] expected: StatusCode) {
        assert_eq!(err.into_response().status(), expected);
    }

    #[rstest]
    #[case(AppError::ConcurrentUpdate, true)]
    #[case(AppError::Database(sqlx::Error::PoolTimedOut), true)]
    #[case(AppError::Database(sqlx::Error::RowNotFound), false)]
    #[case(AppError::conflict("order already delivered"), false)]
    fn transient_classification(#[case] err: AppError, #[case] transient: bool) {
        assert_eq!(err.is_transient(), transient);
    }

    #[tokio::test]
    async fn shortage_body_lists_every_product() {
        let product_id = Uuid::new_v4();
        let err = AppError::InsufficientStock(vec![Shortage {
            product_id,
            product_name: "Iced latte beans 1kg".into(),
            requested: 5,
            available: 2,
            missing: 3,
        }]);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["error"], "insufficient_stock");
        assert_eq!(body["shortages"][0]["product_id"], product_id.to_string());
        assert_eq!(body["shortages"][0]["missing"], 3);
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let body = body_json(AppError::Internal("token signing broke".into()).into_response()).await;
        assert_eq!(body["error"], "internal");
        assert_eq!(body["message"], "internal server error");
    }
}

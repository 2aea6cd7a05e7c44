use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::{AppState, Database},
    error::AppError,
    models::User,
    utils::verify_token,
};

pub const AUTH_COOKIE: &str = "auth_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub permissions: Vec<String>,
}

impl CurrentUser {
    pub fn from_user_and_permissions(user: User, permissions: Vec<String>) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            permissions,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn require(&self, permission: &str) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(permission.to_string()))
        }
    }
}

/// Resolves the signed-in user from the `auth_token` cookie. Returns `None`
/// for a missing or invalid token and for inactive or locked accounts.
pub async fn get_current_user(
    cookies: &Cookies,
    state: &AppState,
) -> Result<Option<CurrentUser>, AppError> {
    let token = match cookies.get(AUTH_COOKIE) {
        Some(cookie) => cookie.value().to_string(),
        None => return Ok(None),
    };

    let user_id = match verify_token(&state.config.jwt_secret, &token)
        .ok()
        .and_then(|claims| claims.user_id())
    {
        Some(id) => id,
        None => return Ok(None),
    };

    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = $1 AND is_active = true AND is_locked = false",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?;

    match user {
        Some(user) => {
            let permissions = get_user_permissions(&state.db, user.id).await?;
            Ok(Some(CurrentUser::from_user_and_permissions(user, permissions)))
        }
        None => Ok(None),
    }
}

/// Signed-in user holding `permission`, or 401/403.
pub async fn authorize(
    cookies: &Cookies,
    state: &AppState,
    permission: &str,
) -> Result<CurrentUser, AppError> {
    let user = get_current_user(cookies, state)
        .await?
        .ok_or(AppError::Unauthorized)?;
    user.require(permission)?;
    Ok(user)
}

pub async fn get_user_permissions(db: &Database, user_id: Uuid) -> Result<Vec<String>, AppError> {
    let permissions = sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT jsonb_array_elements_text(r.permissions) AS permission
        FROM roles r
        JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = $1 AND r.is_active = true
        ORDER BY permission
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    Ok(permissions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cashier() -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "cashier@shop.test".into(),
            first_name: "Sari".into(),
            last_name: "Dewi".into(),
            permissions: vec!["sales:read".into(), "sales:write".into()],
        }
    }

    #[test]
    fn require_checks_exact_permission() {
        let user = cashier();
        assert!(user.require("sales:write").is_ok());
        assert!(matches!(
            user.require("payroll:read"),
            Err(AppError::Forbidden(p)) if p == "payroll:read"
        ));
    }
}

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Deserialize;
use tower_cookies::{cookie::SameSite, Cookie, Cookies};

use crate::{
    database::{AppState, Database},
    error::{AppError, AppResult},
    middleware::{get_current_user, get_user_permissions, permission::AUTH_COOKIE},
    models::{User, UserResponse},
    utils::{create_token, hash_password, verify_password},
};

#[derive(Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
}

pub const MIN_PASSWORD_LEN: usize = 8;

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<LoginForm>,
) -> AppResult<Json<UserResponse>> {
    let user = authenticate_user(&state.db, form.email.trim(), &form.password)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let token = create_token(
        &state.config.jwt_secret,
        user.id,
        user.email.clone(),
        state.config.token_ttl_hours,
    )
    .map_err(|e| AppError::Internal(format!("failed to sign session token: {}", e)))?;

    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    // Secure HTTP-only cookie carrying the JWT
    let cookie = Cookie::build((AUTH_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(state.config.token_ttl_hours))
        .build();
    cookies.add(cookie);

    log::info!("user {} signed in", user.email);

    let permissions = get_user_permissions(&state.db, user.id).await?;
    Ok(Json(UserResponse::new(user, permissions)))
}

pub async fn logout(cookies: Cookies) -> StatusCode {
    let mut cookie = Cookie::from(AUTH_COOKIE);
    cookie.set_path("/");
    cookies.remove(cookie);
    StatusCode::NO_CONTENT
}

pub async fn me(State(state): State<AppState>, cookies: Cookies) -> AppResult<Json<UserResponse>> {
    let current = get_current_user(&cookies, &state)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(current.id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(UserResponse::new(user, current.permissions)))
}

/// Creates the very first account and makes it an Administrator. Once any
/// user exists, accounts are created through the team endpoints.
pub async fn register(
    State(state): State<AppState>,
    Json(form): Json<RegisterForm>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    validate_new_account(&form.email, &form.password, &form.first_name, &form.last_name)?;

    let password_hash = hash_password(&form.password)
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))?;

    let mut tx = state.db.begin().await?;

    sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut *tx)
        .await?;

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    if existing > 0 {
        return Err(AppError::Forbidden("team:write".to_string()));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(form.email.trim().to_lowercase())
    .bind(&password_hash)
    .bind(form.first_name.trim())
    .bind(form.last_name.trim())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_roles (user_id, role_id)
        SELECT $1, id FROM roles WHERE name = 'Administrator'
        "#,
    )
    .bind(user.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    log::info!("bootstrap administrator {} registered", user.email);

    let permissions = get_user_permissions(&state.db, user.id).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::new(user, permissions))))
}

pub fn validate_new_account(
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
) -> Result<(), AppError> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("a valid email is required"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(AppError::validation("first and last name are required"));
    }
    Ok(())
}

async fn authenticate_user(
    db: &Database,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(email) = lower($1)")
        .bind(email)
        .fetch_optional(db)
        .await?;

    Ok(user.filter(|u| u.can_sign_in() && verify_password(password, &u.password_hash).unwrap_or(false)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_validation() {
        assert!(validate_new_account("owner@shop.test", "longenough", "Ana", "Putri").is_ok());
        assert!(validate_new_account("not-an-email", "longenough", "Ana", "Putri").is_err());
        assert!(validate_new_account("owner@shop.test", "short", "Ana", "Putri").is_err());
        assert!(validate_new_account("owner@shop.test", "longenough", " ", "Putri").is_err());
    }
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use sqlx::PgConnection;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::{AppState, Database},
    error::{AppError, AppResult},
    filters::non_empty,
    handlers::auth::{validate_new_account, MIN_PASSWORD_LEN},
    middleware::authorize,
    models::{all_permission_keys, get_all_permissions, Permission, Role, RoleDisplay, User, UserWithRoles},
    utils::hash_password,
};

#[derive(Deserialize)]
pub struct CreateUserForm {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    #[serde(default)]
    role_ids: Vec<Uuid>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateUserForm {
    email: String,
    first_name: String,
    last_name: String,
    /// Left unchanged when absent or blank.
    password: Option<String>,
    role_ids: Option<Vec<Uuid>>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct RoleForm {
    name: String,
    description: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
    is_active: Option<bool>,
}

/// Sorted, de-duplicated permissions; anything outside the catalogue is rejected.
pub fn validate_permissions(requested: &[String]) -> Result<Vec<String>, AppError> {
    let known = all_permission_keys();
    let unknown: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|p| !known.iter().any(|k| k == p))
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::validation(format!(
            "unknown permission(s): {}",
            unknown.join(", ")
        )));
    }

    let mut permissions = requested.to_vec();
    permissions.sort();
    permissions.dedup();
    Ok(permissions)
}

fn get_user_permissions_from_roles(roles: &[RoleDisplay]) -> Vec<String> {
    let mut permissions: Vec<String> = roles
        .iter()
        .filter(|r| r.is_active)
        .flat_map(|r| r.permissions.iter().cloned())
        .collect();
    permissions.sort();
    permissions.dedup();
    permissions
}

fn with_roles(user: User, roles: Vec<RoleDisplay>) -> UserWithRoles {
    let permissions = get_user_permissions_from_roles(&roles);
    UserWithRoles {
        id: user.id,
        email: user.email,
        first_name: user.first_name,
        last_name: user.last_name,
        is_active: user.is_active,
        is_locked: user.is_locked,
        last_login: user.last_login,
        locked_at: user.locked_at,
        created_at: user.created_at,
        roles,
        permissions,
    }
}

async fn roles_for_user(db: &Database, user_id: Uuid) -> AppResult<Vec<RoleDisplay>> {
    let roles = sqlx::query_as::<_, Role>(
        r#"
        SELECT r.* FROM roles r
        JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = $1
        ORDER BY r.name
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?
    .into_iter()
    .map(RoleDisplay::from)
    .collect();
    Ok(roles)
}

async fn get_user_with_roles(db: &Database, user_id: Uuid) -> AppResult<UserWithRoles> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    let roles = roles_for_user(db, user.id).await?;
    Ok(with_roles(user, roles))
}

/// Replaces the user's role set.
async fn assign_roles(
    conn: &mut PgConnection,
    user_id: Uuid,
    role_ids: &[Uuid],
    assigned_by: Uuid,
) -> AppResult<()> {
    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM roles WHERE id = ANY($1)")
        .bind(role_ids)
        .fetch_one(&mut *conn)
        .await?;
    let mut distinct = role_ids.to_vec();
    distinct.sort();
    distinct.dedup();
    if found != distinct.len() as i64 {
        return Err(AppError::validation("one or more role_ids do not exist"));
    }

    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO user_roles (user_id, role_id, assigned_by)
        SELECT $1, role_id, $3 FROM UNNEST($2::uuid[]) AS role_id
        "#,
    )
    .bind(user_id)
    .bind(&distinct)
    .bind(assigned_by)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn list_permissions(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Vec<Permission>>> {
    authorize(&cookies, &state, "team:read").await?;
    Ok(Json(get_all_permissions()))
}

pub async fn list_users(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Vec<UserWithRoles>>> {
    authorize(&cookies, &state, "team:read").await?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    let mut users_with_roles = Vec::with_capacity(users.len());
    for user in users {
        let roles = roles_for_user(&state.db, user.id).await?;
        users_with_roles.push(with_roles(user, roles));
    }

    Ok(Json(users_with_roles))
}

pub async fn create_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<CreateUserForm>,
) -> AppResult<(StatusCode, Json<UserWithRoles>)> {
    let current_user = authorize(&cookies, &state, "team:write").await?;
    validate_new_account(&form.email, &form.password, &form.first_name, &form.last_name)?;

    let password_hash = hash_password(&form.password)
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))?;

    let mut tx = state.db.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name, is_active)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(form.email.trim().to_lowercase())
    .bind(&password_hash)
    .bind(form.first_name.trim())
    .bind(form.last_name.trim())
    .bind(form.is_active.unwrap_or(true))
    .fetch_one(&mut *tx)
    .await?;

    assign_roles(&mut tx, user.id, &form.role_ids, current_user.id).await?;

    tx.commit().await?;

    log::info!("{} created user {}", current_user.email, user.email);

    let user = get_user_with_roles(&state.db, user.id).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
    Json(form): Json<UpdateUserForm>,
) -> AppResult<Json<UserWithRoles>> {
    let current_user = authorize(&cookies, &state, "team:write").await?;

    let email = form.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("a valid email is required"));
    }
    if form.first_name.trim().is_empty() || form.last_name.trim().is_empty() {
        return Err(AppError::validation("first and last name are required"));
    }
    let password_hash = match form.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) if password.len() < MIN_PASSWORD_LEN => {
            return Err(AppError::validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )))
        }
        Some(password) => Some(
            hash_password(password)
                .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))?,
        ),
        None => None,
    };
    if current_user.id == user_id && form.is_active == Some(false) {
        return Err(AppError::bad_request("you cannot deactivate your own account"));
    }

    let mut tx = state.db.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE users
        SET email = $2, first_name = $3, last_name = $4,
            is_active = COALESCE($5, is_active),
            password_hash = COALESCE($6, password_hash),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(&email)
    .bind(form.first_name.trim())
    .bind(form.last_name.trim())
    .bind(form.is_active)
    .bind(password_hash)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
    }

    if let Some(role_ids) = &form.role_ids {
        assign_roles(&mut tx, user_id, role_ids, current_user.id).await?;
    }

    tx.commit().await?;

    Ok(Json(get_user_with_roles(&state.db, user_id).await?))
}

pub async fn lock_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserWithRoles>> {
    let current_user = authorize(&cookies, &state, "team:write").await?;

    if current_user.id == user_id {
        return Err(AppError::bad_request("you cannot lock your own account"));
    }

    let result = sqlx::query(
        "UPDATE users SET is_locked = true, locked_at = NOW(), locked_by = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(current_user.id)
    .bind(user_id)
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
    }

    log::warn!("{} locked user {}", current_user.email, user_id);

    Ok(Json(get_user_with_roles(&state.db, user_id).await?))
}

pub async fn unlock_user(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserWithRoles>> {
    let current_user = authorize(&cookies, &state, "team:write").await?;

    let result = sqlx::query(
        "UPDATE users SET is_locked = false, locked_at = NULL, locked_by = NULL, updated_at = NOW() WHERE id = $1",
    )
    .bind(user_id)
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("user"));
    }

    log::info!("{} unlocked user {}", current_user.email, user_id);

    Ok(Json(get_user_with_roles(&state.db, user_id).await?))
}

pub async fn list_roles(
    State(state): State<AppState>,
    cookies: Cookies,
) -> AppResult<Json<Vec<RoleDisplay>>> {
    authorize(&cookies, &state, "team:read").await?;

    let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
        .fetch_all(&state.db)
        .await?
        .into_iter()
        .map(RoleDisplay::from)
        .collect();

    Ok(Json(roles))
}

pub async fn create_role(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(form): Json<RoleForm>,
) -> AppResult<(StatusCode, Json<RoleDisplay>)> {
    let current_user = authorize(&cookies, &state, "team:manage_roles").await?;

    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("role name is required"));
    }
    let permissions = validate_permissions(&form.permissions)?;

    let role = sqlx::query_as::<_, Role>(
        r#"
        INSERT INTO roles (name, description, permissions, is_active, created_by)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(non_empty(form.description.as_deref()))
    .bind(sqlx::types::Json(&permissions))
    .bind(form.is_active.unwrap_or(true))
    .bind(current_user.id)
    .fetch_one(&state.db)
    .await?;

    log::info!("{} created role {}", current_user.email, role.name);

    Ok((StatusCode::CREATED, Json(RoleDisplay::from(role))))
}

pub async fn update_role(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(role_id): Path<Uuid>,
    Json(form): Json<RoleForm>,
) -> AppResult<Json<RoleDisplay>> {
    authorize(&cookies, &state, "team:manage_roles").await?;

    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("role name is required"));
    }
    let permissions = validate_permissions(&form.permissions)?;

    let role = sqlx::query_as::<_, Role>(
        r#"
        UPDATE roles
        SET name = $2, description = $3, permissions = $4,
            is_active = COALESCE($5, is_active), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(role_id)
    .bind(name)
    .bind(non_empty(form.description.as_deref()))
    .bind(sqlx::types::Json(&permissions))
    .bind(form.is_active)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("role"))?;

    Ok(Json(RoleDisplay::from(role)))
}

pub async fn delete_role(
    State(state): State<AppState>,
    cookies: Cookies,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let current_user = authorize(&cookies, &state, "team:manage_roles").await?;

    let mut tx = state.db.begin().await?;

    let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1 FOR UPDATE")
        .bind(role_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("role"))?;

    let assigned = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM user_roles WHERE role_id = $1")
        .bind(role_id)
        .fetch_one(&mut *tx)
        .await?;
    if assigned > 0 {
        return Err(AppError::conflict(format!(
            "role {} is still assigned to {} user(s)",
            role.name, assigned
        )));
    }

    sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log::info!("{} deleted role {}", current_user.email, role.name);

    Ok(StatusCode::NO_CONTENT)
}

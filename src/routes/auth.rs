use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{
        clear_session_cookie_header, hash_password, issue_token, require_user_row, sanitize_user,
        session_cookie_header, verify_password, USERS_TABLE,
    },
    error::{AppError, AppResult},
    repository::table_service::{count_rows, create_row, list_rows},
    schemas::{validate_input, LoginInput, RegisterInput},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/auth/register", axum::routing::post(register))
        .route("/auth/login", axum::routing::post(login))
        .route("/auth/logout", axum::routing::post(logout))
        .route("/auth/me", axum::routing::get(me))
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let email = normalize_email(&payload.email);

    let mut filters = Map::new();
    filters.insert("email".to_string(), Value::String(email.clone()));
    if count_rows(pool, USERS_TABLE, Some(&filters)).await? > 0 {
        return Err(AppError::BadRequest(
            "An account with this email already exists.".to_string(),
        ));
    }

    let role = if state.config.is_admin_email(&email) {
        "admin"
    } else {
        "user"
    };

    let mut record = Map::new();
    record.insert("email".to_string(), Value::String(email.clone()));
    record.insert(
        "password".to_string(),
        Value::String(hash_password(&payload.password)?),
    );
    record.insert("role".to_string(), Value::String(role.to_string()));
    if let Some(full_name) = non_empty(payload.full_name.as_deref()) {
        record.insert("full_name".to_string(), Value::String(full_name));
    }
    if let Some(mobile) = non_empty(payload.mobile.as_deref()) {
        record.insert("mobile".to_string(), Value::String(mobile));
    }

    let created = create_row(pool, USERS_TABLE, &record).await?;
    let user_id = created
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let token = issue_token(&state, &user_id, role)?;

    tracing::info!(user_id = %user_id, role = %role, "Account registered");
    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, session_cookie_header(&state, &token))],
        Json(json!({ "user": sanitize_user(created) })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let pool = db_pool(&state)?;
    let email = normalize_email(&payload.email);

    let mut filters = Map::new();
    filters.insert("email".to_string(), Value::String(email.clone()));
    let mut rows = list_rows(pool, USERS_TABLE, Some(&filters), 1, 0, "created_at", true).await?;
    let user = rows.pop().ok_or_else(invalid_credentials)?;

    let stored_hash = user
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !verify_password(&payload.password, stored_hash) {
        // Same message for unknown email and wrong password.
        return Err(invalid_credentials());
    }

    let user_id = user
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let role = user
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("user")
        .to_string();
    let token = issue_token(&state, &user_id, &role)?;

    tracing::info!(user_id = %user_id, "Login succeeded");
    Ok((
        [(SET_COOKIE, session_cookie_header(&state, &token))],
        Json(json!({ "user": sanitize_user(user) })),
    ))
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(SET_COOKIE, clear_session_cookie_header(&state))],
        Json(json!({ "success": true })),
    )
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let row = require_user_row(&state, &headers).await?;
    Ok(Json(json!({ "user": sanitize_user(row) })))
}

fn invalid_credentials() -> AppError {
    AppError::BadRequest("Invalid email or password.".to_string())
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::{non_empty, normalize_email};

    #[test]
    fn normalizes_emails_for_storage() {
        assert_eq!(normalize_email("  Alice@PGNest.IN "), "alice@pgnest.in");
    }

    #[test]
    fn blank_optional_fields_are_dropped() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some(" 98765 ")).as_deref(), Some("98765"));
    }
}

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::repository::table_service;
use crate::state::AppState;

pub const USERS_TABLE: &str = "app_users";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: i64,
}

/// Caller identity resolved from the session token plus a fresh user-row read,
/// so a role change takes effect without waiting for the token to expire.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AppError::Internal(format!("Could not hash password: {error}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn jwt_secret(state: &AppState) -> AppResult<&str> {
    state.config.jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("JWT_SECRET is not configured. Set it to enable sessions.".to_string())
    })
}

pub fn issue_token(state: &AppState, user_id: &str, role: &str) -> AppResult<String> {
    let secret = jwt_secret(state)?;
    let expires_at = Utc::now() + chrono::Duration::days(state.config.jwt_ttl_days);
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: expires_at.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|error| AppError::Internal(format!("Could not sign session token: {error}")))
}

pub fn decode_token(state: &AppState, token: &str) -> AppResult<Claims> {
    let secret = jwt_secret(state)?;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Session is invalid or expired.".to_string()))
}

pub fn session_cookie_header(state: &AppState, token: &str) -> String {
    let max_age_seconds = state.config.jwt_ttl_days * 24 * 60 * 60;
    build_cookie(
        &state.config.session_cookie_name,
        token,
        max_age_seconds,
        state.config.session_cookie_secure_runtime(),
    )
}

pub fn clear_session_cookie_header(state: &AppState) -> String {
    build_cookie(
        &state.config.session_cookie_name,
        "",
        0,
        state.config.session_cookie_secure_runtime(),
    )
}

fn build_cookie(name: &str, value: &str, max_age_seconds: i64, secure: bool) -> String {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Session token from the cookie, or a `Bearer` Authorization header as a
/// fallback for non-browser clients.
pub fn token_from_headers(state: &AppState, headers: &HeaderMap) -> Option<String> {
    if let Some(raw) = headers
        .get(axum::http::header::COOKIE)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = cookie_value(raw, &state.config.session_cookie_name) {
            if !token.is_empty() {
                return Some(token);
            }
        }
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
}

fn cookie_value(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').map(str::trim).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// The caller's full user row, fetched fresh for every authenticated request.
pub async fn require_user_row(state: &AppState, headers: &HeaderMap) -> AppResult<Value> {
    let token = token_from_headers(state, headers)
        .ok_or_else(|| AppError::Unauthorized("Not authenticated.".to_string()))?;
    let claims = decode_token(state, &token)?;

    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;
    table_service::get_row(pool, USERS_TABLE, &claims.sub, "id")
        .await
        .map_err(|error| match error {
            AppError::NotFound(_) => AppError::Unauthorized("User no longer exists.".to_string()),
            other => other,
        })
}

pub async fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    let row = require_user_row(state, headers).await?;
    let record = row.as_object().cloned().unwrap_or_default();
    Ok(AuthUser {
        id: record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        email: record
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        role: record
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("user")
            .to_string(),
    })
}

pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    let user = require_user(state, headers).await?;
    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required.".to_string()));
    }
    Ok(user)
}

/// Strips the credential before a user row leaves the API.
pub fn sanitize_user(mut row: Value) -> Value {
    if let Some(record) = row.as_object_mut() {
        record.remove("password");
    }
    row
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{
        build_cookie, cookie_value, decode_token, hash_password, issue_token, sanitize_user,
        verify_password,
    };
    use crate::config::AppConfig;
    use crate::state::AppState;

    fn state_with_secret() -> AppState {
        let mut config = AppConfig::from_env();
        config.jwt_secret = Some("unit-test-secret".to_string());
        config.database_url = None;
        AppState::build(config).unwrap()
    }

    #[test]
    fn issues_and_decodes_session_claims() {
        let state = state_with_secret();
        let token = issue_token(&state, "user-1", "admin").unwrap();
        let claims = decode_token(&state, &token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, "admin");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn builds_session_cookie_attributes() {
        let cookie = build_cookie("token", "abc", 604800, false);
        assert_eq!(cookie, "token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800");

        let secure = build_cookie("token", "", 0, true);
        assert_eq!(secure, "token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure");
    }

    #[test]
    fn reads_token_from_cookie_header() {
        assert_eq!(
            cookie_value("a=1; token=xyz; b=2", "token").as_deref(),
            Some("xyz")
        );
        assert_eq!(cookie_value("a=1; b=2", "token"), None);
        assert_eq!(cookie_value("token=only", "token").as_deref(), Some("only"));
    }

    #[test]
    fn verifies_hashed_passwords() {
        let hash = hash_password("pg-rocks-123").unwrap();
        assert!(verify_password("pg-rocks-123", &hash));
        assert!(!verify_password("pg-rocks-124", &hash));
        assert!(!verify_password("pg-rocks-123", "not-a-phc-string"));
    }

    #[test]
    fn sanitizes_credential_from_user_rows() {
        let row = json!({"id": "u1", "email": "a@b.c", "password": "hash"});
        let cleaned = sanitize_user(row);
        assert!(cleaned.get("password").is_none());
        assert_eq!(cleaned.get("email").and_then(|v| v.as_str()), Some("a@b.c"));
    }
}

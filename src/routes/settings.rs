use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::{
    auth::require_admin,
    error::{AppError, AppResult},
    repository::table_service::{create_row, list_rows, update_row},
    schemas::{remove_nulls, serialize_to_map, validate_input, UpdateSettingsInput},
    state::AppState,
};

const SETTINGS_TABLE: &str = "admin_settings";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/admin/settings",
        axum::routing::get(get_settings).put(update_settings),
    )
}

/// Operational settings live in a single row; reads before the first save fall
/// back to the defaults.
async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let settings = match load_settings_row(pool).await? {
        Some(row) => row,
        None => default_settings(),
    };
    Ok(Json(mask_secrets(settings)))
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateSettingsInput>,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let record = remove_nulls(serialize_to_map(&payload));
    if record.is_empty() {
        return Err(AppError::BadRequest("No settings to update.".to_string()));
    }

    let stored = match load_settings_row(pool).await? {
        Some(existing) => {
            let id = existing
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            update_row(pool, SETTINGS_TABLE, &id, &record, "id").await?
        }
        None => create_row(pool, SETTINGS_TABLE, &record).await?,
    };

    tracing::info!(fields = record.len(), "Admin settings updated");
    Ok(Json(mask_secrets(stored)))
}

async fn load_settings_row(pool: &sqlx::PgPool) -> AppResult<Option<Value>> {
    let mut rows = list_rows(pool, SETTINGS_TABLE, None, 1, 0, "created_at", true).await?;
    Ok(rows.pop())
}

/// Mirrors an unsaved settings row: every column present, policy knobs at
/// their defaults, everything else null.
fn default_settings() -> Value {
    json!({
        "gateway_key_id": Value::Null,
        "gateway_key_secret": Value::Null,
        "bank_account_name": Value::Null,
        "bank_account_number": Value::Null,
        "bank_ifsc": Value::Null,
        "payments_enabled": false,
        "single_room_rent": Value::Null,
        "double_room_rent": Value::Null,
        "triple_room_rent": Value::Null,
        "notice_period_days": 30,
        "late_fee": 500.0,
    })
}

/// The gateway secret never leaves the API in full; only the last four
/// characters survive for recognition.
fn mask_secrets(mut settings: Value) -> Value {
    if let Some(record) = settings.as_object_mut() {
        if let Some(secret) = record.get("gateway_key_secret").and_then(Value::as_str) {
            let masked = mask_tail(secret);
            record.insert("gateway_key_secret".to_string(), Value::String(masked));
        }
    }
    settings
}

fn mask_tail(secret: &str) -> String {
    let visible: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("•••{visible}")
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{default_settings, mask_secrets, mask_tail};

    #[test]
    fn defaults_cover_the_policy_knobs() {
        let defaults = default_settings();
        assert_eq!(defaults["notice_period_days"], json!(30));
        assert_eq!(defaults["late_fee"], json!(500.0));
        assert_eq!(defaults["payments_enabled"], json!(false));
        assert!(defaults["gateway_key_secret"].is_null());
        assert!(defaults["single_room_rent"].is_null());
    }

    #[test]
    fn gateway_secret_keeps_only_the_tail() {
        assert_eq!(mask_tail("sk_live_abcdef1234"), "•••1234");
        assert_eq!(mask_tail("abc"), "•••abc");

        let masked = mask_secrets(json!({
            "gateway_key_id": "rzp_test_key",
            "gateway_key_secret": "sk_live_abcdef1234",
        }));
        assert_eq!(masked["gateway_key_secret"], json!("•••1234"));
        assert_eq!(masked["gateway_key_id"], json!("rzp_test_key"));
    }

    #[test]
    fn masking_without_a_secret_is_a_no_op() {
        let masked = mask_secrets(json!({"notice_period_days": 15}));
        assert_eq!(masked["notice_period_days"], json!(15));
        assert!(masked.get("gateway_key_secret").is_none());
    }
}

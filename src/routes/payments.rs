use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{Map, Value};

use crate::{
    auth::{require_admin, require_user},
    error::{AppError, AppResult},
    repository::table_service::list_rows,
    schemas::{clamp_limit, ListQuery, UserPath},
    state::AppState,
};

const PAYMENTS_TABLE: &str = "payments";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/admin/payments", axum::routing::get(list_payments))
        .route(
            "/admin/payments/{user_id}",
            axum::routing::get(tenant_payments),
        )
}

/// Full payment ledger, newest first. Always read live; receipts must not lag
/// behind a cache.
async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let pool = db_pool(&state)?;
    let rows = list_rows(
        pool,
        PAYMENTS_TABLE,
        None,
        clamp_limit(query.limit),
        query.offset.max(0),
        "payment_date",
        false,
    )
    .await?;
    Ok(Json(Value::Array(rows)))
}

/// One tenant's payment history. Tenants can read their own; admins anyone's.
async fn tenant_payments(
    State(state): State<AppState>,
    Path(path): Path<UserPath>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let auth = require_user(&state, &headers).await?;
    if !auth.is_admin() && auth.id != path.user_id {
        return Err(AppError::Forbidden(
            "You can only view your own payments.".to_string(),
        ));
    }
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("user_id".to_string(), Value::String(path.user_id.clone()));
    let rows = list_rows(
        pool,
        PAYMENTS_TABLE,
        Some(&filters),
        clamp_limit(query.limit),
        query.offset.max(0),
        "payment_date",
        false,
    )
    .await?;
    Ok(Json(Value::Array(rows)))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

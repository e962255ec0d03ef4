use axum::{extract::State, http::HeaderMap, Json};
use serde_json::Value;

use crate::{
    auth::require_admin,
    error::{AppError, AppResult},
    repository::table_service::list_rows,
    routes::tenants::fetch_tenant_listing,
    services::{allocation::ROOMS_TABLE, rent_status},
    state::AppState,
};

/// Writes that shift the dashboard numbers invalidate this key.
pub const OVERVIEW_CACHE_KEY: &str = "admin_overview";

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/admin/overview", axum::routing::get(get_overview))
}

/// Dashboard aggregate. Cached for a few seconds because every admin page load
/// requests it; write paths invalidate so it never serves stale counts for long.
async fn get_overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_admin(&state, &headers).await?;

    if let Some(cached) = state.overview_cache.get(OVERVIEW_CACHE_KEY).await {
        return Ok(Json(cached));
    }

    let pool = db_pool(&state)?;
    let tenants = fetch_tenant_listing(pool).await?;
    let rooms = list_rows(pool, ROOMS_TABLE, None, 1000, 0, "room_number", true).await?;
    let summary = rent_status::overview(&tenants, &rooms);

    state
        .overview_cache
        .insert(OVERVIEW_CACHE_KEY.to_string(), summary.clone())
        .await;
    Ok(Json(summary))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db = if let Some(pool) = &state.db_pool {
        // Short timeout keeps the healthcheck responsive even when the first
        // connection hangs (DNS, SSL, TCP).
        match tokio::time::timeout(
            Duration::from_secs(3),
            sqlx::query("SELECT 1").fetch_one(pool),
        )
        .await
        {
            Ok(Ok(_)) => "ok",
            Ok(Err(error)) => {
                tracing::error!(error = %error, "Health check DB query failed");
                "down"
            }
            Err(_) => {
                tracing::error!("Health check DB query timed out (3s)");
                "down"
            }
        }
    } else {
        "not_configured"
    };

    let status = if db == "down" { "degraded" } else { "ok" };
    Json(json!({
        "status": status,
        "now": Utc::now().to_rfc3339(),
        "db": db
    }))
}

use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: Option<PgPool>,
    /// Short-TTL cache for the admin dashboard aggregate; cleared by
    /// room/allocation writes so the dashboard never lags a mutation for long.
    pub overview_cache: Cache<String, Value>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config)?;
        if db_pool.is_none() {
            tracing::warn!(
                "DATABASE_URL is not set — data routes will answer 503 until it is configured"
            );
        }

        let overview_cache = Cache::builder()
            .max_capacity(config.overview_cache_max_entries as u64)
            .time_to_live(Duration::from_secs(config.overview_cache_ttl_seconds))
            .build();

        Ok(Self {
            config,
            db_pool,
            overview_cache,
        })
    }
}

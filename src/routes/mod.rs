use axum::{routing::get, Router};

use crate::state::AppState;

pub mod auth;
pub mod health;
pub mod overview;
pub mod payments;
pub mod rooms;
pub mod settings;
pub mod tenants;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(auth::router())
        .merge(rooms::router())
        .merge(tenants::router())
        .merge(payments::router())
        .merge(settings::router())
        .merge(overview::router())
}

use axum::{routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn admin() -> Router<AppState> {
    Router::new()
        .route("/admin/alerts", get(handlers::alert_stream))
        .route("/admin/notifier", get(handlers::notifier_status))
        .route("/admin/notifier/restart", post(handlers::restart_notifier))
        .route("/admin/notifier/stop", post(handlers::stop_notifier))
}

//! Route table for the gateway.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth", post(handlers::auth))
        .route("/acl", post(handlers::acl))
        .route("/superuser", post(handlers::superuser))
        .route("/publish", post(handlers::publish))
        .route("/telemetry", post(handlers::telemetry))
        .route("/batches", post(handlers::open_batch))
        .route("/batches/:batch_id", get(handlers::batch_progress))
        .route("/batches/:batch_id/processed", post(handlers::mark_processed))
        .route("/batches/:batch_id/purge", get(handlers::batch_purge))
        .with_state(state)
}

pub mod backend;
pub mod cancel;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod limits;
pub mod metrics;
pub mod models;
pub mod service;
pub mod state;
pub mod styles;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use backend::{offline::OfflineBackend, openai::OpenAiBackend, RewriteBackend};
use tracing::{info, warn};

/// Selects the backend once at startup: the live adapter when a credential is
/// configured, otherwise the deterministic offline substitute.
pub fn build_state() -> state::AppState {
    let backend: Arc<dyn RewriteBackend> = match OpenAiBackend::from_env() {
        Ok(Some(live)) => Arc::new(live),
        Ok(None) => {
            info!("no backend credential configured, using offline substitute");
            Arc::new(OfflineBackend::default())
        }
        Err(error) => {
            warn!(error = %error, "live backend construction failed, falling back to offline substitute");
            Arc::new(OfflineBackend::default())
        }
    };

    info!(backend = backend.name(), "rewrite backend configured");
    state::AppState::new(backend)
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/healthz", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/rewrite", post(handlers::rewrite))
        .route("/rewrite/stream", post(handlers::rewrite_stream))
        .route("/rewrite/:request_id/cancel", post(handlers::cancel_rewrite))
        .with_state(state)
}

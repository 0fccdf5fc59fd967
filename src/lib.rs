pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    adapters::openpix::{openpix_webhook_handler, verifier::WebhookVerifier},
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{get, post},
    },
    domain::repository::PaymentRepository,
    std::{sync::Arc, time::Duration},
};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn PaymentRepository>,
    pub verifier: Arc<WebhookVerifier>,
    pub repo_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/webhooks/pix_openpix", post(openpix_webhook_handler))
        .layer(DefaultBodyLimit::max(64 * 1024)) // 64 KB, OpenPix payloads are a few KB
        .with_state(state)
}

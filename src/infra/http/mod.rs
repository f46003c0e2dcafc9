//! HTTP surface: router construction and shared handler state.

mod files;
mod generate;
mod middleware;

use std::sync::Arc;

use axum::{Json, Router, middleware as axum_middleware, routing::get};
use serde_json::json;

use crate::application::delivery::DeliveryService;
use crate::application::pipeline::GenerateService;

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub generate: Arc<GenerateService>,
    pub delivery: Arc<DeliveryService>,
    /// Base for the absolute links returned by the generate endpoint.
    pub public_url: String,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/generate",
            get(generate::generate_query).post(generate::generate_json),
        )
        .route("/resources/{name}", get(files::serve_resource))
        .route("/downloads/{name}", get(files::serve_download))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": "Up and running!",
    }))
}

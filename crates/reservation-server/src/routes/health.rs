//! Liveness route: `GET /v1/health`.
//!
//! Reports the resource types currently served by the plugin registry, so
//! an operator can confirm a deployment's `RESERVATION_PLUGINS` list
//! loaded as expected without reading logs.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Build the `/v1/health` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(health))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    resource_types: Vec<String>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        resource_types: state.plugins.resource_types().map(str::to_owned).collect(),
    })
}

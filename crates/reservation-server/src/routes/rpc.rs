//! Generic RPC passthrough: `POST /v1/rpc/{method}`.
//!
//! Preserves the wire-level `<resource_type>:<method>` convention
//! verbatim — `method` may be a bare orchestrator method name or a
//! colon-joined plugin call, exactly as [`reservation_core::Dispatcher`]
//! expects. The dedicated routes in [`crate::routes::leases`] cover the
//! common lease operations with ergonomic typed bodies; this route exists
//! so the `<type>:<method>` convention itself stays reachable over HTTP.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use axum::routing::post;
use axum::Router;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/rpc` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{method}", post(dispatch))
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let result = state.dispatcher.dispatch(&method, payload).await?;
    Ok(Json(result))
}

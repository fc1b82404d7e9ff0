//! Lease lifecycle routes: `/v1/leases/*`.
//!
//! One handler per orchestrator operation, using typed JSON bodies rather
//! than routing everything through the generic RPC passthrough in
//! [`crate::routes::rpc`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use reservation_core::orchestrator::{CreateLeaseValues, UpdateLeaseValues};
use reservation_core::LeaseView;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/leases` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_leases).post(create_lease))
        .route("/{lease_id}", get(get_lease).patch(update_lease).delete(delete_lease))
        .route("/{lease_id}/events/{event_id}/start", post(start_lease))
        .route("/{lease_id}/events/{event_id}/end", post(end_lease))
        .route("/{lease_id}/events/{event_id}/before-end", post(before_end_lease))
}

#[derive(Debug, Deserialize)]
pub struct ListLeasesQuery {
    /// Accepted for wire compatibility with the RPC `list_leases(project_id?,
    /// query?)` signature but intentionally unused.
    #[serde(default)]
    #[allow(dead_code)]
    pub query: Option<String>,
}

async fn list_leases(
    State(state): State<Arc<AppState>>,
    Query(_params): Query<ListLeasesQuery>,
) -> Result<Json<Vec<LeaseView>>, AppError> {
    let leases = state.orchestrator.list_leases(None).await?;
    Ok(Json(leases))
}

async fn get_lease(
    State(state): State<Arc<AppState>>,
    Path(lease_id): Path<Uuid>,
) -> Result<Json<LeaseView>, AppError> {
    let lease = state.orchestrator.get_lease(lease_id).await?;
    Ok(Json(lease))
}

async fn create_lease(
    State(state): State<Arc<AppState>>,
    Json(values): Json<CreateLeaseValues>,
) -> Result<(StatusCode, Json<LeaseView>), AppError> {
    let lease = state.orchestrator.create_lease(values).await?;
    Ok((StatusCode::CREATED, Json(lease)))
}

async fn update_lease(
    State(state): State<Arc<AppState>>,
    Path(lease_id): Path<Uuid>,
    Json(values): Json<UpdateLeaseValues>,
) -> Result<Json<LeaseView>, AppError> {
    let lease = state.orchestrator.update_lease(lease_id, values).await?;
    Ok(Json(lease))
}

async fn delete_lease(
    State(state): State<Arc<AppState>>,
    Path(lease_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.delete_lease(lease_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replay `start_lease` for a specific event by hand.
///
/// Reachable over RPC but, in practice, only the scheduler
/// normally calls this — exposed so an operator can force a stuck
/// `UNDONE` event through without waiting for the next tick.
async fn start_lease(
    State(state): State<Arc<AppState>>,
    Path((lease_id, event_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    replay_event(&state, lease_id, event_id).await
}

async fn end_lease(
    State(state): State<Arc<AppState>>,
    Path((lease_id, event_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    replay_event(&state, lease_id, event_id).await
}

async fn before_end_lease(
    State(state): State<Arc<AppState>>,
    Path((lease_id, event_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    replay_event(&state, lease_id, event_id).await
}

async fn replay_event(state: &Arc<AppState>, lease_id: Uuid, event_id: Uuid) -> Result<StatusCode, AppError> {
    let event = state
        .store
        .get_event(event_id)
        .await
        .map_err(reservation_core::error::OrchestratorError::from)?;
    if event.lease_id != lease_id {
        return Err(AppError::BadRequest(format!(
            "event {event_id} does not belong to lease {lease_id}"
        )));
    }
    state.executor.execute(&event).await?;
    Ok(StatusCode::NO_CONTENT)
}

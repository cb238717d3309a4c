use crate::domain::models::{ChainHistory, ChainId, CompletedBlock, EmbodimentCheck};
use crate::domain::polyvagal::PolyvagalState;
use crate::state::SharedState;
use crate::web::device::DeviceId;
use crate::web::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/active", post(start_or_resume).delete(end))
        .route("/checks", post(save_check))
        .route("/blocks", post(save_block))
        .route("/:chain_id/history", get(history))
        .with_state(state)
}

#[derive(Serialize)]
struct ActiveChainResponse {
    chain_id: ChainId,
}

#[derive(Deserialize)]
struct CheckPayload {
    slider_value: i32,
    state: Option<PolyvagalState>,
}

#[derive(Deserialize)]
struct CompletedBlockPayload {
    block_id: i64,
    seconds_elapsed: i32,
    order_index: i32,
}

async fn start_or_resume(
    State(state): State<SharedState>,
    DeviceId(device_id): DeviceId,
) -> ApiResult<ActiveChainResponse> {
    let tracker = state.tracker_for(&device_id).await;
    let chain_id = tracker.try_get_or_create_active_chain().await?;
    Ok(Json(ActiveChainResponse { chain_id }))
}

async fn end(State(state): State<SharedState>, DeviceId(device_id): DeviceId) -> StatusCode {
    state.tracker_for(&device_id).await.end_active_chain().await;
    StatusCode::NO_CONTENT
}

async fn save_check(
    State(state): State<SharedState>,
    DeviceId(device_id): DeviceId,
    Json(payload): Json<CheckPayload>,
) -> ApiResult<EmbodimentCheck> {
    let tracker = state.tracker_for(&device_id).await;
    tracker
        .save_embodiment_check(payload.slider_value, payload.state)
        .await
        .map(Json)
        .ok_or_else(ApiError::store_unavailable)
}

async fn save_block(
    State(state): State<SharedState>,
    DeviceId(device_id): DeviceId,
    Json(payload): Json<CompletedBlockPayload>,
) -> ApiResult<CompletedBlock> {
    let tracker = state.tracker_for(&device_id).await;
    tracker
        .save_completed_block(payload.block_id, payload.seconds_elapsed, payload.order_index)
        .await
        .map(Json)
        .ok_or_else(ApiError::store_unavailable)
}

/// Chains are looked up by id alone; the id is only handed to the device
/// that started the chain.
async fn history(
    State(state): State<SharedState>,
    Path(chain_id): Path<Uuid>,
) -> ApiResult<ChainHistory> {
    state
        .chain_history(chain_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("chain {} not found", chain_id)))
}

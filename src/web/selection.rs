use crate::domain::models::Block;
use crate::domain::polyvagal::{clamp_score, score_to_state, PolyvagalState};
use crate::events::EngineEvent;
use crate::state::SharedState;
use crate::web::device::DeviceId;
use crate::web::ApiResult;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/catalog", get(library))
        .route("/select/next", post(next_video))
        .route("/select/sos", post(sos_video))
        .with_state(state)
}

#[derive(Deserialize)]
struct NextVideoPayload {
    slider_value: i32,
    state: Option<PolyvagalState>,
}

async fn library(State(state): State<SharedState>) -> Json<Vec<Block>> {
    let catalog = state.catalog.get_catalog().await;
    Json(state.engine.library_blocks(&catalog))
}

async fn next_video(
    State(state): State<SharedState>,
    device: Option<DeviceId>,
    Json(payload): Json<NextVideoPayload>,
) -> ApiResult<Block> {
    let score = clamp_score(payload.slider_value);
    let polyvagal_state = payload.state.unwrap_or_else(|| score_to_state(score));

    let recent = match &device {
        Some(DeviceId(device_id)) => state.tracker_for(device_id).await.recent_block_ids().await,
        None => Vec::new(),
    };

    let catalog = state.catalog.get_catalog().await;
    let block = state
        .engine
        .select_next_video(&catalog, polyvagal_state, score, &recent)
        .map_err(|e| {
            tracing::warn!("No next video for {} (score {}): {}", polyvagal_state, score, e);
            e
        })?;

    tracing::info!(
        "Selected block {} ({}) for {} at score {}",
        block.id,
        block.canonical_name,
        polyvagal_state,
        score
    );
    Ok(Json(block))
}

async fn sos_video(State(state): State<SharedState>) -> ApiResult<Block> {
    let catalog = state.catalog.get_catalog().await;
    let block = state.engine.select_sos_video(&catalog).map_err(|e| {
        tracing::error!("SOS block unavailable, client must use bundled asset: {}", e);
        e
    })?;
    state
        .events
        .publish(EngineEvent::SosSelected { block_id: block.id });
    Ok(Json(block))
}

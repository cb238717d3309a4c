use crate::domain::models::Block;
use crate::domain::routine::{configured_routines, get_routine_config};
use crate::error::EngineError;
use crate::state::SharedState;
use crate::web::ApiResult;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list))
        .route("/:routine_type/:block_count", get(show))
        .with_state(state)
}

#[derive(Serialize)]
struct RoutineSummary {
    routine_type: &'static str,
    block_count: usize,
}

#[derive(Serialize)]
struct RoutineResponse {
    routine_type: String,
    block_count: usize,
    names: Vec<&'static str>,
    blocks: Vec<Block>,
}

async fn list() -> Json<Vec<RoutineSummary>> {
    Json(
        configured_routines()
            .into_iter()
            .map(|(routine_type, block_count)| RoutineSummary {
                routine_type,
                block_count,
            })
            .collect(),
    )
}

async fn show(
    State(state): State<SharedState>,
    Path((routine_type, block_count)): Path<(String, usize)>,
) -> ApiResult<RoutineResponse> {
    let Some(names) = get_routine_config(&routine_type, block_count) else {
        tracing::warn!("Routine {}/{} requested but not configured", routine_type, block_count);
        return Err(EngineError::ConfigurationMissing {
            routine_type,
            block_count,
        }
        .into());
    };

    let catalog = state.catalog.get_catalog().await;
    let blocks = state
        .engine
        .build_routine(&catalog, &routine_type, block_count)?;

    Ok(Json(RoutineResponse {
        routine_type: routine_type.trim().to_lowercase(),
        block_count,
        names: names.to_vec(),
        blocks,
    }))
}

use crate::domain::polyvagal::PolyvagalState;
use axum::{routing::get, Json, Router};
use serde::Serialize;

pub fn router() -> Router {
    Router::new().route("/states", get(list))
}

#[derive(Serialize)]
struct StateInfo {
    state: PolyvagalState,
    label: &'static str,
    color: &'static str,
    description: &'static str,
    score_floor: i32,
}

/// Check-in slider metadata, ordered from withdrawn to connected.
async fn list() -> Json<Vec<StateInfo>> {
    Json(
        PolyvagalState::ALL
            .iter()
            .map(|state| StateInfo {
                state: *state,
                label: state.label(),
                color: state.color(),
                description: state.description(),
                score_floor: state.score_floor(),
            })
            .collect(),
    )
}

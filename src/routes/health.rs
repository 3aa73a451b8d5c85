use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;
use crate::errors::AppResult;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub lists: usize,
    pub store_ok: bool,
    pub store_error: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let lists = state.executor.schema().lists().count();

    match state.executor.store().ping().await {
        Ok(()) => Ok(Json(HealthResponse { status: "ok", lists, store_ok: true, store_error: None })),
        Err(e) => Ok(Json(HealthResponse { status: "ok", lists, store_ok: false, store_error: Some(e.to_string()) })),
    }
}

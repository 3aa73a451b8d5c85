use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::{cannot_for_item, Operation};
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::SessionContext;
use crate::schema::Item;

#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default, rename = "where")]
    pub where_input: Value,
}

#[derive(Debug, Deserialize)]
pub struct MutationRequest {
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    pub items: Vec<Item>,
}

pub async fn query_items(
    State(state): State<AppState>,
    Path(list_key): Path<String>,
    SessionContext(ctx): SessionContext,
    Json(payload): Json<QueryRequest>,
) -> AppResult<Json<ItemsResponse>> {
    // dropping the handler (client went away) cancels pending rule work
    let _guard = ctx.cancellation_token().clone().drop_guard();

    let items = state.executor.query(&ctx, &list_key, &payload.where_input).await?;
    Ok(Json(ItemsResponse { items }))
}

pub async fn list_items(
    State(state): State<AppState>,
    Path(list_key): Path<String>,
    SessionContext(ctx): SessionContext,
) -> AppResult<Json<ItemsResponse>> {
    let _guard = ctx.cancellation_token().clone().drop_guard();

    let items = state.executor.query(&ctx, &list_key, &Value::Null).await?;
    Ok(Json(ItemsResponse { items }))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path((list_key, id)): Path<(String, String)>,
    SessionContext(ctx): SessionContext,
) -> AppResult<Json<Item>> {
    let _guard = ctx.cancellation_token().clone().drop_guard();

    state
        .executor
        .query_one(&ctx, &list_key, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(cannot_for_item(Operation::Query, &list_key)))
}

pub async fn create_item(
    State(state): State<AppState>,
    Path(list_key): Path<String>,
    SessionContext(ctx): SessionContext,
    Json(payload): Json<MutationRequest>,
) -> AppResult<(StatusCode, Json<Item>)> {
    let _guard = ctx.cancellation_token().clone().drop_guard();

    let item = state.executor.create(&ctx, &list_key, &payload.data).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path((list_key, id)): Path<(String, String)>,
    SessionContext(ctx): SessionContext,
    Json(payload): Json<MutationRequest>,
) -> AppResult<Json<Item>> {
    let _guard = ctx.cancellation_token().clone().drop_guard();

    let item = state.executor.update(&ctx, &list_key, &id, &payload.data).await?;
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path((list_key, id)): Path<(String, String)>,
    SessionContext(ctx): SessionContext,
) -> AppResult<Json<Item>> {
    let _guard = ctx.cancellation_token().clone().drop_guard();

    let item = state.executor.delete(&ctx, &list_key, &id).await?;
    Ok(Json(item))
}

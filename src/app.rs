use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::executor::Executor;
use crate::jwt::JwtConfig;
use crate::routes::{health, items};

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub jwt: Arc<JwtConfig>,
}

impl AppState {
    pub fn new(executor: Executor, jwt: JwtConfig) -> Self {
        Self {
            executor: Arc::new(executor),
            jwt: Arc::new(jwt),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let list_routes = Router::new()
        .route("/query", post(items::query_items))
        .route("/items", get(items::list_items).post(items::create_item))
        .route(
            "/items/:id",
            get(items::get_item).put(items::update_item).delete(items::delete_item),
        );

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/api/lists/:list_key", list_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

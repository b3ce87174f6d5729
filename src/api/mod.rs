// HTTP routes: health, metrics, and the game WebSocket.

pub mod ws;

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::engine::server::GameServer;
use crate::metrics;

#[derive(Clone)]
pub struct AppState {
    pub game_server: Arc<GameServer>,
}

pub fn router(game_server: Arc<GameServer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/ws/game", get(ws::ws_game))
        .with_state(AppState { game_server })
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "bombgrid-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::gather_metrics()
}

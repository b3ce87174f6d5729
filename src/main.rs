use std::sync::Arc;

use tower_http::cors::CorsLayer;

use bombgrid_backend::api;
use bombgrid_backend::config::Config;
use bombgrid_backend::engine::server::GameServer;
use bombgrid_backend::metrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let game_server = GameServer::new(config.tunables.clone());
    tokio::spawn(Arc::clone(&game_server).run_tick_loop());
    tokio::spawn(Arc::clone(&game_server).run_idle_sweep());

    let app = api::router(game_server).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Bombgrid backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

mod config;
mod db;
mod frame;
mod protocol;
mod routes;
mod scene;
mod services;
mod state;

use std::sync::Arc;

use services::store::{MemoryRoomStore, PgRoomStore, RoomStore};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env();
    let port = config.port;

    // Postgres is optional: without it rooms live only as long as the process.
    let store: Arc<dyn RoomStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url).await.expect("database init failed");
            Arc::new(PgRoomStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; rooms are kept in memory only");
            Arc::new(MemoryRoomStore::new())
        }
    };

    let state = state::AppState::new(config, store);

    // Spawn the synchronization tick.
    let _tick = services::tick::spawn_tick_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "edgesync listening");
    axum::serve(listener, app).await.expect("server failed");
}

pub mod error;
pub mod handlers;
pub mod types;

use crate::{
    Result,
    agent::AgentRuntime,
    chat::ChatOrchestrator,
    config::Config,
    llm::OpenAiClient,
    session::ContextStore,
};
use axum::{
    Router,
    routing::{get, post},
};
use handlers::AppState;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:session_id", get(handlers::get_session))
        .with_state(state);

    error::install(router).layer(TraceLayer::new_for_http())
}

pub async fn run(config: Config) -> Result<()> {
    let store = ContextStore::new(&config.sessions.dir);
    let llm = Arc::new(OpenAiClient::new(config.llm.clone()));
    let runtime = Arc::new(AgentRuntime::new(llm));
    let orchestrator = ChatOrchestrator::new(store, runtime, config.llm.model.clone());

    let app = build_router(AppState::new(&config.app.name, orchestrator));

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    info!(
        "Starting {} on {} (sessions in {})",
        config.app.name, addr, config.sessions.dir
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down {}", config.app.name);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

// WeKnora HTTP/SSE server
//
// Per-request flow: a dedicated event bus is created, the stream is
// registered with the stream store, the orchestration (agent loop or RAG
// pipeline) runs on a background task, and the SSE handler forwards every
// event to the live client after persisting it for resumable playback.

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

pub use state::AppState;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/sessions/:session_id/agent", post(handlers::agent_qa))
        .route("/api/v1/sessions/:session_id/qa", post(handlers::knowledge_qa))
        .route("/api/v1/sessions/:session_id/stop", post(handlers::stop))
        .route("/api/v1/sessions/:session_id/stream", get(handlers::continue_stream))
        .route("/api/v1/sessions/:session_id/search", post(handlers::search_knowledge))
        .layer(cors)
        .with_state(state)
}

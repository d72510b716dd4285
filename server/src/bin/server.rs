// WeKnora server entrypoint.
//
// Starts the HTTP/SSE surface with in-memory stores and the chat model
// configured from the environment. The retrieval backend, knowledge-base
// catalog, web search and MCP clients are external collaborators;
// production deployments wire their implementations into `Backends`.
use std::sync::Arc;

use tracing::info;

use weknora_core::config::Config;
use weknora_core::llm::{OpenAiChatModel, StaticModelProvider};
use weknora_core::telemetry;
use weknora_server::state::{Backends, MemoryKbCatalog, UnconfiguredRetrieval};
use weknora_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init_telemetry()?;

    let config_path =
        std::env::var("WEKNORA_CONFIG").unwrap_or_else(|_| "weknora.toml".to_string());
    let config = Config::load(&config_path)?;

    let chat_model = Arc::new(OpenAiChatModel::from_env()?);
    let backends = Backends {
        models: Arc::new(StaticModelProvider::new(chat_model, None)),
        retrieval: Arc::new(UnconfiguredRetrieval),
        catalog: Arc::new(MemoryKbCatalog::new()),
        web_search: None,
        kv: weknora_server::state::default_kv(),
        chunks: None,
        sql: None,
        graph: None,
        mcp_clients: Vec::new(),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, backends).await;
    let app = build_router(state);

    info!(target: "server", addr = %addr, "Starting WeKnora server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    telemetry::shutdown_telemetry();
    Ok(())
}

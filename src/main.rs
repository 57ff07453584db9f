//! Customer support agent
//!
//! An HTTP service driving a tool-augmented language model through a small
//! per-thread state machine: classify the request, let the model call
//! support-desk tools, synthesize an answer, or hand off to a human.

mod api;
mod db;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use db::Database;
use llm::LlmConfig;
use runtime::{
    ConversationRuntime, DatabaseStore, ProductionRuntime, RuntimeConfig, ServiceLlmClient,
    ToolRegistryExecutor,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tools::{McpClient, McpConfig, ToolRegistry};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "support_agent=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Model credentials are required before anything else starts
    let llm_service = match LlmConfig::from_env().build_service() {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "Invalid LLM configuration");
            return Err(e.into());
        }
    };

    // Configuration
    let db_path = std::env::var("SUPPORT_AGENT_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.support-agent/threads.db")
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;

    // Remote support-desk tools
    let mcp_config = McpConfig::from_env();
    tracing::info!(server = %mcp_config.server_url, "Using tool server");
    let tool_server = Arc::new(McpClient::new(&mcp_config)?);
    let registry = ToolRegistry::support_desk(tool_server);

    let runtime_config = RuntimeConfig::from_env();
    tracing::info!(
        max_tool_rounds = runtime_config.max_tool_rounds,
        llm_timeout_secs = runtime_config.llm_timeout.as_secs(),
        tool_timeout_secs = runtime_config.tool_timeout.as_secs(),
        "Runtime configured"
    );

    let runtime: ProductionRuntime = ConversationRuntime::new(
        DatabaseStore::new(db),
        ServiceLlmClient::new(llm_service),
        ToolRegistryExecutor::new(registry),
        runtime_config,
    );

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(runtime))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Support agent listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

mod api;
mod builtin;
mod config;
mod db;
mod logger;
mod mining;
mod models;
mod pipeline;
mod services;
mod utils;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use crate::builtin::{ModelNames, ToolContext, ToolRegistry};
use crate::config::Config;
use crate::services::agent::{AgentService, AgentSettings};
use crate::services::embedding::OpenAiEmbedder;
use crate::services::llm::OpenAiClient;
use crate::services::sentiment::LlmSentimentScorer;
use crate::services::vector_store::QdrantRestStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = match Config::init_global() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = logger::init_logger(cfg) {
        eprintln!("Failed to init logger: {err}");
        std::process::exit(1);
    }

    let store = match db::init_global(cfg).await {
        Ok(store) => store,
        Err(err) => {
            error!("Failed to init session store: {err}");
            std::process::exit(1);
        }
    };

    cfg.print();

    let agent = match build_agent(cfg, store) {
        Ok(agent) => agent,
        Err(err) => {
            error!("Failed to build agent: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = services::agent::init_global(agent) {
        error!("Failed to register agent: {err}");
        std::process::exit(1);
    }

    let app = api::router();

    let host = cfg.host.parse().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(host, cfg.port);
    info!("Server running on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!("Failed to bind: {err}");
            std::process::exit(1);
        }
    };

    let server = axum::serve(listener, app);

    if let Err(err) = server.with_graceful_shutdown(shutdown_signal()).await {
        error!("Server error: {err}");
    }
}

fn build_agent(cfg: &Config, store: Arc<dyn db::WorkspaceStore>) -> Result<AgentService, String> {
    let timeout = Duration::from_secs(cfg.http_timeout_seconds);
    let llm = Arc::new(OpenAiClient::new(
        cfg.openai_api_key.clone(),
        cfg.openai_base_url.clone(),
        timeout,
    )?);
    let embedder = Arc::new(OpenAiEmbedder::new(
        cfg.embedding_api_key.clone(),
        cfg.embedding_base_url.clone(),
        timeout,
    )?);
    let vectors = Arc::new(QdrantRestStore::new(
        cfg.qdrant_url.clone(),
        cfg.qdrant_api_key.clone(),
        timeout,
    )?);
    let sentiment = Arc::new(LlmSentimentScorer::new(llm.clone(), cfg.tool_model.clone()));

    let ctx = ToolContext {
        llm: llm.clone(),
        embedder,
        vectors,
        sentiment,
        models: ModelNames::from_config(cfg),
    };
    info!("[AGENT] tools ready: model={}", cfg.agent_model);
    Ok(AgentService::new(
        llm,
        ToolRegistry::new(ctx),
        store,
        AgentSettings::from_config(cfg),
    ))
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received");
}

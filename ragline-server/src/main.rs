use std::sync::Arc;

use anyhow::Context;
use ragline_core::{
    EmbeddingProvider, HashEmbeddingProvider, InMemoryVectorStore, LlmProvider, MockLlm,
    OpenAIChatProvider, OpenAIEmbeddingProvider, Orchestrator, RagConfig,
};
use ragline_server::server::{ServerConfig, load_env_file, run_server};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var("RAGLINE_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");

    if json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

type Providers = (Arc<dyn EmbeddingProvider>, Arc<dyn LlmProvider>);

fn providers(config: &RagConfig) -> anyhow::Result<Providers> {
    if std::env::var("OPENAI_API_KEY").is_ok_and(|key| !key.is_empty()) {
        let mut embedder = OpenAIEmbeddingProvider::from_env()?;
        if let Ok(model) = std::env::var("RAGLINE_EMBEDDING_MODEL") {
            embedder = embedder.with_model(model);
        }
        let mut llm = OpenAIChatProvider::from_env()?;
        if let Ok(model) = std::env::var("RAGLINE_CHAT_MODEL") {
            llm = llm.with_model(model);
        }
        info!(dimensions = config.embedding_dimension, "using OpenAI providers");
        let embedder = embedder.with_dimensions(config.embedding_dimension);
        return Ok((Arc::new(embedder), Arc::new(llm)));
    }

    warn!("OPENAI_API_KEY is not set, answering with offline hash embeddings and a mock LLM");
    let embedder = HashEmbeddingProvider::new(config.embedding_dimension);
    Ok((Arc::new(embedder), Arc::new(MockLlm::new())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file();
    init_tracing();
    if let Some(path) = env_file {
        info!(path = %path.display(), "loaded environment file");
    }

    let config = RagConfig::from_env().context("invalid RAGLINE_* configuration")?;
    let server = ServerConfig::from_env()?;
    let (embedder, llm) = providers(&config)?;

    let orchestrator = Orchestrator::builder()
        .config(config)
        .embedding_provider(embedder)
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .llm(llm)
        .build()?;

    run_server(server, orchestrator).await
}

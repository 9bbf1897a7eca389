use tracing_subscriber::EnvFilter;

use hybrid_rag::api;
use hybrid_rag::config::Config;
use hybrid_rag::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);
    tracing::info!("Prompt strategy: {:?}", config.pipeline.strategy);

    let state = AppState::new(config.clone())?;

    let indexer = state.clone();
    let indexed = tokio::task::spawn_blocking(move || indexer.rebuild_fulltext()).await??;
    tracing::info!("Full-text index ready ({indexed} documents)");

    // Embeddings are slow; serve lexical results while they build.
    let indexer = state.clone();
    tokio::spawn(async move {
        match indexer.index_vectors().await {
            Ok(added) => tracing::info!("Vector store ready ({added} new embeddings)"),
            Err(e) => tracing::warn!("Vector indexing failed: {e:#}"),
        }
    });

    if state.registry.ensure_loaded().await.is_none() {
        tracing::warn!("Identifier list not loaded yet; /api/health reports unavailable");
    }

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

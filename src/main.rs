use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod directory;
mod error;
mod filters;
mod message;
mod scoring;
mod seed;
mod sentiment;
mod server;
mod store;
#[cfg(test)]
mod testing;
mod thread;
mod views;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the filter reads RUST_LOG; report the outcome once logging is up.
    let dotenv = dotenvy::dotenv();

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        info!("No .env file found or failed to load: {}", e);
    }

    info!("Chatlens starting...");

    let config = config::Config::from_env()?;

    info!("Initializing store at {}", config.db_path.display());
    let store = store::Store::new(&config.db_path).await?;
    store.init().await?;

    if let Some(seed_file) = &config.seed_file {
        info!("Importing seed data from {}", seed_file.display());
        seed::import_file(&store, seed_file).await?;
    }

    if config.llm.api_key.is_none() {
        warn!("GROQ_API_KEY not set, sentiment scoring requests will fail.");
    }
    let scorer: Arc<dyn scoring::Scorer> = Arc::new(scoring::LlmScorer::new(&config.llm)?);

    let orchestrator = sentiment::SentimentOrchestrator::new(
        scorer.clone(),
        Arc::new(store.clone()),
        config.scoring_timeout,
        config.persist_timeout,
    );

    let state = Arc::new(server::AppState {
        store,
        scorer,
        orchestrator,
        directory_timeout: config.directory_timeout,
        scoring_timeout: config.scoring_timeout,
    });
    let app = server::router(state);

    info!("Starting HTTP server on port {}", config.port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}

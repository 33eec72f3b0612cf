use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authrelay::{
    api,
    broker::{spawn_store_watcher, Broker},
    config::BrokerConfig,
    store::{AuthStore, FileStore, MemoryStore},
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authrelay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting authrelay...");

    let config = BrokerConfig::from_env();

    let store: Arc<dyn AuthStore> = match &config.state_file {
        Some(path) => {
            tracing::info!("Persisting auth state to {}", path.display());
            match FileStore::open(path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!("Cannot watch {} ({}), outside edits will not be broadcast", path.display(), e);
                    Arc::new(FileStore::new(path))
                }
            }
        }
        None => {
            tracing::warn!("No AUTHRELAY_STATE_FILE set, auth state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let broker = Arc::new(Broker::with_popup_role(store, &config.popup_role).await);

    // Rebroadcast whenever the canonical state changes
    spawn_store_watcher(broker.clone());

    let app = api::router(broker);

    let addr = config.addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

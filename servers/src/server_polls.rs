use anyhow::{Context, Result};
use lib_polls::{BroadcastHub, IdentityProvider, MemoryPollStore, TokenTable, VoteEngine};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use servers::poll_logic::{config, downstream, logger, state};
use state::{AppState, ServerStore};

#[cfg(feature = "postgres")]
async fn open_store(config: &config::Config) -> Result<ServerStore> {
    match config.db_url.as_deref() {
        Some(url) => {
            let store = lib_polls::store::PgPollStore::connect(url, config.db_max_connections(), config.store_timeout())
                .await
                .context("failed to open PostgreSQL poll store")?;
            Ok(ServerStore::Postgres(store))
        }
        None => {
            warn!("No database URL configured; polls are kept in memory only");
            Ok(ServerStore::Memory(MemoryPollStore::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &config::Config) -> Result<ServerStore> {
    if config.db_url.is_some() {
        warn!("Built without PostgreSQL support; ignoring database URL");
    }
    Ok(ServerStore::Memory(MemoryPollStore::new()))
}

fn open_identity(config: &config::Config) -> Result<Arc<dyn IdentityProvider>> {
    let table = match config.tokens_path.as_deref() {
        Some(path) => {
            let table = TokenTable::load(path).with_context(|| format!("failed to load tokens from {}", path.display()))?;
            info!("Loaded {} API tokens", table.len());
            table
        }
        None => {
            warn!("No tokens file configured; every authenticated request will be rejected");
            TokenTable::new()
        }
    };
    Ok(Arc::new(table))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = config::load_config()?;
    let _log_guard = logger::setup_logging(config.log_dir(), config.log_level())?;

    let store = open_store(&config).await?;
    info!("Using {} poll store", store.backend_name());

    let hub = BroadcastHub::new(config.subscriber_buffer());
    let engine = VoteEngine::new(store, hub).with_store_timeout(config.store_timeout());
    let app_state = AppState::new(engine, open_identity(&config)?);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut downstream_handle = tokio::spawn(downstream::run(config.clone(), app_state.clone(), shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
        result = async { (&mut downstream_handle).await } => {
            // The server stopped on its own, typically a bind failure.
            return result.context("server task panicked")?;
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    downstream_handle.await.context("server task panicked")??;

    info!("Shutdown complete.");
    Ok(())
}

use clap::Parser;
use ledger_core::constants::MAX_DIFFICULTY;
use ledger_core::{Ledger, NodeRegistry, PeerStore};
use ledger_node::{router, AppState, Args, Synchronizer};
use ledger_storage::JsonPeerStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.difficulty > MAX_DIFFICULTY {
        warn!(requested = args.difficulty, max = MAX_DIFFICULTY, "difficulty too high, clamping");
    }
    info!(port = args.port, data_dir = %args.data_dir.display(), store = ?args.store, "starting ledger-node");

    let chain_store = args.open_chain_store()?;
    let ledger: Arc<Ledger> = Arc::new(Ledger::open(chain_store));
    let peer_store: Arc<dyn PeerStore> = Arc::new(JsonPeerStore::open(&args.data_dir)?);
    let registry: Arc<NodeRegistry> = Arc::new(NodeRegistry::open(args.self_addr(), peer_store));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync_task = Synchronizer::new(ledger.clone(), registry.clone(), args.sync_config())
        .spawn(shutdown_rx);

    let state = AppState {
        ledger: ledger.clone(),
        registry: registry.clone(),
        difficulty: args.difficulty,
    };
    let app = router(state);

    let addr = args.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("ledger-node listening on http://{addr} as {}", registry.self_addr());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sync_task.await {
        error!(error = %e, "synchronizer task ended abnormally");
    }
    tokio::task::spawn_blocking(move || {
        ledger.shutdown();
        registry.flush();
    })
    .await?;
    info!("ledger-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

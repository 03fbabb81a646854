use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use coedit_server::config::ServerConfig;
use coedit_server::coordinator::SyncCoordinator;
use coedit_server::rpc;
use coedit_server::store::MetaDb;

const ORPHAN_SWEEP_INTERVAL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load()?;
    let db = MetaDb::open(&config.database_path)
        .with_context(|| {
            format!("failed to open database at {}", config.database_path.display())
        })?
        .into_shared();
    let coordinator = Arc::new(SyncCoordinator::new(db, config.orphan_ttl()));

    let sweeper = Arc::clone(&coordinator);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            ORPHAN_SWEEP_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            sweeper.sweep_orphans(chrono::Utc::now()).await;
        }
    });

    let app = rpc::build_router(coordinator, config.max_frame_bytes);
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting sync server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("sync server exited unexpectedly")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

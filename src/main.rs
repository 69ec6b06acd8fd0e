/// Clip Downloader backend. Downloads YouTube videos with yt-dlp for the
/// clip composer UI and streams progress back over a chunked HTTP response.
///
/// LEARNING: This service owns no database. Its only state is the download
/// directory, which yt-dlp writes into and the cleanup sweep prunes.
/// POST   /api/download       → {videoId, resolution?} → NDJSON progress frames
/// GET    /downloads/{file}   → the downloaded file as an attachment
/// GET    /api/downloads      → {downloads: [{filename, url, size}]}
/// DELETE /api/cleanup        → purge files older than the retention window
///
/// Key Rust concepts used:
/// - Ownership & borrowing (& references)
/// - async/await with tokio
/// - Error handling with Result and ?
/// - Shared state with Arc
/// - Pattern matching with match
mod api;
mod config;
mod coordinator;
mod error;
mod models;
mod process;
mod progress;
mod responder;
mod store;

use anyhow::{Context, Result};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api::AppState;
use config::Config;
use coordinator::DownloadCoordinator;
use store::ArtifactStore;

/// LEARNING: #[tokio::main] transforms main() into an async function.
/// Tokio is the async runtime: it manages the event loop, like asyncio in Python.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::from_env();
    info!("Starting clip downloader backend");

    // Create download directory
    std::fs::create_dir_all(&config.download_dir).with_context(|| {
        format!("creating download dir {}", config.download_dir.display())
    })?;

    let store = ArtifactStore::new(&config.download_dir);
    if let Some(interval) = config.cleanup_interval {
        spawn_periodic_cleanup(store.clone(), config.retention, interval);
    }

    // LEARNING: Arc (Atomic Reference Count) lets every request handler share
    // one coordinator. Arc::clone is cheap, it just increments a counter.
    let coordinator = Arc::new(DownloadCoordinator::new(&config, store));
    let app = api::router(AppState {
        coordinator,
        retention: config.retention,
    });

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("Server listening on http://{}", addr);
    info!("Download directory: {}", config.download_dir.display());
    match config.download_timeout {
        Some(limit) => info!("Download timeout: {}s", limit.as_secs()),
        None => info!("Download timeout: none"),
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}

/// Sweep expired files on a fixed interval, starting immediately.
fn spawn_periodic_cleanup(store: ArtifactStore, retention: Duration, every: Duration) {
    info!(
        "Periodic cleanup every {}s, retention {}h",
        every.as_secs(),
        retention.as_secs() / 3600
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match store.purge_older_than(retention) {
                Ok(report) if !report.removed.is_empty() || !report.failed.is_empty() => info!(
                    "Periodic cleanup removed {}, failed {}",
                    report.removed.len(),
                    report.failed.len()
                ),
                Ok(_) => {}
                Err(e) => error!("Periodic cleanup failed: {}", e),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
    }
    info!("Shutting down");
}

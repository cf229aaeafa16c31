mod config;
mod routes;
mod source;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tally_db::Database;
use tally_engine::{CounterCache, Crawler, CursorCache, EventIngestor};

use crate::config::Config;
use crate::routes::AppStateInner;
use crate::source::HttpSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug,tally_engine=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let cursors = CursorCache::new(db.clone());
    let counters = CounterCache::new(db.clone());
    let source = Arc::new(HttpSource::new(&config.source_url, config.source_token.clone()));
    info!(db = %config.db_path.display(), source = %config.source_url, "Store opened");

    let cancel = CancellationToken::new();

    let crawler = if config.crawler_enabled {
        let crawler = Crawler::new(
            config.crawler.clone(),
            cursors.clone(),
            counters.clone(),
            source.clone(),
            source,
        );
        Some(tokio::spawn(crawler.run(cancel.clone())))
    } else {
        warn!("Backfill crawler disabled, only live events will be counted");
        None
    };

    let (events_tx, events_rx) = mpsc::channel(config.event_queue);
    let ingestor = EventIngestor::new(db, cursors.clone(), counters.clone())
        .spawn(events_rx, cancel.clone());

    let state = Arc::new(AppStateInner {
        counters,
        cursors,
        events: events_tx,
    });
    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Tally listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // The router, and with it the last event sender, is gone by now
    cancel.cancel();
    if let Some(crawler) = crawler {
        if let Err(e) = crawler.await {
            warn!("Crawler task failed: {}", e);
        }
    }
    if let Err(e) = ingestor.await {
        warn!("Event ingestor task failed: {}", e);
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            },
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
    // Stop background work while open connections finish
    cancel.cancel();
}

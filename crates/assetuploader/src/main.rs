//! assetuploader: signed-URL asset uploads with deferred confirmation.
//!
//! Subcommands:
//! - `serve`: HTTP API plus the periodic confirmation scheduler

use std::sync::Arc;

use assetuploader::config::{Cli, Commands, ServeArgs};
use assetuploader::{AppState, AssetManager, MemoryStorage, create_router};
use assetuploader_scheduler::{JobStore, PeriodicScheduler};
use clap::Parser;
use miette::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "assetuploader=info,assetuploader_scheduler=info,tower_http=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_server(args).await,
    }
}

async fn run_server(args: ServeArgs) -> Result<()> {
    let store = JobStore::spawn(args.bucket_granularity);
    let scheduler = Arc::new(PeriodicScheduler::start(store.clone(), args.tick_interval()));

    let storage = Arc::new(MemoryStorage::new());
    storage.create_bucket(&args.bucket).await;

    let manager = AssetManager::new(storage.clone(), scheduler.clone(), args.put_expiration());
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState {
        manager,
        storage,
        store: store.clone(),
        bucket: args.bucket.clone(),
        shutdown: shutdown.clone(),
    });
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .map_err(|e| miette::miette!("failed to bind port {}: {}", args.port, e))?;

    tracing::info!(
        bucket = %args.bucket,
        region = %args.region,
        granularity = %args.bucket_granularity,
        "asset uploader listening on http://0.0.0.0:{}",
        args.port
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    scheduler.stop().await;
    store.shutdown().await;

    Ok(())
}

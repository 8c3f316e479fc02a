//! cirrus fleetd
//!
//! Fleet service daemon. Builds the provider client, discovers the image's
//! pre-existing instances, and serves the read-only listing API while the
//! per-resource action queue drives lifecycle work in the background.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use cirrus_provider::{CloudClient, MockCloud};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cirrus_fleet::api::{self, AppState};
use cirrus_fleet::{ActionQueue, Config, VmImage};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to CIRRUS_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting cirrus fleet service");
    info!(
        listen_addr = %config.listen_addr,
        image = %config.image.image_name,
        key = %config.image.queue_key(),
        "Configuration loaded"
    );

    // Provider client (mock for now; real SDK bindings slot in here)
    let cloud = Arc::new(MockCloud::new());
    cloud.add_subscription("sub-primary", "Primary subscription");
    let client: Arc<dyn CloudClient> = cloud;

    // Action queue and image, seeded from provider-side discovery
    let queue = ActionQueue::new(config.poll.clone());
    let image = match VmImage::new(config.image.clone(), Arc::clone(&client), queue).await {
        Ok(image) => image,
        Err(e) => {
            error!(error = %e, "Failed to construct image");
            return Err(e.into());
        }
    };

    let mut images = HashMap::new();
    images.insert(image.name().to_string(), image);

    let state = AppState {
        client,
        images: Arc::new(images),
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Build and run the server
    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown and give in-flight work a moment to settle
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    info!("Fleet service shutdown complete");
    Ok(())
}

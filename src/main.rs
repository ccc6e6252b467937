//! SoftAP Provisioning Service - Main Entry Point

use std::sync::Arc;

use clap::Parser;
use softap_provisioner::{
    backend::WifiCtrlBackend,
    config::{CliArgs, Settings},
    core::supervisor::Supervisor,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Passphrase length accepted by WPA/WPA2 personal
const WPA_PASSPHRASE_LEN: std::ops::RangeInclusive<usize> = 8..=63;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,softap_provisioner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    let settings = Settings::from(args);
    info!(?settings, "Starting SoftAP provisioning service");

    // Validate configuration
    if settings.ap_auth_mode.requires_password()
        && !WPA_PASSPHRASE_LEN.contains(&settings.ap_password.len())
    {
        error!("Access point password must be 8 to 63 characters for WPA");
        return Err("Invalid access point password".into());
    }

    if settings.ap_max_clients == 0 {
        error!("Access point must allow at least one client");
        return Err("Invalid access point client limit".into());
    }

    // Create radio backend
    let backend = Arc::new(
        WifiCtrlBackend::new(settings.interface.clone(), settings.ap_interface.clone()).await?,
    );
    info!(
        "Radio backend initialized for station {} and access point {}",
        settings.interface, settings.ap_interface
    );

    let supervisor = Supervisor::new(backend, settings);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, shutting down gracefully");
        }
        result = supervisor.run() => {
            if let Err(e) = result {
                error!("Service stopped: {}", e);
                return Err(e.into());
            }
        }
    }

    info!("Shutting down...");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}

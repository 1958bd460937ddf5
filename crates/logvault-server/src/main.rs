//! Logvault Backup Server
//!
//! Main entry point for the backup server: accepts streamed segment writes
//! from masters, persists them to frame storage, and serves per-partition
//! recovery data when a master fails.
//!
//! ## Configuration
//! All configuration is done via environment variables:
//!
//! ### Server settings
//! - `LOGVAULT_ADDR`: bind address (default: 0.0.0.0:12247)
//! - `LOGVAULT_SERVER_ID`: this backup's server id (default: 1)
//! - `LOGVAULT_COORDINATOR`: coordinator locator (default: 127.0.0.1:12246)
//!
//! ### Storage settings
//! - `LOGVAULT_STORAGE`: frame file path, or `:memory:` (default: :memory:)
//! - `LOGVAULT_SEGMENT_SIZE`: segment/frame size in bytes (default: 8388608)
//! - `LOGVAULT_FRAME_COUNT`: number of frames (default: 256)
//! - `LOGVAULT_POOL_CAPACITY`: staging buffers (default: 16)
//! - `LOGVAULT_RECOVERY_DEADLINE_MS`: recovery read wait bound (default: 10000)
//!
//! ## Logging
//! Controlled via `RUST_LOG` (tracing-subscriber env filter):
//! ```bash
//! RUST_LOG=debug cargo run -p logvault-server
//! ```
//!
//! ## gRPC Reflection
//! The server registers a reflection service, so the protocol can be
//! explored without the proto files:
//! ```bash
//! grpcurl -plaintext localhost:12247 list
//! ```

use std::sync::Arc;

use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;

use logvault_server::{pb::backup_server::BackupServer, BackupService, ServerList};
use logvault_storage::{BackupConfig, BackupEngine};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Configuration
    let bind_addr = std::env::var("LOGVAULT_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:12247".to_string())
        .parse()?;
    let server_id: u64 = env_or("LOGVAULT_SERVER_ID", 1);

    let defaults = BackupConfig::default();
    let config = BackupConfig {
        segment_size: env_or("LOGVAULT_SEGMENT_SIZE", defaults.segment_size),
        frame_count: env_or("LOGVAULT_FRAME_COUNT", defaults.frame_count),
        pool_capacity: env_or("LOGVAULT_POOL_CAPACITY", defaults.pool_capacity),
        coordinator_locator: std::env::var("LOGVAULT_COORDINATOR")
            .unwrap_or(defaults.coordinator_locator),
        storage_path: std::env::var("LOGVAULT_STORAGE").unwrap_or(defaults.storage_path),
        recovery_read_deadline_ms: env_or(
            "LOGVAULT_RECOVERY_DEADLINE_MS",
            defaults.recovery_read_deadline_ms,
        ),
    };

    tracing::info!(
        server_id,
        segment_size = config.segment_size,
        frame_count = config.frame_count,
        pool_capacity = config.pool_capacity,
        storage = %config.storage_path,
        coordinator = %config.coordinator_locator,
        "starting logvault backup server"
    );

    let engine = Arc::new(BackupEngine::new(config)?);
    let cluster = Arc::new(ServerList::new());
    let service = BackupService::new(Arc::clone(&engine), cluster, server_id);

    // Set up reflection service
    let descriptor_bytes = include_bytes!("../proto/backup_descriptor.bin");
    let reflection_service = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(descriptor_bytes)
        .build()?;

    // Graceful shutdown: persist open segments before exiting, so a master
    // that believed its bytes were replicated is not betrayed by a restart.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let shutdown_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            },
            _ = terminate => {
                tracing::info!("received SIGTERM, shutting down");
            },
        }

        shutdown_engine.shutdown().await;
        let _ = shutdown_tx.send(());
    });

    tracing::info!(%bind_addr, "backup server listening");
    Server::builder()
        .add_service(BackupServer::new(service))
        .add_service(reflection_service)
        .serve_with_shutdown(bind_addr, async {
            shutdown_rx.await.ok();
        })
        .await?;

    tracing::info!("backup server shut down");
    Ok(())
}

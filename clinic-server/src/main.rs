//! clinic-server entry point

use clinic_core::PlaintextCipher;
use clinic_store::{AuditLog, SqliteStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinic_server::{
    build_router,
    config::{LogFormat, ServerConfig},
    AppState,
};

#[tokio::main]
async fn main() {
    let config_path = std::path::Path::new("config.yaml")
        .exists()
        .then_some("config.yaml");
    let config = ServerConfig::load(config_path);

    // Logging needs the config, so a config error is reported after init
    let log = config.as_ref().map(|c| c.log.clone()).unwrap_or_default();
    init_tracing(&log.level, log.format);

    let config = config.unwrap_or_else(|e| {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    });

    tracing::info!("Starting clinic-server...");

    // Create data directory
    if let Err(e) = std::fs::create_dir_all(&config.storage.data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        std::process::exit(1);
    }

    // Initialize stores
    let store = SqliteStore::open(config.documents_db_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open document store: {}", e);
        std::process::exit(1);
    });

    let audit_log = AuditLog::open(config.audit_db_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to open audit log: {}", e);
        std::process::exit(1);
    });

    let cipher =
        PlaintextCipher::new(config.storage.blind_index_key.as_bytes()).unwrap_or_else(|e| {
            tracing::error!(
                "PHI cipher unavailable ({}); set storage.blind_index_key or CLINIC_BLIND_INDEX_KEY",
                e
            );
            std::process::exit(1);
        });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let auth_enabled = config.auth.enabled;
    let tenant_count = config.tenants.len();

    let state = AppState::new(
        store,
        Arc::new(audit_log),
        Arc::new(cipher),
        config,
    )
    .unwrap_or_else(|e| {
        tracing::error!("Failed to initialize application state: {}", e);
        std::process::exit(1);
    });

    tracing::info!(
        "Auth: {}",
        if auth_enabled {
            "enabled"
        } else {
            "disabled (X-Tenant-Id header)"
        }
    );
    tracing::info!("Tenants: {}", tenant_count);

    // Build router
    let app = build_router(Arc::new(state));

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Server error: {}", e);
    });

    tracing::info!("Server shut down gracefully");
}

/// RUST_LOG wins over the configured level
fn init_tracing(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

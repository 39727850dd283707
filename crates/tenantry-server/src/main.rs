//! Tenantry Server
//!
//! Hosts many entities (tenants, products, regions, ...) in one process:
//! - Loads entity definitions from a YAML/TOML file and re-reads it on change
//! - Discovers and loads every entity under the entities directory at startup
//! - Resolves the entity of each request and attaches its context
//! - Serves the admin JSON API and health/metrics endpoints
//!
//! Usage:
//! ```bash
//! # With config file
//! tenantry-server --config server.yaml
//!
//! # Environment variables override the file, CLI flags override both
//! TENANTRY_ENTITIES_DIR=/srv/entities tenantry-server --config server.yaml --port 8080
//! ```
//!
//! Inspect with:
//! ```bash
//! curl http://localhost:3000/admin/entities
//! curl -X POST http://localhost:3000/admin/entities/tenant/acme/reload
//! curl http://localhost:3000/readyz
//! ```

mod admin;
mod builtins;
mod config;
mod host;
mod middleware;

use axum::{Json, Router, extract::Request, routing::get};
use clap::Parser;
use config::ServerConfig;
use futures::StreamExt;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tenantry_config_file::FileConfigStore;
use tenantry_core::{CatalogModuleLoader, EntityContext};
use tenantry_observability::{HealthState, Metrics, health_router};
use tenantry_runtime::EntityManager;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Tenantry Server - multi-entity runtime host
#[derive(Parser)]
#[command(name = "tenantry-server")]
#[command(about = "Multi-tenant entity resolution and lifecycle server", long_about = None)]
#[command(version = env!("VERSION"))]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "TENANTRY_CONFIG")]
    config: Option<String>,

    /// Address to bind
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        ServerConfig::from_file(config_path)?
    } else {
        ServerConfig::default()
    };
    config.merge_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    // Initialize tracing
    let log_level = config.logging.level.clone();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        "🚀 Tenantry server {} ({}) starting",
        env!("VERSION"),
        env!("SHA")
    );
    if let Some(path) = &cli.config {
        info!("📁 Loaded configuration from: {}", path);
    }

    // Entity definitions
    let store = Arc::new(FileConfigStore::new(&config.entities_config).await?);
    info!(
        "📋 Entity definitions from {} (version {})",
        store.path().display(),
        store.version()
    );

    // Observability
    let metrics = Arc::new(Metrics::new()?);

    // Native components referenced by `{ native: "<name>" }` exports
    let catalog = builtins::builtin_catalog();
    info!("🧩 {} native components available", catalog.len());
    let host = Arc::new(host::AxumHost::new());

    let manager = Arc::new(
        EntityManager::builder(
            config.runtime.clone(),
            store.clone(),
            host.clone(),
            Arc::new(CatalogModuleLoader::new(catalog)),
        )
        .metrics(metrics.clone())
        .build(),
    );

    let report = manager.load_all_from_disk().await?;
    info!(
        "✓ Loaded {} entities ({} skipped, {} failed)",
        report.loaded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (path, message) in &report.failed {
        warn!("   - {}: {}", path, message);
    }

    spawn_config_watcher(store.clone(), manager.clone(), metrics.clone());

    // Routers
    let health_state = HealthState::with_readiness_checker(metrics.clone(), manager.clone());
    let mut app = Router::new()
        .route("/", get(whoami))
        .layer(axum::middleware::from_fn_with_state(
            manager.clone(),
            middleware::entity_middleware,
        ))
        .merge(health_router(health_state));
    if config.admin.enabled {
        app = app.merge(admin::admin_router(admin::AdminState {
            manager: manager.clone(),
            host,
        }));
    }
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("");
    info!("✅ Tenantry listening on http://{}", addr);
    if config.admin.enabled {
        info!("   - Admin API:          http://{}/admin/entities", addr);
    }
    info!("   - Health check:       http://{}/healthz", addr);
    info!("   - Readiness check:    http://{}/readyz", addr);
    info!("   - Prometheus metrics: http://{}/metrics", addr);
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Entity resolved for the current request, if any
async fn whoami(req: Request) -> Json<serde_json::Value> {
    match req.extensions().get::<Arc<EntityContext>>() {
        Some(context) => Json(json!({"entity": context.summary()})),
        None => Json(json!({"entity": null})),
    }
}

/// Reload entity definitions whenever the config file changes
fn spawn_config_watcher(
    store: Arc<FileConfigStore>,
    manager: Arc<EntityManager>,
    metrics: Arc<Metrics>,
) {
    let mut changes = match store.watch_changes() {
        Ok(changes) => changes,
        Err(e) => {
            warn!("Config file watching disabled: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            match change {
                Ok(_) => match store.reload().await {
                    Ok(version) => {
                        metrics.record_config_reload();
                        manager.invalidate_identification();
                        info!("🔄 Entity definitions reloaded (version {})", version);
                    }
                    Err(e) => error!("Failed to reload entity definitions: {}", e),
                },
                Err(e) => warn!("Config watch error: {}", e),
            }
        }
    });
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

//! Ordo Sync - local-first sync daemon.
//!
//! Keeps the local task database in step with the shape endpoint and serves
//! a small HTTP control surface for inspecting state and resolving conflicts.

use ordo_sync_client::{
    app, store, AppState, Config, ElectricTransport, SqliteStore, SyncEvent, SyncOrchestrator,
};
use ordo_sync_engine::Task;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ordo_sync_client=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        endpoint = %config.sync.endpoint_url,
        tables = ?config.sync.tables,
        "Starting Ordo Sync on {}:{}",
        config.host,
        config.port
    );

    // Create database pool
    let pool = store::create_pool(&config.database_url).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    store::run_migrations(&pool).await?;

    let transport = ElectricTransport::new(&config.sync)?;
    let orchestrator = Arc::new(
        SyncOrchestrator::<Task>::builder(
            config.sync.clone(),
            Arc::new(SqliteStore::new(pool)),
            Arc::new(transport),
        )
        .observer(Arc::new(|event: &SyncEvent| {
            tracing::debug!(event = event.kind(), "Sync event");
        }))
        .build(),
    );

    // Serve the control surface even when the endpoint is down, so restart works
    if let Err(err) = orchestrator.initialize().await {
        tracing::error!("Sync did not start: {}", err);
    }

    let app = app(AppState {
        orchestrator: orchestrator.clone(),
    });

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Control server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
        })
        .await?;

    orchestrator.shutdown().await;
    tracing::info!("Shut down cleanly");

    Ok(())
}

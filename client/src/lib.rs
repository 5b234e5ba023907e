//! # Ordo Sync Client
//!
//! Keeps a local SQLite task store in step with a remote shape log.
//!
//! The [`SyncOrchestrator`] opens one shape subscription per configured
//! table, routes every incoming operation through the
//! [`Resolver`](ordo_sync_engine::Resolver) inside a store transaction, and
//! exposes the aggregate [`SyncState`](ordo_sync_engine::SyncState) plus
//! lifecycle events to observers.
//!
//! ## Layout
//!
//! - [`store`] - the [`LocalStore`] capability and its SQLite implementation
//! - [`shape`] - shape transports, subscription handles and their registry
//! - [`orchestrator`] - lifecycle, conflict bookkeeping and the real-time monitor
//! - [`events`] - observer surface
//! - [`writer`] - pushes pending local changes upstream
//! - [`routes`] - HTTP control surface used by the `ordo-sync` binary

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod routes;
pub mod shape;
pub mod store;
pub mod writer;

pub use config::{Config, ConfigError, SyncConfig};
pub use error::{ApiError, StoreError, SyncError, SyncResult, TransportError};
pub use events::{EventBus, SyncEvent, SyncObserver};
pub use orchestrator::{
    IntervalTicker, Lifecycle, SyncOrchestrator, SyncOrchestratorBuilder, Ticker, TickerFactory,
};
pub use shape::{
    ChannelTransport, ElectricTransport, ShapeDescriptor, ShapeTransport, SubscriptionHandle,
    SubscriptionRegistry,
};
pub use store::{LocalStore, RefetchPolicy, SqliteStore, TableStats};
pub use writer::{ChangePusher, HttpChangePusher, PushReport};

use axum::Router;
use ordo_sync_engine::Task;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator<Task>>,
}

/// Build the control router with its layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

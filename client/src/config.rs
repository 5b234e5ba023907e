//! Configuration management for the sync client.

use crate::shape::ShapeDescriptor;
use ordo_sync_engine::ConflictStrategy;
use std::{env, time::Duration};

/// Settings for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the shape endpoint
    pub endpoint_url: String,
    /// Source identifier sent with every shape request
    pub source_id: Option<String>,
    /// Source secret sent with every shape request
    pub secret: Option<String>,
    pub conflict_resolution: ConflictStrategy,
    /// Monitor interval for up-to-date transitions
    pub sync_interval: Duration,
    pub enable_real_time_sync: bool,
    /// Bound on the connectivity probe during initialization
    pub probe_timeout: Duration,
    /// Bound on waiting for the first table's initial sync; `None` waits indefinitely
    pub initial_sync_timeout: Option<Duration>,
    /// Tables to subscribe to, in order
    pub tables: Vec<String>,
    /// Base URL of the server accepting local changes
    pub write_server_url: Option<String>,
}

impl SyncConfig {
    pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(5000);
    pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Defaults for everything but the endpoint.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            source_id: None,
            secret: None,
            conflict_resolution: ConflictStrategy::default(),
            sync_interval: Self::DEFAULT_SYNC_INTERVAL,
            enable_real_time_sync: true,
            probe_timeout: Self::DEFAULT_PROBE_TIMEOUT,
            initial_sync_timeout: None,
            tables: vec!["tasks".to_string()],
            write_server_url: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_resolution = strategy;
        self
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_real_time_sync(mut self, enabled: bool) -> Self {
        self.enable_real_time_sync = enabled;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_initial_sync_timeout(mut self, timeout: Duration) -> Self {
        self.initial_sync_timeout = Some(timeout);
        self
    }

    /// One shape per configured table, keyed by table name.
    pub fn shapes(&self) -> Vec<ShapeDescriptor> {
        self.tables.iter().map(ShapeDescriptor::new).collect()
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control server host address
    pub host: String,
    /// Control server port
    pub port: u16,
    /// SQLite connection URL
    pub database_url: String,
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://ordo.db".to_string());

        let endpoint_url = lookup("ORDO_SYNC_ENDPOINT_URL").ok_or(ConfigError::MissingEndpointUrl)?;
        let mut sync = SyncConfig::new(endpoint_url.trim_end_matches('/'));

        sync.source_id = lookup("ORDO_SYNC_SOURCE_ID");
        sync.secret = lookup("ORDO_SYNC_SECRET");
        sync.write_server_url = lookup("ORDO_WRITE_SERVER_URL");

        if let Some(raw) = lookup("ORDO_SYNC_CONFLICT_RESOLUTION") {
            sync.conflict_resolution = raw.parse()?;
        }

        if let Some(raw) = lookup("ORDO_SYNC_INTERVAL_MS") {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidInterval)?;
            if ms == 0 {
                return Err(ConfigError::InvalidInterval);
            }
            sync.sync_interval = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup("ORDO_SYNC_REALTIME") {
            sync.enable_real_time_sync = parse_bool(&raw)
                .ok_or_else(|| ConfigError::InvalidBool("ORDO_SYNC_REALTIME".to_string()))?;
        }

        if let Some(raw) = lookup("ORDO_SYNC_PROBE_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidTimeout)?;
            if secs == 0 {
                return Err(ConfigError::InvalidTimeout);
            }
            sync.probe_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("ORDO_SYNC_TABLES") {
            let tables: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
            if tables.is_empty() {
                return Err(ConfigError::NoTables);
            }
            sync.tables = tables;
        }

        Ok(Self {
            host,
            port,
            database_url,
            sync,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ORDO_SYNC_ENDPOINT_URL environment variable is required")]
    MissingEndpointUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("ORDO_SYNC_INTERVAL_MS must be a positive number of milliseconds")]
    InvalidInterval,

    #[error("ORDO_SYNC_PROBE_TIMEOUT_SECS must be a positive number of seconds")]
    InvalidTimeout,

    #[error("{0} must be a boolean")]
    InvalidBool(String),

    #[error("ORDO_SYNC_TABLES must name at least one table")]
    NoTables,

    #[error(transparent)]
    InvalidStrategy(#[from] ordo_sync_engine::Error),
}

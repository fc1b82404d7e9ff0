//! Server configuration for the reservation manager.
//!
//! Loads configuration from environment variables with sensible defaults,
//! all under a `RESERVATION_*` prefix.

use std::net::SocketAddr;

use reservation_core::ManagerConfig;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend selection.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g. `info`, `debug`, `warn`).
    pub log_level: String,
    /// How often the event scheduler ticks.
    pub event_interval_secs: u64,
    /// Plugin names to load, in configured order.
    pub plugins: Vec<String>,
    /// Domain-level tunables shared with `reservation-core`
    /// (`minutes_before_end_lease`, `event_max_retries`).
    pub manager: ManagerConfig,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `PostgreSQL` persistent storage.
    Postgres { url: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (Railway convention, binds `0.0.0.0`)
    /// - `RESERVATION_BIND_ADDR` — full bind address (overrides `PORT`,
    ///   default `127.0.0.1:8280`)
    /// - `RESERVATION_STORAGE` — `memory` or `postgres` (default `memory`)
    /// - `DATABASE_URL` — `PostgreSQL` connection string, required when
    ///   `RESERVATION_STORAGE=postgres`
    /// - `RESERVATION_LOG_LEVEL` — log filter (default `info`)
    /// - `RESERVATION_EVENT_INTERVAL_SECS` — scheduler tick period (default
    ///   `10`)
    /// - `RESERVATION_PLUGINS` — comma-separated plugin names (default
    ///   `dummy.vm.plugin`)
    /// - `RESERVATION_MINUTES_BEFORE_END_LEASE` — default `60`
    /// - `RESERVATION_EVENT_MAX_RETRIES` — default `1`, clamped to
    ///   `[0, 50]`
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = if let Ok(addr) = std::env::var("RESERVATION_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8280)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8280);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8280))
        };

        let storage_backend = match std::env::var("RESERVATION_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/reservation_manager".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = std::env::var("RESERVATION_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let event_interval_secs = std::env::var("RESERVATION_EVENT_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let plugins = std::env::var("RESERVATION_PLUGINS")
            .unwrap_or_else(|_| reservation_plugins::DUMMY_VM_PLUGIN.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        let minutes_before_end_lease = std::env::var("RESERVATION_MINUTES_BEFORE_END_LEASE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let event_max_retries = std::env::var("RESERVATION_EVENT_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
            .clamp(0, 50);

        Self {
            bind_addr,
            storage_backend,
            log_level,
            event_interval_secs,
            plugins,
            manager: ManagerConfig {
                minutes_before_end_lease,
                event_max_retries,
            },
        }
    }
}

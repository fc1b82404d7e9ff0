//! Reservation manager HTTP server.
//!
//! Wires `reservation-core`'s domain library and `reservation-storage`'s
//! backend into a running Axum server: the `/v1/leases/*` REST surface,
//! the `/v1/rpc/:method` passthrough, and the background scheduler tick.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

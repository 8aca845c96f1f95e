//! # Fleetstream - Real-Time Fleet Telemetry Service
//!
//! Fleetstream subscribes to an MQTT broker for vehicle telemetry, validates
//! and enriches each message, keeps an in-memory last-known-state cache per
//! vehicle, persists raw events plus time-bucketed rollups to SQLite, and
//! fans live updates out to WebSocket subscribers while serving HTTP and
//! gRPC queries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetstream::{Config, server};
//!
//! # async fn run() -> fleetstream::Result<()> {
//! let config = Config::default();
//! server::serve(config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! A single message flows broker → ingest pipeline → (vehicle cache, rate
//! window, telemetry store) → live fan-out → subscribers. Query callers read
//! from the cache and the store only.
//!
//! - **Ingest**: [`pipeline::IngestPipeline`] driven by [`broker`]
//! - **State**: [`cache::VehicleCache`] with capacity eviction and TTL expiry
//! - **Durability**: [`store::TelemetryStore`] with incremental rollups
//! - **Distribution**: [`fanout::FanoutHub`] over WebSocket, [`rpc`] over gRPC
//! - **Queries**: [`http`] and [`rpc`] surfaces

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod fanout;
pub mod geo;
pub mod http;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod ratewindow;
pub mod rpc;
pub mod server;
pub mod store;
pub mod validate;

// Re-export the main public API
pub use crate::config::Config;
pub use crate::error::{FleetError, Result};
pub use crate::model::{EngineStatus, EnrichedVehicle, Position, TelemetryRecord, VehicleId};
pub use crate::store::TelemetryStore;

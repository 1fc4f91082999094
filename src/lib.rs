//! # ROV Link
//!
//! Shared-state and communication core for a remotely operated underwater
//! vehicle: a surface control station and a vehicle-side controller
//! exchange control and telemetry data over unreliable TCP and serial
//! links, with automatic reconnection and physical safety limits applied
//! before actuator commands leave the process.
//!
//! ## Features
//!
//! - **Shared store**: partitioned latest-value store with ramped actuator
//!   writes and a read-time current safeguard
//! - **Device links**: self-healing JSON-per-line channels over serial and
//!   TCP, with explicit error classification
//! - **Dispatch server**: single-client control socket relaying the store
//!   to and from every peripheral link
//! - **Video transport**: ack-gated opaque frame streaming per camera
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rovlink::config::VehicleConfig;
//! use rovlink::server::DispatchServer;
//! use rovlink::store::Store;
//! use rovlink::topology::Topology;
//!
//! # async fn run() -> Result<(), rovlink::server::ServerError> {
//! let store = Arc::new(Store::new(Topology::vehicle()));
//! let server = DispatchServer::start(store, &VehicleConfig::default()).await?;
//! server.serve().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`store`] - partitioned shared store and scalar values
//! - [`topology`] - static key layout: partitions, transmission sets
//! - [`safeguard`] - current-draw model and scaling transform
//! - [`protocol`] - JSON-per-line wire format
//! - [`link`] - link state machine and serial device links
//! - [`server`] - vehicle-side dispatch server
//! - [`surface`] - surface-station connection client
//! - [`video`] - per-camera frame transport

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod link;
pub mod protocol;
pub mod safeguard;
pub mod server;
pub mod store;
pub mod surface;
pub mod topology;
pub mod video;

// Re-export the main public types for convenience
pub use link::{CycleOutcome, LinkError, LinkState, SerialLink};
pub use server::DispatchServer;
pub use store::{Scalar, Snapshot, Store};
pub use surface::Connection;
pub use topology::{Partition, PeripheralId, Topology};

//! # vigil-server
//!
//! Axum `WebSocket` server streaming live telemetry to subscribed clients.
//!
//! - Channel registry and per-subscriber fan-out with bounded, drop-oldest queues
//! - Client sessions: handshake, capability-gated requests, heartbeat, teardown
//! - Parameters, services, assets and the connection graph, bridged to the application
//! - HTTP side routes: `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod assets;
pub mod broadcast;
pub mod channel;
pub mod client;
pub mod config;
pub mod connection_graph;
pub mod dispatcher;
mod handler;
pub mod health;
pub mod heartbeat;
pub mod listener;
pub mod metrics;
pub mod notifier;
pub mod parameters;
pub mod queue;
pub mod registry;
pub mod server;
pub mod service;
mod session;
pub mod shutdown;
mod state;

pub use assets::{AssetHandler, asset_handler_fn};
pub use broadcast::{MessageMeta, PublishStats, RecordingSink};
pub use channel::{Channel, LogOptions};
pub use client::ClientChannel;
pub use config::ServerConfig;
pub use connection_graph::ConnectionGraph;
pub use listener::ServerListener;
pub use server::{ServerHandle, VigilServer};
pub use service::{MessageSchema, Service, ServiceHandler, ServiceRequest, ServiceSchema};

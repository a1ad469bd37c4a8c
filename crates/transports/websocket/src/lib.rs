//! WebSocket transport for Matchpoint
//!
//! Each connection becomes one coordinator session. Inbound text frames are
//! JSON [`ClientMessage`](matchpoint_core::ClientMessage) records; outbound
//! frames are the session's queued
//! [`ServerMessage`](matchpoint_core::ServerMessage)s.
//!
//! # Usage
//!
//! ```ignore
//! use matchpoint_core::{Collaborators, Coordinator, CoordinatorConfig};
//! use matchpoint_websocket::WebSocketServer;
//!
//! let config = CoordinatorConfig::default();
//! let coordinator = Coordinator::new(config.clone(), Collaborators::http(&config.collaborators)?)?;
//! coordinator.start_background_tasks();
//!
//! let server = WebSocketServer::bind(config.server.bind_addr, coordinator).await?;
//! server.serve_with_shutdown(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```

pub mod error;
pub mod handler;
pub mod server;

pub use error::{Error, Result};
pub use server::WebSocketServer;

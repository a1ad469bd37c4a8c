//! Matchpoint Core - Real-time multimodal stream coordination engine
//!
//! This crate holds the transport-agnostic coordination logic for a server
//! that accepts many concurrent client sessions, runs independent audio and
//! visual analysis streams per session, aligns linked audio/visual streams in
//! time and adapts processing parameters from measured performance.
//!
//! # Architecture
//!
//! - [`session`] - connected clients, their capabilities and owned resources
//! - [`stream`] - per-stream lifecycle (`created -> active -> stopped`),
//!   bounded result history and rolling performance
//! - [`pipeline`] - per-chunk processing through external collaborators
//! - [`sync`] - audio/visual alignment and clock drift correction
//! - [`controller`] - closed-loop adaptation of the performance dials
//! - [`broadcast`] - topic subscriptions and periodic system publishing
//! - [`coordinator`] - the facade a transport drives with decoded messages
//!
//! Transports (see the `matchpoint-websocket` crate) hand each connection an
//! outbound channel and feed inbound [`protocol::ClientMessage`]s to the
//! [`Coordinator`].
//!
//! # Example
//!
//! ```ignore
//! use matchpoint_core::{Collaborators, Coordinator, CoordinatorConfig};
//!
//! let config = CoordinatorConfig::default();
//! let collaborators = Collaborators::http(&config.collaborators)?;
//! let coordinator = Coordinator::new(config, collaborators)?;
//! coordinator.start_background_tasks();
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(256);
//! let session_id = coordinator.connect(tx).await?;
//! coordinator
//!     .handle_text(&session_id, r#"{"type":"ping"}"#)
//!     .await;
//! ```

#![warn(clippy::all)]

pub mod broadcast;
pub mod collaborator;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod result;
pub mod session;
pub mod stream;
pub mod sync;

pub use collaborator::{
    Collaborators, InsightAnnotator, KeywordInsightAnnotator, ObjectDetector, SpeechRecognizer,
};
pub use config::CoordinatorConfig;
pub use controller::{Dial, Dials, DerivedMultipliers, ParameterSnapshot};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use protocol::{ClientMessage, ServerMessage, Topic};
pub use result::{AnalysisResult, ResultPayload};
pub use session::{Capabilities, ScopedId, SessionId};
pub use stream::{Modality, StreamConfig, StreamState, StreamSummary};

/// Crate version reported in `connected` messages
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}

//! Session tracking
//!
//! A session is one connected client. It owns (by id) the streams and links
//! it opened; all of them are released when the session is deregistered.
//! Topic subscriptions live in the broadcast router.

pub mod registry;

pub use registry::SessionRegistry;

use crate::protocol::ServerMessage;
use crate::{Error, Result};
use bitflags::bitflags;
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Session identifier
pub type SessionId = String;

/// Identifier scoped to its owning session
///
/// Stream and link ids are chosen per session, so two clients may both own
/// a stream called `a1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopedId {
    pub session: SessionId,
    pub id: String,
}

impl ScopedId {
    pub fn new(session: impl Into<SessionId>, id: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ScopedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.id)
    }
}

bitflags! {
    /// What a session is allowed to do
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const AUDIO = 0b0001;
        const VISUAL = 0b0010;
        const SYNC = 0b0100;
        const OPERATOR = 0b1000;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::AUDIO | Capabilities::VISUAL | Capabilities::SYNC
    }
}

impl Capabilities {
    /// Parse capability names as sent in `identify`
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut caps = Capabilities::empty();
        for name in names {
            caps |= match name.as_ref() {
                "audio" => Capabilities::AUDIO,
                "visual" => Capabilities::VISUAL,
                "sync" => Capabilities::SYNC,
                "operator" => Capabilities::OPERATOR,
                other => {
                    return Err(Error::InvalidMessage(format!(
                        "unknown capability '{}'",
                        other
                    )))
                }
            };
        }
        Ok(caps)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (flag, name) in [
            (Capabilities::AUDIO, "audio"),
            (Capabilities::VISUAL, "visual"),
            (Capabilities::SYNC, "sync"),
            (Capabilities::OPERATOR, "operator"),
        ] {
            if self.contains(flag) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Fail with `PermissionDenied` unless `required` is held
    pub fn require(&self, required: Capabilities, action: &str) -> Result<()> {
        if self.contains(required) {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!(
                "{} requires the {:?} capability",
                action, required
            )))
        }
    }
}

/// A connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,

    /// Outbound message queue drained by the transport
    outbound: mpsc::Sender<ServerMessage>,

    pub client_name: Option<String>,
    pub capabilities: Capabilities,

    /// Stream ids owned by this session (including stopped ones)
    pub streams: HashSet<String>,

    /// Link ids owned by this session
    pub links: HashSet<String>,

    pub connected_at: Instant,
    pub last_activity: Instant,

    /// Set once deregistration has started
    closing: bool,
}

impl Session {
    pub fn new(id: SessionId, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let now = Instant::now();
        Self {
            id,
            outbound,
            client_name: None,
            capabilities: Capabilities::default(),
            streams: HashSet::new(),
            links: HashSet::new(),
            connected_at: now,
            last_activity: now,
            closing: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn outbound(&self) -> &mpsc::Sender<ServerMessage> {
        &self.outbound
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

//! Registry of connected sessions

use super::{Session, SessionId};
use crate::protocol::ServerMessage;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Tracks every connected session
///
/// The registry only owns the session records. Releasing a session's streams
/// and links is orchestrated by the coordinator before [`SessionRegistry::discard`]
/// is called.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,

    /// Maximum number of concurrent sessions (0 = unlimited)
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        info!("Creating session registry (max_sessions: {})", max_sessions);
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Register a new session and return its generated id
    pub async fn register(&self, outbound: mpsc::Sender<ServerMessage>) -> Result<SessionId> {
        let mut sessions = self.sessions.write().await;

        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(Error::CapacityExceeded(format!(
                "Maximum number of sessions reached ({})",
                self.max_sessions
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = Session::new(session_id.clone(), outbound);
        sessions.insert(session_id.clone(), Arc::new(Mutex::new(session)));

        info!(session_id = %session_id, active = sessions.len(), "Session registered");
        Ok(session_id)
    }

    pub async fn lookup(&self, session_id: &str) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Mark a session as closing
    ///
    /// Returns `false` if the session is unknown or already closing, so that
    /// concurrent teardown paths (disconnect racing the idle reaper) run the
    /// release sequence once.
    pub async fn begin_close(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.read().await.get(session_id).cloned() else {
            return false;
        };
        let mut session = session.lock();
        if session.closing {
            return false;
        }
        session.closing = true;
        true
    }

    /// Remove the session record
    pub async fn discard(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            debug!(session_id = %session_id, "Session record discarded");
        }
        removed
    }

    /// Refresh a session's last-activity timestamp
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        self.lookup(session_id).await?.lock().touch();
        Ok(())
    }

    /// Sessions whose last activity is older than `timeout`
    pub async fn idle_sessions(&self, timeout: Duration, now: Instant) -> Vec<SessionId> {
        self.sessions
            .read()
            .await
            .iter()
            .filter_map(|(id, session)| {
                let session = session.lock();
                let idle = now.saturating_duration_since(session.last_activity);
                (!session.closing && idle > timeout).then(|| id.clone())
            })
            .collect()
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> mpsc::Sender<ServerMessage> {
        mpsc::channel(8).0
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = SessionRegistry::new(0);
        let id = registry.register(sink()).await.unwrap();

        let session = registry.lookup(&id).await.unwrap();
        assert_eq!(session.lock().id(), id);
        assert_eq!(registry.count().await, 1);

        let err = registry.lookup("missing").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_max_sessions() {
        let registry = SessionRegistry::new(1);
        registry.register(sink()).await.unwrap();
        let err = registry.register(sink()).await.unwrap_err();
        assert_eq!(err.code(), "capacity_exceeded");
    }

    #[tokio::test]
    async fn test_begin_close_is_exclusive() {
        let registry = SessionRegistry::new(0);
        let id = registry.register(sink()).await.unwrap();

        assert!(registry.begin_close(&id).await);
        assert!(!registry.begin_close(&id).await);

        registry.discard(&id).await;
        assert!(!registry.begin_close(&id).await);
        assert!(registry.lookup(&id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions() {
        let registry = SessionRegistry::new(0);
        let idle = registry.register(sink()).await.unwrap();
        let busy = registry.register(sink()).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        registry.touch(&busy).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let expired = registry
            .idle_sessions(Duration::from_secs(60), Instant::now())
            .await;
        assert_eq!(expired, vec![idle]);
    }
}

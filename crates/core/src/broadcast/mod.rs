//! Subscription/Broadcast Router
//!
//! Holds each session's outbound queue and the topic subscriptions. Sends
//! never block: a closed queue marks the session dead (reported on the
//! dead-session channel for cleanup) and a full queue drops the message.

use crate::metrics::Metrics;
use crate::protocol::{ServerMessage, Topic};
use crate::session::SessionId;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

pub struct Router {
    sinks: RwLock<HashMap<SessionId, mpsc::Sender<ServerMessage>>>,
    topics: RwLock<HashMap<Topic, HashSet<SessionId>>>,
    dead: mpsc::UnboundedSender<SessionId>,
    metrics: Arc<Metrics>,
}

impl Router {
    /// Create a router and the receiver of dead-session notifications
    pub fn new(metrics: Arc<Metrics>) -> (Self, mpsc::UnboundedReceiver<SessionId>) {
        let (dead, dead_rx) = mpsc::unbounded_channel();
        (
            Self {
                sinks: RwLock::new(HashMap::new()),
                topics: RwLock::new(HashMap::new()),
                dead,
                metrics,
            },
            dead_rx,
        )
    }

    pub async fn attach(&self, session_id: &str, sink: mpsc::Sender<ServerMessage>) {
        self.sinks.write().await.insert(session_id.to_string(), sink);
    }

    /// Remove a session's queue and all its subscriptions
    pub async fn detach(&self, session_id: &str) {
        self.sinks.write().await.remove(session_id);
        let mut topics = self.topics.write().await;
        for subscribers in topics.values_mut() {
            subscribers.remove(session_id);
        }
    }

    /// Subscribe a session to a topic; returns `false` if already subscribed
    pub async fn subscribe(&self, session_id: &str, topic: Topic) -> Result<bool> {
        if !self.sinks.read().await.contains_key(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        let added = self
            .topics
            .write()
            .await
            .entry(topic)
            .or_default()
            .insert(session_id.to_string());
        debug!(session_id = %session_id, topic = %topic, "Subscribed");
        Ok(added)
    }

    /// Returns `false` if the session was not subscribed
    pub async fn unsubscribe(&self, session_id: &str, topic: Topic) -> bool {
        self.topics
            .write()
            .await
            .get_mut(&topic)
            .is_some_and(|subscribers| subscribers.remove(session_id))
    }

    pub async fn is_subscribed(&self, session_id: &str, topic: Topic) -> bool {
        self.topics
            .read()
            .await
            .get(&topic)
            .is_some_and(|subscribers| subscribers.contains(session_id))
    }

    pub async fn subscribers(&self, topic: Topic) -> Vec<SessionId> {
        self.topics
            .read()
            .await
            .get(&topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver to every subscriber of `topic`
    ///
    /// Subscribers whose delivery fails are unsubscribed; the publisher never
    /// sees an error. Returns the number of sessions reached.
    pub async fn publish(&self, topic: Topic, message: ServerMessage) -> usize {
        let targets: Vec<(SessionId, mpsc::Sender<ServerMessage>)> = {
            let topics = self.topics.read().await;
            let Some(subscribers) = topics.get(&topic) else {
                return 0;
            };
            let sinks = self.sinks.read().await;
            subscribers
                .iter()
                .filter_map(|id| sinks.get(id).map(|sink| (id.clone(), sink.clone())))
                .collect()
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (session_id, sink) in targets {
            match sink.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(session_id = %session_id, topic = %topic, "Outbound queue full, unsubscribing");
                    self.metrics.message_dropped();
                    failed.push(session_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session_id = %session_id, topic = %topic, "Transport closed, unsubscribing");
                    let _ = self.dead.send(session_id.clone());
                    failed.push(session_id);
                }
            }
        }

        if !failed.is_empty() {
            if let Some(subscribers) = self.topics.write().await.get_mut(&topic) {
                for session_id in &failed {
                    subscribers.remove(session_id);
                }
            }
        }
        delivered
    }

    /// Deliver to one session
    ///
    /// # Errors
    ///
    /// - `Transport` if the session's queue is closed (the session is also
    ///   reported for cleanup)
    /// - `CapacityExceeded` if the queue is full and the message was dropped
    /// - `SessionNotFound` if the session has no queue
    pub async fn send_to(&self, session_id: &str, message: ServerMessage) -> Result<()> {
        let sink = self
            .sinks
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        match sink.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.metrics.message_dropped();
                warn!(session_id = %session_id, "Outbound queue full, message dropped");
                Err(Error::CapacityExceeded(format!(
                    "outbound queue full for session {}",
                    session_id
                )))
            }
            Err(TrySendError::Closed(_)) => {
                let _ = self.dead.send(session_id.to_string());
                Err(Error::Transport(format!(
                    "transport closed for session {}",
                    session_id
                )))
            }
        }
    }

    /// Deliver to every attached session (heartbeats)
    pub async fn broadcast_all(&self, message: ServerMessage) -> usize {
        let sessions: Vec<SessionId> = self.sinks.read().await.keys().cloned().collect();
        let mut delivered = 0;
        for session_id in sessions {
            if self.send_to(&session_id, message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn session_count(&self) -> usize {
        self.sinks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> (Router, mpsc::UnboundedReceiver<SessionId>) {
        Router::new(Arc::new(Metrics::new()))
    }

    fn heartbeat() -> ServerMessage {
        ServerMessage::Heartbeat { timestamp_ms: 1 }
    }

    #[tokio::test]
    async fn test_publish_to_subscribers_only() {
        let (router, _dead) = router();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        router.attach("s1", tx1).await;
        router.attach("s2", tx2).await;

        assert!(router.subscribe("s1", Topic::Performance).await.unwrap());
        assert!(!router.subscribe("s1", Topic::Performance).await.unwrap());

        assert_eq!(router.publish(Topic::Performance, heartbeat()).await, 1);
        assert_eq!(rx1.recv().await, Some(heartbeat()));
        assert!(rx2.try_recv().is_err());

        assert!(router.unsubscribe("s1", Topic::Performance).await);
        assert_eq!(router.publish(Topic::Performance, heartbeat()).await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_session() {
        let (router, _dead) = router();
        let err = router.subscribe("ghost", Topic::Sessions).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_closed_transport_silently_unsubscribed() {
        let (router, mut dead) = router();
        let (tx, rx) = mpsc::channel(8);
        router.attach("s1", tx).await;
        router.subscribe("s1", Topic::Compliance).await.unwrap();
        drop(rx);

        assert_eq!(router.publish(Topic::Compliance, heartbeat()).await, 0);
        assert!(router.subscribers(Topic::Compliance).await.is_empty());
        assert_eq!(dead.recv().await.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_unsubscribes() {
        let (router, _dead) = router();
        let (tx, _rx) = mpsc::channel(1);
        router.attach("s1", tx).await;
        router.subscribe("s1", Topic::Parameters).await.unwrap();

        assert_eq!(router.publish(Topic::Parameters, heartbeat()).await, 1);
        assert_eq!(router.publish(Topic::Parameters, heartbeat()).await, 0);
        assert!(router.subscribers(Topic::Parameters).await.is_empty());
    }

    #[tokio::test]
    async fn test_is_subscribed_follows_overflow_drop() {
        let (router, _dead) = router();
        let (tx, _rx) = mpsc::channel(1);
        router.attach("s1", tx).await;
        router.subscribe("s1", Topic::Parameters).await.unwrap();
        assert!(router.is_subscribed("s1", Topic::Parameters).await);
        assert!(!router.is_subscribed("s1", Topic::Sessions).await);
        assert!(!router.is_subscribed("s2", Topic::Parameters).await);

        router.publish(Topic::Parameters, heartbeat()).await;
        router.publish(Topic::Parameters, heartbeat()).await;
        assert!(!router.is_subscribed("s1", Topic::Parameters).await);
    }

    #[tokio::test]
    async fn test_send_to_closed_is_transport_error() {
        let (router, mut dead) = router();
        let (tx, rx) = mpsc::channel(8);
        router.attach("s1", tx).await;
        drop(rx);

        let err = router.send_to("s1", heartbeat()).await.unwrap_err();
        assert!(err.is_session_fatal());
        assert_eq!(dead.recv().await.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_detach_clears_subscriptions() {
        let (router, _dead) = router();
        let (tx, _rx) = mpsc::channel(8);
        router.attach("s1", tx).await;
        router.subscribe("s1", Topic::Sessions).await.unwrap();

        router.detach("s1").await;
        assert!(router.subscribers(Topic::Sessions).await.is_empty());
        assert_eq!(router.session_count().await, 0);
        assert_eq!(router.broadcast_all(heartbeat()).await, 0);
    }
}

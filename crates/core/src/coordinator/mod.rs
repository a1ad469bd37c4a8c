//! Coordinator facade
//!
//! Wires the session registry, stream manager, pipeline, sync engine,
//! controller and router together. A transport registers each connection
//! with [`Coordinator::connect`], feeds it inbound messages and drains the
//! outbound channel it supplied; everything else happens here.

mod tasks;

use crate::broadcast::Router;
use crate::collaborator::Collaborators;
use crate::config::CoordinatorConfig;
use crate::controller::{ControllerHandle, Dial, ParameterSnapshot};
use crate::metrics::{Gauges, Metrics, MetricsSnapshot};
use crate::pipeline::Pipeline;
use crate::protocol::{unix_millis, ClientMessage, ServerMessage, Topic};
use crate::session::registry::SessionRegistry;
use crate::session::{Capabilities, ScopedId, SessionId};
use crate::stream::manager::StreamManager;
use crate::stream::{Modality, StreamConfig, StreamSummary};
use crate::sync::engine::RemovedLink;
use crate::sync::SyncEngine;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-wide coordination engine
pub struct Coordinator {
    config: CoordinatorConfig,
    sessions: SessionRegistry,
    streams: Arc<StreamManager>,
    sync: Arc<SyncEngine>,
    controller: ControllerHandle,
    router: Arc<Router>,
    metrics: Arc<Metrics>,
    pipeline: Pipeline,
    dead_sessions: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SessionId>>>,
    shutdown: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Validate the config and build the engine
    ///
    /// Must be called from within a Tokio runtime: the controller task is
    /// spawned here. Periodic publishing and reaping start with
    /// [`Coordinator::start_background_tasks`].
    pub fn new(config: CoordinatorConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new());
        let (router, dead_sessions) = Router::new(Arc::clone(&metrics));
        let router = Arc::new(router);
        let streams = Arc::new(StreamManager::new(
            config.streams.clone(),
            config.latency.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(config.sync.clone()));
        let (controller, controller_task) = ControllerHandle::spawn(config.controller.clone());

        let pipeline = Pipeline::new(
            Arc::clone(&streams),
            Arc::clone(&sync),
            controller.clone(),
            collaborators,
            Arc::clone(&router),
            Arc::clone(&metrics),
            config.collaborators.call_timeout(),
        );

        let (shutdown, _) = watch::channel(false);

        info!(
            audio_target_ms = config.latency.audio_ms,
            visual_target_ms = config.latency.visual_ms,
            sync_precision_ms = config.sync.precision_ms,
            "Coordinator created"
        );

        Ok(Arc::new(Self {
            sessions: SessionRegistry::new(config.server.max_connections),
            config,
            streams,
            sync,
            controller,
            router,
            metrics,
            pipeline,
            dead_sessions: parking_lot::Mutex::new(Some(dead_sessions)),
            shutdown,
            tasks: parking_lot::Mutex::new(vec![controller_task]),
        }))
    }

    /// Spawn the periodic publishers, controller ticks, sync sweeps and
    /// session reapers. Calling this more than once has no effect.
    pub fn start_background_tasks(self: &Arc<Self>) {
        let Some(dead_sessions) = self.dead_sessions.lock().take() else {
            return;
        };
        let handles = tasks::spawn_all(self, dead_sessions);
        self.tasks.lock().extend(handles);
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn parameters(&self) -> ParameterSnapshot {
        self.controller.snapshot()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let gauges = Gauges {
            active_sessions: self.sessions.count().await,
            active_streams: self.streams.active_count().await,
            active_links: self.sync.count().await,
        };
        self.metrics.snapshot(gauges)
    }

    /// Register a connection
    ///
    /// `sink` is the session's outbound queue; the transport drains it. The
    /// queue closes once the session is deregistered. A `connected` message
    /// carrying the session id is queued immediately.
    pub async fn connect(&self, sink: mpsc::Sender<ServerMessage>) -> Result<SessionId> {
        if *self.shutdown.borrow() {
            return Err(Error::Shutdown("coordinator".to_string()));
        }
        let session_id = self.sessions.register(sink.clone()).await?;
        self.router.attach(&session_id, sink).await;
        self.metrics.session_opened();

        self.send(
            &session_id,
            ServerMessage::Connected {
                session_id: session_id.clone(),
                server_version: crate::version().to_string(),
            },
        )
        .await;
        Ok(session_id)
    }

    /// Deregister a session
    ///
    /// Stops every stream and tears down every link the session owns before
    /// the session record is discarded, then publishes `session_closed`.
    /// Returns `false` if the session is unknown or already closing.
    pub async fn disconnect(&self, session_id: &str, reason: &str) -> bool {
        if !self.sessions.begin_close(session_id).await {
            return false;
        }

        let mut stopped = 0;
        for key in self.streams.live_streams(session_id).await {
            if self.stop_stream(&key, false).await.is_ok() {
                stopped += 1;
            }
        }
        for link in self.sync.links_for_session(session_id).await {
            self.teardown_link(&link, "session_closed", false).await;
        }

        self.streams.release_session(session_id).await;
        self.router.detach(session_id).await;
        self.sessions.discard(session_id).await;
        self.metrics.session_closed();

        self.router
            .publish(
                Topic::Sessions,
                ServerMessage::SessionClosed {
                    session_id: session_id.to_string(),
                    reason: reason.to_string(),
                },
            )
            .await;

        info!(session_id = %session_id, reason, streams_stopped = stopped, "Session closed");
        true
    }

    /// Decode and handle one JSON text frame
    pub async fn handle_text(&self, session_id: &str, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(session_id, message).await,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Rejected malformed message");
                let _ = self.sessions.touch(session_id).await;
                self.send(session_id, ServerMessage::error(&e, None)).await;
            }
        }
    }

    /// Report a transport-level rejection (e.g. an undecodable frame)
    pub async fn report_error(&self, session_id: &str, err: &Error) {
        self.send(session_id, ServerMessage::error(err, None)).await;
    }

    /// Handle one decoded message
    ///
    /// Failures are reported to the session as `error` events; they never
    /// affect other sessions.
    pub async fn handle_message(&self, session_id: &str, message: ClientMessage) {
        if self.sessions.touch(session_id).await.is_err() {
            debug!(session_id = %session_id, "Message for unknown session ignored");
            return;
        }

        let kind = message.kind();
        let stream_id = stream_id_of(&message);
        debug!(session_id = %session_id, kind, "Handling message");

        if let Err(e) = self.dispatch(session_id, message).await {
            if e.is_lifecycle_error() {
                debug!(session_id = %session_id, kind, error = %e, "Request rejected");
            } else {
                warn!(session_id = %session_id, kind, error = %e, "Request failed");
            }
            self.send(session_id, ServerMessage::error(&e, stream_id)).await;
        }
    }

    async fn dispatch(&self, session_id: &str, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Identify {
                client_name,
                capabilities,
            } => self.identify(session_id, client_name, capabilities).await,
            ClientMessage::Subscribe { topic } => {
                self.router.subscribe(session_id, topic).await?;
                self.reply(session_id, ServerMessage::Subscribed { topic }).await
            }
            ClientMessage::Unsubscribe { topic } => {
                self.router.unsubscribe(session_id, topic).await;
                self.reply(session_id, ServerMessage::Unsubscribed { topic }).await
            }
            ClientMessage::StartAudioStream { stream_id, config } => {
                self.start_stream(session_id, stream_id, Modality::Audio, config).await
            }
            ClientMessage::StartVisualStream { stream_id, config } => {
                self.start_stream(session_id, stream_id, Modality::Visual, config).await
            }
            ClientMessage::StopAudioStream { stream_id } => {
                let summary = self.close_stream(session_id, &stream_id, Modality::Audio).await?;
                self.reply(
                    session_id,
                    ServerMessage::AudioStreamStopped { stream_id, summary },
                )
                .await
            }
            ClientMessage::StopVisualStream { stream_id } => {
                let summary = self.close_stream(session_id, &stream_id, Modality::Visual).await?;
                self.reply(
                    session_id,
                    ServerMessage::VisualStreamStopped { stream_id, summary },
                )
                .await
            }
            ClientMessage::ProcessAudio {
                stream_id,
                data,
                timestamp,
            } => {
                self.submit(session_id, stream_id, Modality::Audio, data, timestamp)
                    .await
            }
            ClientMessage::ProcessFrame {
                stream_id,
                data,
                timestamp,
            } => {
                self.submit(session_id, stream_id, Modality::Visual, data, timestamp)
                    .await
            }
            ClientMessage::LinkAudioVisual {
                link_id,
                audio_stream_id,
                visual_stream_id,
                precision_ms,
            } => {
                self.link(session_id, link_id, audio_stream_id, visual_stream_id, precision_ms)
                    .await
            }
            ClientMessage::UnlinkAudioVisual { link_id } => {
                self.require(session_id, Capabilities::SYNC, "unlink_audio_visual")
                    .await?;
                let key = ScopedId::new(session_id, link_id.clone());
                self.teardown_link(&key, "requested", true)
                    .await
                    .map(|_| ())
                    .ok_or(Error::LinkNotFound(link_id))
            }
            ClientMessage::SetParameter { name, value } => {
                self.set_parameter(session_id, &name, value).await
            }
            ClientMessage::GetParameters => {
                self.reply(
                    session_id,
                    ServerMessage::Parameters {
                        parameters: self.controller.snapshot(),
                    },
                )
                .await
            }
            ClientMessage::GetStreamStatus { stream_id } => {
                let status = self.streams.status(&ScopedId::new(session_id, stream_id)).await?;
                self.reply(session_id, ServerMessage::StreamStatus { status }).await
            }
            ClientMessage::GetLinkStatus { link_id } => {
                let status = self.sync.status(&ScopedId::new(session_id, link_id)).await?;
                self.reply(session_id, ServerMessage::LinkStatus { status }).await
            }
            ClientMessage::Ping => {
                self.reply(
                    session_id,
                    ServerMessage::Pong {
                        timestamp_ms: unix_millis(),
                    },
                )
                .await
            }
        }
    }

    async fn identify(
        &self,
        session_id: &str,
        client_name: Option<String>,
        capabilities: Vec<String>,
    ) -> Result<()> {
        // Claimed capabilities add to the defaults; a session can always
        // manage the streams it was allowed to open
        let requested = Capabilities::default() | Capabilities::from_names(&capabilities)?;

        {
            let session = self.sessions.lookup(session_id).await?;
            let mut session = session.lock();
            session.client_name = client_name.clone();
            session.capabilities = requested;
        }

        info!(
            session_id = %session_id,
            client_name = client_name.as_deref().unwrap_or("-"),
            capabilities = ?requested,
            "Session identified"
        );
        self.reply(
            session_id,
            ServerMessage::Identified {
                session_id: session_id.to_string(),
                client_name,
                capabilities: requested.names(),
            },
        )
        .await
    }

    async fn require(&self, session_id: &str, required: Capabilities, action: &str) -> Result<()> {
        let capabilities = self.sessions.lookup(session_id).await?.lock().capabilities;
        capabilities.require(required, action)
    }

    /// Open a stream owned by `session_id` and acknowledge it
    pub async fn start_stream(
        &self,
        session_id: &str,
        stream_id: Option<String>,
        modality: Modality,
        config: StreamConfig,
    ) -> Result<()> {
        self.require(session_id, modality_capability(modality), start_action(modality))
            .await?;

        let key = self
            .streams
            .open_stream(session_id, stream_id, modality, config)
            .await?;

        // A disconnect that began while the stream was opening will not see
        // it in the session record
        let registered = match self.sessions.lookup(session_id).await {
            Ok(session) => {
                let mut session = session.lock();
                if session.is_closing() {
                    false
                } else {
                    session.streams.insert(key.id.clone());
                    true
                }
            }
            Err(_) => false,
        };
        if !registered {
            self.streams.discard(&key).await;
            debug!(
                session_id = %session_id,
                stream_id = %key.id,
                "Session closed while stream was opening"
            );
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        let target_latency_ms = self.streams.status(&key).await?.target_latency_ms;
        let ack = match modality {
            Modality::Audio => ServerMessage::AudioStreamStarted {
                stream_id: key.id,
                target_latency_ms,
            },
            Modality::Visual => ServerMessage::VisualStreamStarted {
                stream_id: key.id,
                target_latency_ms,
            },
        };
        self.reply(session_id, ack).await
    }

    /// Stop a stream and tear down its link
    ///
    /// Idempotent: a second close returns the cached summary and tears
    /// nothing down.
    pub async fn close_stream(
        &self,
        session_id: &str,
        stream_id: &str,
        modality: Modality,
    ) -> Result<StreamSummary> {
        self.require(session_id, modality_capability(modality), stop_action(modality))
            .await?;

        let key = ScopedId::new(session_id, stream_id);
        let actual = self.streams.lookup(&key).await?.lock().modality();
        if actual != modality {
            return Err(Error::InvalidConfig(format!(
                "stream {} is a {} stream, not {}",
                stream_id, actual, modality
            )));
        }
        self.stop_stream(&key, true).await
    }

    async fn stop_stream(&self, key: &ScopedId, notify: bool) -> Result<StreamSummary> {
        let (summary, transitioned) = self.streams.close_stream(key).await?;
        if transitioned {
            for link in self.sync.links_for_stream(key).await {
                self.teardown_link(&link, "stream_stopped", notify).await;
            }
        }
        Ok(summary)
    }

    async fn submit(
        &self,
        session_id: &str,
        stream_id: String,
        modality: Modality,
        data: Bytes,
        timestamp: f64,
    ) -> Result<()> {
        self.require(session_id, modality_capability(modality), submit_action(modality))
            .await?;
        if !timestamp.is_finite() {
            return Err(Error::InvalidMessage(format!(
                "timestamp must be a finite number, got {}",
                timestamp
            )));
        }
        let key = ScopedId::new(session_id, stream_id);
        self.pipeline.submit(&key, modality, data, timestamp).await?;
        Ok(())
    }

    /// Link an audio stream and a visual stream of the same session
    ///
    /// Fails with `LinkMismatch` if either stream is missing, inactive,
    /// already linked, or of the wrong modality. A failed request leaves
    /// both streams unlinked.
    pub async fn link(
        &self,
        session_id: &str,
        link_id: Option<String>,
        audio_stream_id: String,
        visual_stream_id: String,
        precision_ms: Option<f64>,
    ) -> Result<()> {
        self.require(session_id, Capabilities::SYNC, "link_audio_visual")
            .await?;

        let link_id = link_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = ScopedId::new(session_id, link_id.clone());
        let link = self
            .sync
            .prepare(
                key.clone(),
                audio_stream_id.clone(),
                visual_stream_id.clone(),
                precision_ms,
            )
            .await?;

        let audio = ScopedId::new(session_id, audio_stream_id);
        let visual = ScopedId::new(session_id, visual_stream_id);

        self.attach(&audio, &link_id, Modality::Audio).await?;
        if let Err(e) = self.attach(&visual, &link_id, Modality::Visual).await {
            self.streams.detach_link(&audio, &link_id).await;
            return Err(e);
        }

        let report = match self.sync.insert(link).await {
            Ok(report) => report,
            Err(e) => {
                self.streams.detach_link(&audio, &link_id).await;
                self.streams.detach_link(&visual, &link_id).await;
                return Err(e);
            }
        };
        self.sessions
            .lookup(session_id)
            .await?
            .lock()
            .links
            .insert(link_id.clone());

        self.reply(
            session_id,
            ServerMessage::Linked {
                link_id,
                audio_stream_id: report.audio_stream_id,
                visual_stream_id: report.visual_stream_id,
                precision_ms: report.precision_ms,
            },
        )
        .await
    }

    async fn attach(&self, stream: &ScopedId, link_id: &str, expected: Modality) -> Result<()> {
        let modality = self.streams.attach_link(stream, link_id).await?;
        if modality != expected {
            self.streams.detach_link(stream, link_id).await;
            return Err(Error::LinkMismatch(format!(
                "stream {} is a {} stream, expected {}",
                stream.id, modality, expected
            )));
        }
        Ok(())
    }

    /// Remove a link, release both streams and drop its buffered results
    async fn teardown_link(&self, key: &ScopedId, reason: &str, notify: bool) -> Option<RemovedLink> {
        let removed = self.sync.remove(key).await?;

        let audio = ScopedId::new(key.session.clone(), removed.audio_stream_id.clone());
        let visual = ScopedId::new(key.session.clone(), removed.visual_stream_id.clone());
        self.streams.detach_link(&audio, &key.id).await;
        self.streams.detach_link(&visual, &key.id).await;
        if let Ok(session) = self.sessions.lookup(&key.session).await {
            session.lock().links.remove(&key.id);
        }
        self.metrics.unmatched(removed.discarded);

        if notify {
            self.send(
                &key.session,
                ServerMessage::Unlinked {
                    link_id: key.id.clone(),
                    reason: reason.to_string(),
                    discarded: removed.discarded,
                },
            )
            .await;
        }
        Some(removed)
    }

    /// Operator update of one dial
    ///
    /// The new snapshot is published on the `parameters` topic and sent to
    /// the caller if the router does not hold it as a subscriber afterwards.
    pub async fn set_parameter(&self, session_id: &str, name: &str, value: f64) -> Result<()> {
        self.require(session_id, Capabilities::OPERATOR, "set_parameter")
            .await?;
        let dial: Dial = name.parse()?;
        let parameters = self.controller.set(dial, value).await?;

        let changed = ServerMessage::ParametersChanged {
            parameter: dial.as_str().to_string(),
            value,
            parameters,
        };
        // A subscriber whose queue overflows during the publish is dropped
        // from the topic and falls back to a direct reply
        self.router.publish(Topic::Parameters, changed.clone()).await;
        if !self.router.is_subscribed(session_id, Topic::Parameters).await {
            self.reply(session_id, changed).await?;
        }
        Ok(())
    }

    /// Close every session and stop the background tasks
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!("Coordinator shutting down");

        let sessions = self.sessions.session_ids().await;
        futures::future::join_all(
            sessions
                .iter()
                .map(|session_id| self.disconnect(session_id, "server_shutdown")),
        )
        .await;

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(sessions = sessions.len(), "Coordinator stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn reply(&self, session_id: &str, message: ServerMessage) -> Result<()> {
        match self.router.send_to(session_id, message).await {
            Err(e) if e.is_session_fatal() => Err(e),
            _ => Ok(()),
        }
    }

    async fn send(&self, session_id: &str, message: ServerMessage) {
        if let Err(e) = self.router.send_to(session_id, message).await {
            debug!(session_id = %session_id, error = %e, "Delivery failed");
        }
    }
}

fn stream_id_of(message: &ClientMessage) -> Option<String> {
    match message {
        ClientMessage::StartAudioStream { stream_id, .. }
        | ClientMessage::StartVisualStream { stream_id, .. } => stream_id.clone(),
        ClientMessage::StopAudioStream { stream_id }
        | ClientMessage::StopVisualStream { stream_id }
        | ClientMessage::ProcessAudio { stream_id, .. }
        | ClientMessage::ProcessFrame { stream_id, .. }
        | ClientMessage::GetStreamStatus { stream_id } => Some(stream_id.clone()),
        _ => None,
    }
}

fn modality_capability(modality: Modality) -> Capabilities {
    match modality {
        Modality::Audio => Capabilities::AUDIO,
        Modality::Visual => Capabilities::VISUAL,
    }
}

fn start_action(modality: Modality) -> &'static str {
    match modality {
        Modality::Audio => "start_audio_stream",
        Modality::Visual => "start_visual_stream",
    }
}

fn stop_action(modality: Modality) -> &'static str {
    match modality {
        Modality::Audio => "stop_audio_stream",
        Modality::Visual => "stop_visual_stream",
    }
}

fn submit_action(modality: Modality) -> &'static str {
    match modality {
        Modality::Audio => "process_audio",
        Modality::Visual => "process_frame",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn coordinator() -> Arc<Coordinator> {
        let config = CoordinatorConfig::default().with_seed(1);
        Coordinator::new(config, Collaborators::scripted()).unwrap()
    }

    async fn connect(coordinator: &Coordinator) -> (SessionId, mpsc::Receiver<ServerMessage>) {
        let (tx, mut rx) = mpsc::channel(64);
        let session_id = coordinator.connect(tx).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ServerMessage::Connected { .. })));
        (session_id, rx)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = CoordinatorConfig::default();
        config.sync.ewma_alpha = 0.0;
        assert!(Coordinator::new(config, Collaborators::scripted()).is_err());
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let coordinator = coordinator().await;
        let (session_id, mut rx) = connect(&coordinator).await;

        coordinator.handle_text(&session_id, r#"{"type":"ping"}"#).await;
        assert!(matches!(rx.recv().await, Some(ServerMessage::Pong { .. })));
    }

    #[tokio::test]
    async fn test_malformed_message_reported() {
        let coordinator = coordinator().await;
        let (session_id, mut rx) = connect(&coordinator).await;

        coordinator.handle_text(&session_id, "not json").await;
        match rx.recv().await {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "invalid_message"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_with_wrong_modality() {
        let coordinator = coordinator().await;
        let (session_id, mut rx) = connect(&coordinator).await;

        coordinator
            .handle_text(
                &session_id,
                r#"{"type":"start_audio_stream","stream_id":"a1","config":{"sample_rate":16000}}"#,
            )
            .await;
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::AudioStreamStarted { .. })
        ));

        coordinator
            .handle_text(&session_id, r#"{"type":"stop_visual_stream","stream_id":"a1"}"#)
            .await;
        match rx.recv().await {
            Some(ServerMessage::Error { code, stream_id, .. }) => {
                assert_eq!(code, "invalid_config");
                assert_eq!(stream_id.as_deref(), Some("a1"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = CoordinatorConfig::default().with_max_connections(1);
        let coordinator = Coordinator::new(config, Collaborators::scripted()).unwrap();
        let (_session, _rx) = connect(&coordinator).await;

        let (tx, _rx2) = mpsc::channel(8);
        let err = coordinator.connect(tx).await.unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded(_)));
    }

    #[tokio::test]
    async fn test_disconnect_closes_outbound_queue() {
        let coordinator = coordinator().await;
        let (session_id, mut rx) = connect(&coordinator).await;

        assert!(coordinator.disconnect(&session_id, "test").await);
        assert!(!coordinator.disconnect(&session_id, "test").await);
        assert_eq!(rx.recv().await, None);
        assert_eq!(coordinator.sessions().count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_sessions() {
        let coordinator = coordinator().await;
        let (_session, mut rx) = connect(&coordinator).await;

        coordinator.shutdown().await;
        assert!(coordinator.is_shutting_down());
        assert_eq!(rx.recv().await, None);

        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            coordinator.connect(tx).await,
            Err(Error::Shutdown(_))
        ));
    }
}

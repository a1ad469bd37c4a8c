//! Shared helpers for coordinator integration tests

#![allow(dead_code)]

use matchpoint_core::collaborator::{ScriptedObjectDetector, ScriptedSpeechRecognizer};
use matchpoint_core::{
    Collaborators, Coordinator, CoordinatorConfig, KeywordInsightAnnotator, ServerMessage,
    SessionId,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const AUDIO_CHUNK: &str = "AAECAwQF";
pub const VIDEO_FRAME: &str = "/9j/4AAQ";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default().with_seed(7);
    // Periodic evaluation is exercised separately; keep ticks out of the way
    config.controller.tick_interval_ms = 3_600_000;
    config
}

pub fn collaborators(
    speech: ScriptedSpeechRecognizer,
    detector: ScriptedObjectDetector,
) -> Collaborators {
    Collaborators::new(
        Arc::new(speech),
        Arc::new(detector),
        Arc::new(KeywordInsightAnnotator::new()),
    )
}

pub fn coordinator(config: CoordinatorConfig, collaborators: Collaborators) -> Arc<Coordinator> {
    init_tracing();
    Coordinator::new(config, collaborators).unwrap()
}

/// A connected test client
pub struct Client {
    pub session_id: SessionId,
    pub rx: mpsc::Receiver<ServerMessage>,
    coordinator: Arc<Coordinator>,
}

impl Client {
    pub async fn connect(coordinator: &Arc<Coordinator>) -> Self {
        let (tx, mut rx) = mpsc::channel(4096);
        let session_id = tokio_test::assert_ok!(coordinator.connect(tx).await);
        match rx.recv().await {
            Some(ServerMessage::Connected { session_id: id, .. }) => assert_eq!(id, session_id),
            other => panic!("expected connected, got {:?}", other),
        }
        Self {
            session_id,
            rx,
            coordinator: Arc::clone(coordinator),
        }
    }

    pub async fn send(&self, message: serde_json::Value) {
        self.coordinator
            .handle_text(&self.session_id, &message.to_string())
            .await;
    }

    /// Next outbound message (fails the test after 30s of silence)
    pub async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(30), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbound queue closed")
    }

    /// Skip messages until one matches
    pub async fn recv_until<F>(&mut self, mut matches: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let message = self.recv().await;
            if matches(&message) {
                return message;
            }
        }
    }

    pub async fn start_audio(&mut self, stream_id: &str) {
        self.send(json!({
            "type": "start_audio_stream",
            "stream_id": stream_id,
            "config": {"sample_rate": 16000, "channels": 1, "sport": "basketball"}
        }))
        .await;
        match self.recv().await {
            ServerMessage::AudioStreamStarted { stream_id: id, .. } => assert_eq!(id, stream_id),
            other => panic!("expected audio_stream_started, got {:?}", other),
        }
    }

    pub async fn start_visual(&mut self, stream_id: &str) {
        self.send(json!({
            "type": "start_visual_stream",
            "stream_id": stream_id,
            "config": {"width": 1280, "height": 720, "format": "jpeg"}
        }))
        .await;
        match self.recv().await {
            ServerMessage::VisualStreamStarted { stream_id: id, .. } => assert_eq!(id, stream_id),
            other => panic!("expected visual_stream_started, got {:?}", other),
        }
    }

    pub async fn link(&mut self, link_id: &str, audio: &str, visual: &str, precision_ms: f64) {
        self.send(json!({
            "type": "link_audio_visual",
            "link_id": link_id,
            "audio_stream_id": audio,
            "visual_stream_id": visual,
            "precision_ms": precision_ms
        }))
        .await;
        match self.recv().await {
            ServerMessage::Linked { link_id: id, .. } => assert_eq!(id, link_id),
            other => panic!("expected linked, got {:?}", other),
        }
    }

    pub async fn process_audio(&self, stream_id: &str, timestamp: f64) {
        self.send(json!({
            "type": "process_audio",
            "stream_id": stream_id,
            "data": AUDIO_CHUNK,
            "timestamp": timestamp
        }))
        .await;
    }

    pub async fn process_frame(&self, stream_id: &str, timestamp: f64) {
        self.send(json!({
            "type": "process_frame",
            "stream_id": stream_id,
            "data": VIDEO_FRAME,
            "timestamp": timestamp
        }))
        .await;
    }
}

pub fn is_error(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::Error { .. })
}

pub fn error_code(message: &ServerMessage) -> Option<&str> {
    match message {
        ServerMessage::Error { code, .. } => Some(code.as_str()),
        _ => None,
    }
}

//! Application message vocabulary
//!
//! Every record is a JSON object with a `type` discriminator. Binary chunk
//! payloads travel base64-encoded in the `data` field.

use crate::controller::ParameterSnapshot;
use crate::metrics::MetricsSnapshot;
use crate::result::AnalysisResult;
use crate::stream::{Modality, StreamConfig, StreamReport, StreamSummary};
use crate::sync::{DriftEstimate, LinkReport};
use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broadcast topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Periodic performance snapshot
    Performance,
    /// Parameter state (periodic and on operator change)
    Parameters,
    /// Aggregate championship-compliance metrics
    Compliance,
    /// Session lifecycle events
    Sessions,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Performance,
        Topic::Parameters,
        Topic::Compliance,
        Topic::Sessions,
    ];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Performance => "performance",
            Topic::Parameters => "parameters",
            Topic::Compliance => "compliance",
            Topic::Sessions => "sessions",
        };
        f.write_str(name)
    }
}

/// Messages sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Identify {
        #[serde(default)]
        client_name: Option<String>,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    Subscribe {
        topic: Topic,
    },
    Unsubscribe {
        topic: Topic,
    },
    StartAudioStream {
        #[serde(default)]
        stream_id: Option<String>,
        #[serde(default)]
        config: StreamConfig,
    },
    StopAudioStream {
        stream_id: String,
    },
    StartVisualStream {
        #[serde(default)]
        stream_id: Option<String>,
        #[serde(default)]
        config: StreamConfig,
    },
    StopVisualStream {
        stream_id: String,
    },
    ProcessAudio {
        stream_id: String,
        #[serde(with = "base64_bytes")]
        data: Bytes,
        /// Producer timestamp (ms)
        timestamp: f64,
    },
    ProcessFrame {
        stream_id: String,
        #[serde(with = "base64_bytes")]
        data: Bytes,
        timestamp: f64,
    },
    LinkAudioVisual {
        #[serde(default)]
        link_id: Option<String>,
        audio_stream_id: String,
        visual_stream_id: String,
        #[serde(default)]
        precision_ms: Option<f64>,
    },
    UnlinkAudioVisual {
        link_id: String,
    },
    SetParameter {
        name: String,
        value: f64,
    },
    GetParameters,
    GetStreamStatus {
        stream_id: String,
    },
    GetLinkStatus {
        link_id: String,
    },
    Ping,
}

impl ClientMessage {
    /// Decode a JSON text frame
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Identify { .. } => "identify",
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::StartAudioStream { .. } => "start_audio_stream",
            ClientMessage::StopAudioStream { .. } => "stop_audio_stream",
            ClientMessage::StartVisualStream { .. } => "start_visual_stream",
            ClientMessage::StopVisualStream { .. } => "stop_visual_stream",
            ClientMessage::ProcessAudio { .. } => "process_audio",
            ClientMessage::ProcessFrame { .. } => "process_frame",
            ClientMessage::LinkAudioVisual { .. } => "link_audio_visual",
            ClientMessage::UnlinkAudioVisual { .. } => "unlink_audio_visual",
            ClientMessage::SetParameter { .. } => "set_parameter",
            ClientMessage::GetParameters => "get_parameters",
            ClientMessage::GetStreamStatus { .. } => "get_stream_status",
            ClientMessage::GetLinkStatus { .. } => "get_link_status",
            ClientMessage::Ping => "ping",
        }
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: String,
        server_version: String,
    },
    Identified {
        session_id: String,
        client_name: Option<String>,
        capabilities: Vec<String>,
    },
    Subscribed {
        topic: Topic,
    },
    Unsubscribed {
        topic: Topic,
    },
    AudioStreamStarted {
        stream_id: String,
        target_latency_ms: u64,
    },
    AudioStreamStopped {
        stream_id: String,
        summary: StreamSummary,
    },
    VisualStreamStarted {
        stream_id: String,
        target_latency_ms: u64,
    },
    VisualStreamStopped {
        stream_id: String,
        summary: StreamSummary,
    },
    AudioProcessed {
        stream_id: String,
        result: AnalysisResult,
    },
    FrameProcessed {
        stream_id: String,
        result: AnalysisResult,
    },
    Linked {
        link_id: String,
        audio_stream_id: String,
        visual_stream_id: String,
        precision_ms: f64,
    },
    Unlinked {
        link_id: String,
        reason: String,
        /// Buffered unmatched results dropped by the teardown
        discarded: usize,
    },
    SyncedPair {
        link_id: String,
        audio: AnalysisResult,
        visual: AnalysisResult,
        skew_ms: f64,
        offset_ms: f64,
    },
    DriftCorrectionApplied {
        link_id: String,
        offset_ms: f64,
        previous_offset_ms: f64,
        observed_skew_ms: f64,
        drift: Option<DriftEstimate>,
    },
    LatencyWarning {
        stream_id: String,
        modality: Modality,
        latency_ms: f64,
        target_ms: u64,
    },
    Parameters {
        parameters: ParameterSnapshot,
    },
    ParametersChanged {
        parameter: String,
        value: f64,
        parameters: ParameterSnapshot,
    },
    PerformanceSnapshot {
        metrics: MetricsSnapshot,
    },
    ComplianceMetrics {
        compliance: f64,
        met: u64,
        missed: u64,
        latency_warnings: u64,
    },
    StreamStatus {
        status: StreamReport,
    },
    LinkStatus {
        status: LinkReport,
    },
    SessionClosed {
        session_id: String,
        reason: String,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
    },
    Pong {
        timestamp_ms: u64,
    },
    Heartbeat {
        timestamp_ms: u64,
    },
}

impl ServerMessage {
    pub fn error(err: &Error, stream_id: Option<String>) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            stream_id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_start_audio_stream() {
        let msg = ClientMessage::from_json(
            r#"{"type":"start_audio_stream","stream_id":"a1","config":{"sample_rate":16000,"sport":"tennis"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::StartAudioStream { stream_id, config } => {
                assert_eq!(stream_id.as_deref(), Some("a1"));
                assert_eq!(config.sample_rate, Some(16000));
                assert_eq!(config.sport.as_deref(), Some("tennis"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_process_audio_base64() {
        let msg = ClientMessage::from_json(
            r#"{"type":"process_audio","stream_id":"a1","data":"AAEC","timestamp":1000}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::ProcessAudio {
                data, timestamp, ..
            } => {
                assert_eq!(&data[..], &[0u8, 1, 2]);
                assert_eq!(timestamp, 1000.0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let err = ClientMessage::from_json(
            r#"{"type":"process_frame","stream_id":"v1","data":"***","timestamp":1}"#,
        )
        .unwrap_err();
        assert_eq!(err.code(), "invalid_message");
    }

    #[test]
    fn test_unit_variants() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"get_parameters"}"#).unwrap().kind(),
            "get_parameters"
        );
        assert!(ClientMessage::from_json(r#"{"type":"launch_rocket"}"#).is_err());
    }

    #[test]
    fn test_subscribe_topic_names() {
        let msg = ClientMessage::from_json(r#"{"type":"subscribe","topic":"compliance"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                topic: Topic::Compliance
            }
        );
    }

    #[test]
    fn test_server_message_encoding() {
        let msg = ServerMessage::error(&Error::StreamNotActive("a1".into()), Some("a1".into()));
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "stream_not_active");
        assert_eq!(json["stream_id"], "a1");

        let json = serde_json::to_value(ServerMessage::Heartbeat { timestamp_ms: 5 }).unwrap();
        assert_eq!(json["type"], "heartbeat");

        let json = serde_json::to_value(ServerMessage::AudioStreamStarted {
            stream_id: "a1".into(),
            target_latency_ms: 300,
        })
        .unwrap();
        assert_eq!(json["type"], "audio_stream_started");
    }
}

//! External collaborator interfaces
//!
//! Speech recognition and object detection run in separate services and are
//! reached only through these traits, so the coordination logic never knows
//! whether it talks to an HTTP service, an in-process model or a test double.
//! Every call is treated as potentially slow and potentially failing.

pub mod http;
pub mod insight;
pub mod scripted;

pub use http::{HttpObjectDetector, HttpSpeechRecognizer};
pub use insight::KeywordInsightAnnotator;
pub use scripted::{ScriptStep, ScriptedObjectDetector, ScriptedSpeechRecognizer};

use crate::config::CollaboratorSettings;
use crate::controller::ParameterSnapshot;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Speech recognizer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub transcript: String,
    pub confidence: f64,
}

/// Normalized bounding box (0.0-1.0 relative to the frame)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One detected object or pose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// Object detector output for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
    /// Overall frame confidence
    pub confidence: f64,
}

/// Sport-context annotation attached to an audio result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    /// Term found in the transcript
    pub term: String,
    pub category: String,
    pub description: String,
}

/// Context passed to the annotator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SportContext {
    pub sport: String,
    pub environment: Option<String>,
}

/// Speech recognition service
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe one audio chunk under the given parameters
    async fn recognize_speech(
        &self,
        audio: Bytes,
        params: &ParameterSnapshot,
    ) -> Result<Transcription>;

    /// Name used in logs and error events
    fn name(&self) -> &str;
}

/// Object/pose detection service
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in one frame under the given parameters
    async fn detect_objects(&self, frame: Bytes, params: &ParameterSnapshot)
        -> Result<DetectionSet>;

    /// Name used in logs and error events
    fn name(&self) -> &str;
}

/// Sport terminology lookup: a pure function of transcript and context
pub trait InsightAnnotator: Send + Sync {
    fn annotate(&self, transcript: &str, context: &SportContext) -> Vec<Insight>;
}

/// The set of collaborators a coordinator uses
#[derive(Clone)]
pub struct Collaborators {
    pub speech: Arc<dyn SpeechRecognizer>,
    pub detector: Arc<dyn ObjectDetector>,
    pub annotator: Arc<dyn InsightAnnotator>,
}

impl Collaborators {
    pub fn new(
        speech: Arc<dyn SpeechRecognizer>,
        detector: Arc<dyn ObjectDetector>,
        annotator: Arc<dyn InsightAnnotator>,
    ) -> Self {
        Self {
            speech,
            detector,
            annotator,
        }
    }

    /// HTTP services at the configured URLs plus the built-in annotator
    pub fn http(settings: &CollaboratorSettings) -> Result<Self> {
        Ok(Self {
            speech: Arc::new(HttpSpeechRecognizer::new(
                &settings.speech_url,
                settings.call_timeout(),
            )?),
            detector: Arc::new(HttpObjectDetector::new(
                &settings.detection_url,
                settings.call_timeout(),
            )?),
            annotator: Arc::new(KeywordInsightAnnotator::new()),
        })
    }

    /// In-process scripted collaborators that answer immediately
    pub fn scripted() -> Self {
        Self {
            speech: Arc::new(ScriptedSpeechRecognizer::new("", 0.9)),
            detector: Arc::new(ScriptedObjectDetector::new(vec![], 0.9)),
            annotator: Arc::new(KeywordInsightAnnotator::new()),
        }
    }
}

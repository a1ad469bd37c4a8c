//! Scripted collaborators for tests and offline runs
//!
//! Each call consumes the next [`ScriptStep`]; once the script is exhausted
//! the default step (immediate success) is used.

use super::{Detection, DetectionSet, ObjectDetector, SpeechRecognizer, Transcription};
use crate::controller::ParameterSnapshot;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Behavior of one scripted call
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Succeed after a delay
    Respond(Duration),
    /// Fail after a delay
    Fail(Duration, String),
    /// Never answer (the caller's timeout fires)
    Hang,
}

#[derive(Debug)]
struct Script {
    steps: Mutex<VecDeque<ScriptStep>>,
    default: ScriptStep,
    calls: AtomicU64,
}

impl Script {
    fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default: ScriptStep::Respond(Duration::ZERO),
            calls: AtomicU64::new(0),
        }
    }

    async fn play(&self, collaborator: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        match step {
            ScriptStep::Respond(delay) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
            ScriptStep::Fail(delay, message) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Err(Error::CollaboratorFailure {
                    collaborator: collaborator.to_string(),
                    message,
                })
            }
            ScriptStep::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Speech recognizer returning a fixed transcript
#[derive(Debug)]
pub struct ScriptedSpeechRecognizer {
    transcript: String,
    confidence: f64,
    script: Script,
}

impl ScriptedSpeechRecognizer {
    pub fn new(transcript: impl Into<String>, confidence: f64) -> Self {
        Self {
            transcript: transcript.into(),
            confidence,
            script: Script::new(),
        }
    }

    /// Queue a step for the next unscripted call
    pub fn then(self, step: ScriptStep) -> Self {
        self.script.steps.lock().push_back(step);
        self
    }

    /// Step used once the queue is empty
    pub fn by_default(mut self, step: ScriptStep) -> Self {
        self.script.default = step;
        self
    }

    pub fn calls(&self) -> u64 {
        self.script.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedSpeechRecognizer {
    async fn recognize_speech(
        &self,
        _audio: Bytes,
        _params: &ParameterSnapshot,
    ) -> Result<Transcription> {
        self.script.play(self.name()).await?;
        Ok(Transcription {
            transcript: self.transcript.clone(),
            confidence: self.confidence,
        })
    }

    fn name(&self) -> &str {
        "scripted-speech"
    }
}

/// Object detector returning fixed detections
#[derive(Debug)]
pub struct ScriptedObjectDetector {
    detections: Vec<Detection>,
    confidence: f64,
    script: Script,
}

impl ScriptedObjectDetector {
    pub fn new(detections: Vec<Detection>, confidence: f64) -> Self {
        Self {
            detections,
            confidence,
            script: Script::new(),
        }
    }

    pub fn then(self, step: ScriptStep) -> Self {
        self.script.steps.lock().push_back(step);
        self
    }

    pub fn by_default(mut self, step: ScriptStep) -> Self {
        self.script.default = step;
        self
    }

    pub fn calls(&self) -> u64 {
        self.script.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectDetector for ScriptedObjectDetector {
    async fn detect_objects(
        &self,
        _frame: Bytes,
        params: &ParameterSnapshot,
    ) -> Result<DetectionSet> {
        self.script.play(self.name()).await?;
        let threshold = params.multipliers.detection_threshold;
        Ok(DetectionSet {
            detections: self
                .detections
                .iter()
                .filter(|d| d.confidence >= threshold)
                .cloned()
                .collect(),
            confidence: self.confidence,
        })
    }

    fn name(&self) -> &str {
        "scripted-detector"
    }
}
